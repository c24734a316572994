use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "discount_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    Percentage,
    FixedAmount,
}

/// Promotional discount code. Read-only from the engine's perspective.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoCode {
    pub id: Uuid,
    pub code: String,
    pub event_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub discount_type: DiscountType,
    /// Percentage points for `Percentage`, minor units for `FixedAmount`.
    pub discount_amount: i64,
    /// Eligible categories; empty means every category qualifies.
    pub categories: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl PromoCode {
    /// Resolve a code scoped to the event, falling back to the organization.
    pub async fn find_in_event_or_organization(
        conn: &mut PgConnection,
        event_id: Uuid,
        organization_id: Uuid,
        code: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM promo_codes
             WHERE code = $1 AND (event_id = $2 OR organization_id = $3)
             ORDER BY event_id NULLS LAST
             LIMIT 1",
        )
        .bind(code)
        .bind(event_id)
        .bind(organization_id)
        .fetch_optional(conn)
        .await
    }

    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM promo_codes WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Whether a ticket of the given category qualifies for this discount.
    pub fn applies_to(&self, category_id: Uuid) -> bool {
        self.categories.is_empty() || self.categories.contains(&category_id)
    }
}
