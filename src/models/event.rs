use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

/// How VAT relates to the source price of an event's inventory.
///
/// Frozen onto the reservation at creation time so that confirmation
/// reproduces the exact totals computed when the reservation was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "vat_policy", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VatPolicy {
    Included,
    NotIncluded,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Where operator alerts for this event's organization go.
    pub organization_email: String,
    pub title: String,
    pub currency: String,
    /// VAT rate in basis points (2100 = 21.00%). Integer end to end.
    pub vat_rate_bp: i64,
    pub vat_policy: VatPolicy,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await
    }
}
