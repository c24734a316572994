use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

/// Financial transaction recorded when a reservation settles.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentTransaction {
    /// Keyed `{proxy}-{millis}` for engine-registered settlements.
    pub id: String,
    pub gateway_tx_id: Option<String>,
    pub reservation_id: Uuid,
    pub amount_cts: i64,
    pub currency: String,
    pub description: String,
    pub proxy: String,
    pub created_at: DateTime<Utc>,
}

impl PaymentTransaction {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        conn: &mut PgConnection,
        id: &str,
        gateway_tx_id: Option<&str>,
        reservation_id: Uuid,
        amount_cts: i64,
        currency: &str,
        description: &str,
        proxy: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO payment_transactions
                 (id, gateway_tx_id, reservation_id, amount_cts, currency, description, proxy)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id)
        .bind(gateway_tx_id)
        .bind(reservation_id)
        .bind(amount_cts)
        .bind(currency)
        .bind(description)
        .bind(proxy)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_by_reservation(
        conn: &mut PgConnection,
        reservation_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM payment_transactions WHERE reservation_id = $1 LIMIT 1",
        )
        .bind(reservation_id)
        .fetch_optional(conn)
        .await
    }
}
