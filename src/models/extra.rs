use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

/// Status of an add-on item, mirroring ticket status semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "item_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Pending,
    ToBePaid,
    Acquired,
    Cancelled,
    Expired,
}

/// An add-on sold next to tickets (parking, dinner, donation...).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AdditionalService {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub fix_price: bool,
    pub saleable: bool,
    pub src_price_cts: i64,
}

impl AdditionalService {
    pub async fn get_by_id(
        conn: &mut PgConnection,
        id: Uuid,
        event_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM additional_services WHERE id = $1 AND event_id = $2",
        )
        .bind(id)
        .bind(event_id)
        .fetch_optional(conn)
        .await
    }
}

/// One sold unit of an additional service. Like tickets, these rows are
/// recycled on reclamation, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AdditionalServiceItem {
    pub id: Uuid,
    pub service_id: Uuid,
    pub event_id: Uuid,
    pub reservation_id: Option<Uuid>,
    pub status: ItemStatus,
    pub src_price_cts: i64,
    pub final_price_cts: i64,
    pub vat_cts: i64,
    pub discount_cts: i64,
    pub created_at: DateTime<Utc>,
}

impl AdditionalServiceItem {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        conn: &mut PgConnection,
        id: Uuid,
        service_id: Uuid,
        event_id: Uuid,
        reservation_id: Uuid,
        src_price_cts: i64,
        final_price_cts: i64,
        vat_cts: i64,
        discount_cts: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO additional_service_items
                 (id, service_id, event_id, reservation_id, status,
                  src_price_cts, final_price_cts, vat_cts, discount_cts)
             VALUES ($1, $2, $3, $4, 'PENDING', $5, $6, $7, $8)",
        )
        .bind(id)
        .bind(service_id)
        .bind(event_id)
        .bind(reservation_id)
        .bind(src_price_cts)
        .bind(final_price_cts)
        .bind(vat_cts)
        .bind(discount_cts)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_by_reservation(
        conn: &mut PgConnection,
        reservation_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM additional_service_items
             WHERE reservation_id = $1 ORDER BY created_at, id",
        )
        .bind(reservation_id)
        .fetch_all(conn)
        .await
    }

    pub async fn update_status_for_reservation(
        conn: &mut PgConnection,
        reservation_id: Uuid,
        status: ItemStatus,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE additional_service_items SET status = $2 WHERE reservation_id = $1",
        )
        .bind(reservation_id)
        .bind(status)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Recycle items of reclaimed reservations.
    pub async fn release_for_reservations(
        conn: &mut PgConnection,
        reservation_ids: &[Uuid],
        status: ItemStatus,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE additional_service_items
             SET status = $2, reservation_id = NULL,
                 final_price_cts = 0, vat_cts = 0, discount_cts = 0
             WHERE reservation_id = ANY($1)",
        )
        .bind(reservation_ids)
        .bind(status)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }
}
