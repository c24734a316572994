use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

/// A ticket category. Bounded categories own a fixed set of inventory rows;
/// unbounded categories draw from the event's shared untagged pool.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketCategory {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub bounded: bool,
    pub access_restricted: bool,
    pub src_price_cts: i64,
    pub created_at: DateTime<Utc>,
}

impl TicketCategory {
    pub async fn get_by_id_and_event(
        conn: &mut PgConnection,
        id: Uuid,
        event_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM ticket_categories WHERE id = $1 AND event_id = $2",
        )
        .bind(id)
        .bind(event_id)
        .fetch_optional(conn)
        .await
    }

    pub async fn get_by_id(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM ticket_categories WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await
    }
}
