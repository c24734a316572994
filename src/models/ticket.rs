use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Free,
    PreReserved,
    Pending,
    ToBePaid,
    Acquired,
    Cancelled,
    Expired,
    Released,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Free => "FREE",
            TicketStatus::PreReserved => "PRE_RESERVED",
            TicketStatus::Pending => "PENDING",
            TicketStatus::ToBePaid => "TO_BE_PAID",
            TicketStatus::Acquired => "ACQUIRED",
            TicketStatus::Cancelled => "CANCELLED",
            TicketStatus::Expired => "EXPIRED",
            TicketStatus::Released => "RELEASED",
        }
    }
}

/// One unit of inventory. Never deleted: reclaimed rows are recycled by
/// clearing the reservation reference and resetting the status.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub category_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    pub status: TicketStatus,
    pub src_price_cts: i64,
    pub final_price_cts: i64,
    pub vat_cts: i64,
    pub discount_cts: i64,
    pub special_price_id: Option<Uuid>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub locale: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn statuses_as_text(statuses: &[TicketStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

impl Ticket {
    /// Lock up to `quantity` rows of a bounded category matching one of the
    /// allowed source statuses. `SKIP LOCKED` keeps concurrent allocations
    /// from ever selecting the same row.
    pub async fn select_in_category_for_update(
        conn: &mut PgConnection,
        event_id: Uuid,
        category_id: Uuid,
        quantity: i64,
        statuses: &[TicketStatus],
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT id FROM tickets
             WHERE event_id = $1 AND category_id = $2
               AND status = ANY($3::ticket_status[])
             LIMIT $4
             FOR UPDATE SKIP LOCKED",
        )
        .bind(event_id)
        .bind(category_id)
        .bind(statuses_as_text(statuses))
        .bind(quantity)
        .fetch_all(conn)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Same as above for unbounded categories: draw from the untagged pool.
    pub async fn select_unallocated_for_update(
        conn: &mut PgConnection,
        event_id: Uuid,
        quantity: i64,
        statuses: &[TicketStatus],
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT id FROM tickets
             WHERE event_id = $1 AND category_id IS NULL
               AND status = ANY($2::ticket_status[])
             LIMIT $3
             FOR UPDATE SKIP LOCKED",
        )
        .bind(event_id)
        .bind(statuses_as_text(statuses))
        .bind(quantity)
        .fetch_all(conn)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Stamp previously locked rows with the reservation they now belong to.
    pub async fn bind_to_reservation(
        conn: &mut PgConnection,
        ids: &[Uuid],
        reservation_id: Uuid,
        category_id: Uuid,
        locale: &str,
        src_price_cts: i64,
        special_price_id: Option<Uuid>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tickets
             SET reservation_id = $2, status = 'PENDING', category_id = $3,
                 locale = $4, src_price_cts = $5, special_price_id = $6
             WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(reservation_id)
        .bind(category_id)
        .bind(locale)
        .bind(src_price_cts)
        .bind(special_price_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_price(
        conn: &mut PgConnection,
        id: Uuid,
        final_price_cts: i64,
        vat_cts: i64,
        discount_cts: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tickets SET final_price_cts = $2, vat_cts = $3, discount_cts = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(final_price_cts)
        .bind(vat_cts)
        .bind(discount_cts)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Record who will hold the ticket. Only live tickets can be assigned.
    pub async fn assign(
        conn: &mut PgConnection,
        id: Uuid,
        email: &str,
        full_name: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tickets
             SET email = $2, full_name = $3, first_name = $4, last_name = $5
             WHERE id = $1 AND status IN ('PENDING', 'TO_BE_PAID', 'ACQUIRED')",
        )
        .bind(id)
        .bind(email)
        .bind(full_name)
        .bind(first_name)
        .bind(last_name)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find_in_reservation(
        conn: &mut PgConnection,
        reservation_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM tickets WHERE reservation_id = $1 ORDER BY created_at, id",
        )
        .bind(reservation_id)
        .fetch_all(conn)
        .await
    }

    pub async fn find_by_special_price_id(
        conn: &mut PgConnection,
        special_price_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM tickets WHERE special_price_id = $1")
            .bind(special_price_id)
            .fetch_optional(conn)
            .await
    }

    pub async fn update_status_for_reservation(
        conn: &mut PgConnection,
        reservation_id: Uuid,
        status: TicketStatus,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE tickets SET status = $2 WHERE reservation_id = $1")
            .bind(reservation_id)
            .bind(status)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Detach tickets of unbounded categories from the category before the
    /// rows go back to the shared pool.
    pub async fn reset_category_for_unbounded(
        conn: &mut PgConnection,
        reservation_ids: &[Uuid],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tickets SET category_id = NULL
             WHERE reservation_id = ANY($1)
               AND category_id IN (SELECT id FROM ticket_categories WHERE bounded = FALSE)",
        )
        .bind(reservation_ids)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Recycle every ticket of the given reservations: back to FREE, owner
    /// identity and computed prices cleared, reservation reference dropped.
    pub async fn release_for_reservations(
        conn: &mut PgConnection,
        reservation_ids: &[Uuid],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tickets
             SET status = 'FREE', reservation_id = NULL, special_price_id = NULL,
                 final_price_cts = 0, vat_cts = 0, discount_cts = 0,
                 email = NULL, full_name = NULL, first_name = NULL,
                 last_name = NULL, locale = NULL
             WHERE reservation_id = ANY($1)",
        )
        .bind(reservation_ids)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Fields captured in before/after audit diffs.
    pub fn tracked_fields(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("status", Some(self.status.as_str().to_string())),
            ("reservation_id", self.reservation_id.map(|id| id.to_string())),
            ("category_id", self.category_id.map(|id| id.to_string())),
            ("final_price_cts", Some(self.final_price_cts.to_string())),
            ("email", self.email.clone()),
            ("full_name", self.full_name.clone()),
            ("locale", self.locale.clone()),
        ]
    }
}
