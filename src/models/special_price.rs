use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "token_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Free,
    Pending,
    Taken,
}

/// Single-use access token gating a restricted category.
///
/// A `PENDING` token is reserved for the session that produced it until it is
/// renewed, expired or settled as `TAKEN`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SpecialPrice {
    pub id: Uuid,
    pub code: String,
    pub status: TokenStatus,
    pub session_id: Option<String>,
    pub category_id: Uuid,
}

impl SpecialPrice {
    pub async fn find_by_code(
        conn: &mut PgConnection,
        code: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM special_prices WHERE code = $1")
            .bind(code)
            .fetch_optional(conn)
            .await
    }

    pub async fn bind_to_session(
        conn: &mut PgConnection,
        id: Uuid,
        session_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE special_prices SET session_id = $2 WHERE id = $1 AND status = 'FREE'",
        )
        .bind(id)
        .bind(session_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_status(
        conn: &mut PgConnection,
        id: Uuid,
        status: TokenStatus,
        session_id: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("UPDATE special_prices SET status = $2, session_id = $3 WHERE id = $1")
                .bind(id)
                .bind(status)
                .bind(session_id)
                .execute(conn)
                .await?;
        Ok(result.rows_affected())
    }

    /// Settle every token backing a ticket of the given reservations.
    pub async fn mark_taken_for_reservations(
        conn: &mut PgConnection,
        reservation_ids: &[Uuid],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE special_prices SET status = 'TAKEN', session_id = NULL
             WHERE id IN (
                 SELECT special_price_id FROM tickets
                 WHERE reservation_id = ANY($1) AND special_price_id IS NOT NULL
             )",
        )
        .bind(reservation_ids)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Release tokens held by reclaimed reservations back to availability.
    pub async fn reset_to_free_for_reservations(
        conn: &mut PgConnection,
        reservation_ids: &[Uuid],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE special_prices SET status = 'FREE', session_id = NULL
             WHERE id IN (
                 SELECT special_price_id FROM tickets
                 WHERE reservation_id = ANY($1) AND special_price_id IS NOT NULL
             )",
        )
        .bind(reservation_ids)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }
}
