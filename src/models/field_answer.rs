use sqlx::PgConnection;
use uuid::Uuid;

/// Attendee-supplied form data attached to a reservation or a single ticket.
pub struct FieldAnswer;

impl FieldAnswer {
    pub async fn insert(
        conn: &mut PgConnection,
        reservation_id: Uuid,
        ticket_id: Option<Uuid>,
        field_name: &str,
        field_value: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO field_answers (reservation_id, ticket_id, field_name, field_value)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(reservation_id)
        .bind(ticket_id)
        .bind(field_name)
        .bind(field_value)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Re-assignment replaces the previous holder's answers wholesale.
    pub async fn delete_for_ticket(
        conn: &mut PgConnection,
        ticket_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM field_answers WHERE ticket_id = $1")
            .bind(ticket_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Answers don't survive reclamation: a recycled ticket must not leak the
    /// previous holder's data.
    pub async fn delete_for_reservations(
        conn: &mut PgConnection,
        reservation_ids: &[Uuid],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM field_answers WHERE reservation_id = ANY($1)")
            .bind(reservation_ids)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }
}
