use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::models::event::VatPolicy;

/// Closed set of reservation states, persisted verbatim.
///
/// `PENDING → IN_PAYMENT/OFFLINE_PAYMENT → COMPLETE` is the happy path;
/// `CANCELLED`/`EXPIRED` are terminal and reclaimable; `STUCK` is terminal
/// for automation and requires operator review because the reservation may
/// correspond to a real external charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    InPayment,
    OfflinePayment,
    Complete,
    Cancelled,
    Expired,
    Stuck,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::InPayment => "IN_PAYMENT",
            ReservationStatus::OfflinePayment => "OFFLINE_PAYMENT",
            ReservationStatus::Complete => "COMPLETE",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Expired => "EXPIRED",
            ReservationStatus::Stuck => "STUCK",
        }
    }

    /// Inventory attached to a reservation in one of these states is held.
    pub fn holds_inventory(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Pending
                | ReservationStatus::InPayment
                | ReservationStatus::OfflinePayment
        )
    }

    /// Inventory attached to a reservation in one of these states may be
    /// returned to the pool.
    pub fn releasable(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Expired | ReservationStatus::Cancelled | ReservationStatus::Stuck
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: Uuid,
    pub event_id: Uuid,
    pub status: ReservationStatus,
    pub currency: String,
    pub vat_rate_bp: i64,
    pub vat_policy: VatPolicy,
    pub promo_code_id: Option<Uuid>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub billing_address: Option<String>,
    pub invoice_requested: bool,
    pub invoice_number: Option<String>,
    pub user_language: String,
    pub payment_method: Option<String>,
    pub valid_until: DateTime<Utc>,
    pub summary_snapshot: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub last_reminder_at: Option<DateTime<Utc>>,
}

impl Reservation {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_new(
        conn: &mut PgConnection,
        id: Uuid,
        event_id: Uuid,
        currency: &str,
        vat_rate_bp: i64,
        vat_policy: VatPolicy,
        promo_code_id: Option<Uuid>,
        user_language: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO reservations
                 (id, event_id, status, currency, vat_rate_bp, vat_policy,
                  promo_code_id, user_language, valid_until)
             VALUES ($1, $2, 'PENDING', $3, $4, $5, $6, $7, $8)",
        )
        .bind(id)
        .bind(event_id)
        .bind(currency)
        .bind(vat_rate_bp)
        .bind(vat_policy)
        .bind(promo_code_id)
        .bind(user_language)
        .bind(valid_until)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Load and lock the reservation row for the rest of the unit of work.
    pub async fn lock_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM reservations WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub async fn update_status(
        conn: &mut PgConnection,
        id: Uuid,
        status: ReservationStatus,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE reservations SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Flag the reservation as IN_PAYMENT together with the billing data
    /// collected in the confirmation form.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_in_payment(
        conn: &mut PgConnection,
        id: Uuid,
        email: &str,
        full_name: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
        user_language: &str,
        billing_address: Option<&str>,
        payment_method: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE reservations
             SET status = 'IN_PAYMENT', email = $2, full_name = $3, first_name = $4,
                 last_name = $5, user_language = $6, billing_address = $7,
                 payment_method = $8, confirmed_at = NULL
             WHERE id = $1",
        )
        .bind(id)
        .bind(email)
        .bind(full_name)
        .bind(first_name)
        .bind(last_name)
        .bind(user_language)
        .bind(billing_address)
        .bind(payment_method)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn mark_complete(
        conn: &mut PgConnection,
        id: Uuid,
        email: &str,
        full_name: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
        user_language: &str,
        billing_address: Option<&str>,
        confirmed_at: DateTime<Utc>,
        payment_method: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE reservations
             SET status = 'COMPLETE', email = $2, full_name = $3, first_name = $4,
                 last_name = $5, user_language = $6, billing_address = $7,
                 confirmed_at = $8, payment_method = $9
             WHERE id = $1",
        )
        .bind(id)
        .bind(email)
        .bind(full_name)
        .bind(first_name)
        .bind(last_name)
        .bind(user_language)
        .bind(billing_address)
        .bind(confirmed_at)
        .bind(payment_method)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Move the reservation to OFFLINE_PAYMENT, extending its validity to the
    /// computed payment deadline.
    #[allow(clippy::too_many_arguments)]
    pub async fn postpone_payment(
        conn: &mut PgConnection,
        id: Uuid,
        deadline: DateTime<Utc>,
        email: &str,
        full_name: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
        billing_address: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE reservations
             SET status = 'OFFLINE_PAYMENT', valid_until = $2, email = $3,
                 full_name = $4, first_name = $5, last_name = $6,
                 billing_address = $7, payment_method = 'OFFLINE'
             WHERE id = $1",
        )
        .bind(id)
        .bind(deadline)
        .bind(email)
        .bind(full_name)
        .bind(first_name)
        .bind(last_name)
        .bind(billing_address)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_invoice_number(
        conn: &mut PgConnection,
        id: Uuid,
        invoice_number: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE reservations SET invoice_requested = TRUE, invoice_number = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(invoice_number)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Persist the printable summary. Display cache only, never authoritative.
    pub async fn set_summary_snapshot(
        conn: &mut PgConnection,
        id: Uuid,
        snapshot: &serde_json::Value,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE reservations SET summary_snapshot = $2 WHERE id = $1")
            .bind(id)
            .bind(snapshot)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// PENDING reservations whose validity predates the cutoff, locked with
    /// the same row discipline as allocation so the sweep can run next to
    /// live traffic.
    pub async fn find_expired_pending(
        conn: &mut PgConnection,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, Uuid)>, sqlx::Error> {
        sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT id, event_id FROM reservations
             WHERE status = 'PENDING' AND valid_until < $1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(cutoff)
        .fetch_all(conn)
        .await
    }

    pub async fn find_expired_offline(
        conn: &mut PgConnection,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT id FROM reservations
             WHERE status = 'OFFLINE_PAYMENT' AND valid_until < $1",
        )
        .bind(cutoff)
        .fetch_all(conn)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// OFFLINE_PAYMENT reservations with contact data on file that were never
    /// reminded of their deadline. The window check happens per reservation
    /// because the reminder lead time is a scoped setting.
    pub async fn find_offline_unreminded(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT id FROM reservations
             WHERE status = 'OFFLINE_PAYMENT' AND last_reminder_at IS NULL
               AND email IS NOT NULL AND valid_until > $1",
        )
        .bind(now)
        .fetch_all(conn)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Stamp the reminder. The NULL guard makes a concurrent sweep a no-op.
    pub async fn flag_reminder_sent(
        conn: &mut PgConnection,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE reservations SET last_reminder_at = $2
             WHERE id = $1 AND last_reminder_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Flag overdue IN_PAYMENT reservations as STUCK, returning what changed.
    pub async fn mark_stuck(
        conn: &mut PgConnection,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, Uuid)>, sqlx::Error> {
        sqlx::query_as::<_, (Uuid, Uuid)>(
            "UPDATE reservations SET status = 'STUCK'
             WHERE status = 'IN_PAYMENT' AND valid_until < $1
             RETURNING id, event_id",
        )
        .bind(cutoff)
        .fetch_all(conn)
        .await
    }

    pub async fn remove(
        conn: &mut PgConnection,
        ids: &[Uuid],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM reservations WHERE id = ANY($1)")
            .bind(ids)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_waiting_for_payment(
        conn: &mut PgConnection,
        event_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM reservations
             WHERE event_id = $1 AND status = 'OFFLINE_PAYMENT'",
        )
        .bind(event_id)
        .fetch_one(conn)
        .await?;
        Ok(count)
    }

    /// Fields captured in before/after audit diffs.
    pub fn tracked_fields(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("status", Some(self.status.as_str().to_string())),
            ("email", self.email.clone()),
            ("full_name", self.full_name.clone()),
            ("billing_address", self.billing_address.clone()),
            ("invoice_number", self.invoice_number.clone()),
            ("payment_method", self.payment_method.clone()),
            ("valid_until", Some(self.valid_until.to_rfc3339())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_held_and_releasable_states_are_disjoint() {
        let all = [
            ReservationStatus::Pending,
            ReservationStatus::InPayment,
            ReservationStatus::OfflinePayment,
            ReservationStatus::Complete,
            ReservationStatus::Cancelled,
            ReservationStatus::Expired,
            ReservationStatus::Stuck,
        ];
        for status in all {
            assert!(
                !(status.holds_inventory() && status.releasable()),
                "{:?} cannot both hold and release inventory",
                status
            );
        }
        // COMPLETE is settled: neither held nor releasable
        assert!(!ReservationStatus::Complete.holds_inventory());
        assert!(!ReservationStatus::Complete.releasable());
    }

    #[test]
    fn test_status_is_persisted_verbatim() {
        assert_eq!(ReservationStatus::OfflinePayment.as_str(), "OFFLINE_PAYMENT");
        assert_eq!(ReservationStatus::InPayment.as_str(), "IN_PAYMENT");
        assert_eq!(ReservationStatus::Stuck.as_str(), "STUCK");
    }
}
