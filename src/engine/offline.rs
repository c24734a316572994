//! Deferred bank-transfer settlement. A reservation parked in
//! OFFLINE_PAYMENT keeps its inventory until an operator confirms that the
//! money arrived, or until the payment deadline passes.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::engine::audit::{self, AuditEventType};
use crate::engine::lifecycle::{self, ContactDetails};
use crate::engine::EngineDeps;
use crate::models::event::Event;
use crate::models::reservation::{Reservation, ReservationStatus};
use crate::models::transaction::PaymentTransaction;
use crate::payment::{PaymentProxy, NOT_YET_PAID_TRANSACTION_ID};
use crate::utils::error::EngineError;

/// How long the buyer gets to wire the money.
///
/// The window is the configured number of days, capped by the days left
/// before the event starts, and the resulting instant is truncated to a
/// half-day boundary so deadlines land at 00:00 or 12:00. An event already
/// started admits no offline payment. A zero-day window gets a two-hour
/// grace period instead of failing outright.
pub fn offline_payment_deadline(
    now: DateTime<Utc>,
    event_start: DateTime<Utc>,
    configured_days: i64,
) -> Result<DateTime<Utc>, EngineError> {
    let days_to_begin = (event_start.date_naive() - now.date_naive()).num_days();
    if days_to_begin < 0 {
        return Err(EngineError::OfflinePaymentNotAllowed);
    }
    let waiting = configured_days.min(days_to_begin);
    if waiting == 0 {
        tracing::warn!("offline payment window is empty, granting a two-hour grace period");
        return Ok(now + Duration::hours(2));
    }
    Ok(truncate_to_half_day(now + Duration::days(waiting)))
}

fn truncate_to_half_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    let hour = if ts.hour() >= 12 { 12 } else { 0 };
    let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default();
    DateTime::from_naive_utc_and_offset(ts.date_naive().and_time(time), Utc)
}

/// Park a PENDING reservation in OFFLINE_PAYMENT, extending its validity to
/// the payment deadline. Runs inside the caller's confirmation transaction.
pub(crate) async fn transition_to_offline_payment(
    conn: &mut PgConnection,
    reservation: &Reservation,
    contact: &ContactDetails,
    deadline: DateTime<Utc>,
) -> Result<(), EngineError> {
    let updated = Reservation::postpone_payment(
        conn,
        reservation.id,
        deadline,
        &contact.email,
        &contact.full_name,
        contact.first_name.as_deref(),
        contact.last_name.as_deref(),
        contact.billing_address.as_deref(),
    )
    .await?;
    if updated != 1 {
        return Err(EngineError::InvariantViolation(format!(
            "expected 1 reservation moved to OFFLINE_PAYMENT, got {updated}"
        )));
    }
    let before = reservation.tracked_fields();
    if let Some(after) = Reservation::find_by_id(conn, reservation.id).await? {
        let changes = audit::diff(&before, &after.tracked_fields());
        audit::record(
            conn,
            AuditEventType::UpdateReservation,
            reservation.id,
            reservation.event_id,
            "RESERVATION",
            &reservation.id.to_string(),
            &changes,
        )
        .await?;
    }
    Ok(())
}

/// Record the settlement transaction for a reservation. A desk payment may
/// be re-confirmed, so an existing ON_SITE record makes this a logged no-op;
/// for every other channel a duplicate means the books were already written
/// and the settlement must not proceed.
pub(crate) async fn register_transaction(
    conn: &mut PgConnection,
    reservation: &Reservation,
    proxy: PaymentProxy,
    amount_cts: i64,
) -> Result<(), EngineError> {
    if let Some(existing) = PaymentTransaction::find_by_reservation(conn, reservation.id).await? {
        if proxy == PaymentProxy::OnSite {
            tracing::warn!(
                reservation_id = %reservation.id,
                transaction_id = %existing.id,
                "transaction already registered, skipping"
            );
            return Ok(());
        }
        return Err(EngineError::InvariantViolation(format!(
            "transaction {} already registered for reservation {}",
            existing.id, reservation.id
        )));
    }
    let id = format!("{}-{}", proxy.key(), Utc::now().timestamp_millis());
    PaymentTransaction::insert(
        conn,
        &id,
        Some(NOT_YET_PAID_TRANSACTION_ID),
        reservation.id,
        amount_cts,
        &reservation.currency,
        &format!("Payment confirmed for reservation {}", reservation.id),
        proxy.key(),
    )
    .await?;
    Ok(())
}

/// Operator confirmation that the wire transfer arrived: settle the
/// reservation and hand out the tickets.
pub async fn confirm_offline_payment(
    deps: &EngineDeps,
    reservation_id: Uuid,
) -> Result<(), EngineError> {
    let now = Utc::now();
    let mut tx = deps.pool.begin().await?;

    let reservation = Reservation::lock_for_update(&mut tx, reservation_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("reservation {reservation_id}")))?;
    if reservation.status != ReservationStatus::OfflinePayment
        || reservation.payment_method.as_deref() != Some(PaymentProxy::Offline.key())
    {
        return Err(EngineError::Validation(
            "reservation is not awaiting an offline payment".to_string(),
        ));
    }
    let event = Event::find_by_id(&mut tx, reservation.event_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("event {}", reservation.event_id)))?;
    let contact = ContactDetails::from_reservation(&reservation)?;

    let totals = lifecycle::authoritative_totals(&mut tx, &reservation).await?;
    register_transaction(
        &mut tx,
        &reservation,
        PaymentProxy::Offline,
        totals.price_with_vat_cts,
    )
    .await?;

    let before = reservation.tracked_fields();
    let ticket_ids =
        lifecycle::settle_in_tx(&mut tx, &reservation, PaymentProxy::Offline, &contact, now)
            .await?;
    if let Some(after) = Reservation::find_by_id(&mut tx, reservation_id).await? {
        let changes = audit::diff(&before, &after.tracked_fields());
        audit::record(
            &mut tx,
            AuditEventType::ReservationOfflinePaymentConfirmed,
            reservation_id,
            event.id,
            "RESERVATION",
            &reservation_id.to_string(),
            &changes,
        )
        .await?;
    }
    tx.commit().await?;

    lifecycle::fire_confirmation_side_effects(
        deps,
        &event,
        reservation_id,
        &ticket_ids,
        &contact,
        "reservation-confirmed-offline",
    )
    .await;
    Ok(())
}
