//! Background reclamation: expired PENDING reservations, overdue offline
//! payments and reservations abandoned mid-payment.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::config::settings::{self, ConfigScope, DEFAULT_OFFLINE_REMINDER_HOURS};
use crate::engine::audit::{self, AuditEventType};
use crate::engine::lifecycle;
use crate::engine::EngineDeps;
use crate::models::event::Event;
use crate::models::extra::ItemStatus;
use crate::models::reservation::{Reservation, ReservationStatus};
use crate::utils::error::EngineError;

fn group_by_event(rows: &[(Uuid, Uuid)]) -> HashMap<Uuid, Vec<Uuid>> {
    let mut grouped: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (id, event_id) in rows {
        grouped.entry(*event_id).or_default().push(*id);
    }
    grouped
}

/// Reclaim every PENDING reservation whose validity has lapsed. One batch
/// transaction; `SKIP LOCKED` on the selection keeps the sweep from stalling
/// behind live confirmations.
pub async fn cleanup_expired_reservations(deps: &EngineDeps) -> Result<(), EngineError> {
    let now = Utc::now();
    let mut tx = deps.pool.begin().await?;
    let expired = Reservation::find_expired_pending(&mut tx, now).await?;
    if expired.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = expired.iter().map(|(id, _)| *id).collect();
    for (id, event_id) in &expired {
        audit::record(
            &mut tx,
            AuditEventType::CancelReservationExpired,
            *id,
            *event_id,
            "RESERVATION",
            &id.to_string(),
            &[],
        )
        .await?;
    }
    lifecycle::reclaim_inventory(&mut tx, &ids, ItemStatus::Expired).await?;
    Reservation::remove(&mut tx, &ids).await?;
    tx.commit().await?;

    for (event_id, reservation_ids) in group_by_event(&expired) {
        if let Err(e) = deps.hooks.reservations_expired(event_id, &reservation_ids).await {
            tracing::warn!(%event_id, error = ?e, "expiration hook failed");
        }
    }
    tracing::info!(count = ids.len(), "expired reservations reclaimed");
    Ok(())
}

/// Reclaim OFFLINE_PAYMENT reservations whose deadline passed. Each one gets
/// its own transaction so a single bad row cannot block the rest, and the
/// buyer is told the reservation is gone.
pub async fn cleanup_expired_offline_reservations(deps: &EngineDeps) -> Result<(), EngineError> {
    let now = Utc::now();
    let mut conn = deps.pool.acquire().await?;
    let overdue = Reservation::find_expired_offline(&mut conn, now).await?;
    drop(conn);
    for reservation_id in overdue {
        if let Err(e) = expire_offline_reservation(deps, reservation_id, now).await {
            tracing::error!(%reservation_id, error = ?e, "offline expiration failed");
        }
    }
    Ok(())
}

async fn expire_offline_reservation(
    deps: &EngineDeps,
    reservation_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let mut tx = deps.pool.begin().await?;
    let Some(reservation) = Reservation::lock_for_update(&mut tx, reservation_id).await? else {
        return Ok(());
    };
    // re-check under the lock: the payment may have arrived in the meantime
    if reservation.status != ReservationStatus::OfflinePayment || reservation.valid_until >= now {
        return Ok(());
    }
    let event_id = reservation.event_id;
    let buyer_email = reservation.email.clone();
    audit::record(
        &mut tx,
        AuditEventType::CancelReservationExpired,
        reservation_id,
        event_id,
        "RESERVATION",
        &reservation_id.to_string(),
        &[],
    )
    .await?;
    lifecycle::reclaim_inventory(&mut tx, &[reservation_id], ItemStatus::Expired).await?;
    Reservation::remove(&mut tx, &[reservation_id]).await?;
    tx.commit().await?;

    if let Some(email) = buyer_email {
        if let Err(e) = deps
            .notifications
            .send(
                event_id,
                &email,
                "reservation-expired-offline",
                serde_json::json!({ "reservation_id": reservation_id }),
            )
            .await
        {
            tracing::warn!(%reservation_id, error = ?e, "expiration email failed");
        }
    }
    if let Err(e) = deps.hooks.reservations_expired(event_id, &[reservation_id]).await {
        tracing::warn!(%event_id, error = ?e, "expiration hook failed");
    }
    tracing::info!(%reservation_id, "overdue offline reservation reclaimed");
    Ok(())
}

/// Flag reservations abandoned mid-payment as STUCK and alert the operator,
/// one notification per event. Their inventory stays held: an external
/// charge may have gone through, so releasing it is a human decision.
pub async fn mark_stuck_in_payment_reservations(deps: &EngineDeps) -> Result<(), EngineError> {
    let now = Utc::now();
    let mut tx = deps.pool.begin().await?;
    let stuck = Reservation::mark_stuck(&mut tx, now).await?;
    if stuck.is_empty() {
        return Ok(());
    }
    for (id, event_id) in &stuck {
        audit::record(
            &mut tx,
            AuditEventType::MarkStuck,
            *id,
            *event_id,
            "RESERVATION",
            &id.to_string(),
            &[],
        )
        .await?;
    }
    tx.commit().await?;

    let mut conn = deps.pool.acquire().await?;
    for (event_id, reservation_ids) in group_by_event(&stuck) {
        match Event::find_by_id(&mut conn, event_id).await {
            Ok(Some(event)) => {
                if let Err(e) = deps
                    .notifications
                    .send(
                        event_id,
                        &event.organization_email,
                        "reservations-stuck-review",
                        serde_json::json!({
                            "event": event.title,
                            "reservation_ids": reservation_ids,
                        }),
                    )
                    .await
                {
                    tracing::warn!(%event_id, error = ?e, "stuck-reservations alert failed");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(%event_id, error = ?e, "event lookup failed for stuck alert");
            }
        }
        if let Err(e) = deps.hooks.stuck_reservations(event_id, &reservation_ids).await {
            tracing::warn!(%event_id, error = ?e, "stuck-reservations hook failed");
        }
    }
    tracing::warn!(count = stuck.len(), "reservations stuck in payment");
    Ok(())
}

/// Remind buyers that their offline payment deadline is approaching. Each
/// reservation is stamped before the email goes out, so nobody is reminded
/// twice even when delivery fails.
pub async fn send_offline_payment_reminders(deps: &EngineDeps) -> Result<(), EngineError> {
    let now = Utc::now();
    let mut conn = deps.pool.acquire().await?;
    let candidates = Reservation::find_offline_unreminded(&mut conn, now).await?;
    drop(conn);
    for reservation_id in candidates {
        if let Err(e) = remind_offline_reservation(deps, reservation_id, now).await {
            tracing::error!(%reservation_id, error = ?e, "payment reminder failed");
        }
    }
    Ok(())
}

async fn remind_offline_reservation(
    deps: &EngineDeps,
    reservation_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let mut tx = deps.pool.begin().await?;
    let Some(reservation) = Reservation::lock_for_update(&mut tx, reservation_id).await? else {
        return Ok(());
    };
    // re-check under the lock: the payment or a concurrent sweep may have
    // settled this in the meantime
    if reservation.status != ReservationStatus::OfflinePayment
        || reservation.last_reminder_at.is_some()
    {
        return Ok(());
    }
    let Some(email) = reservation.email.clone() else {
        return Ok(());
    };
    let Some(event) = Event::find_by_id(&mut tx, reservation.event_id).await? else {
        return Ok(());
    };
    let lead_hours = deps
        .settings
        .get_int(
            ConfigScope::event(event.organization_id, event.id),
            settings::OFFLINE_REMINDER_HOURS,
            DEFAULT_OFFLINE_REMINDER_HOURS,
        )
        .await;
    if reservation.valid_until > now + Duration::hours(lead_hours) {
        return Ok(());
    }
    Reservation::flag_reminder_sent(&mut tx, reservation_id, now).await?;
    tx.commit().await?;

    if let Err(e) = deps
        .notifications
        .send(
            event.id,
            &email,
            "reservation-payment-reminder",
            serde_json::json!({
                "reservation_id": reservation_id,
                "event": event.title,
                "deadline": reservation.valid_until.to_rfc3339(),
            }),
        )
        .await
    {
        tracing::warn!(%reservation_id, error = ?e, "reminder email failed");
    }
    Ok(())
}

/// Run the sweeps every 30 seconds.
pub async fn start_scheduler(deps: EngineDeps) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let job = Job::new_async("1/30 * * * * *", move |_uuid, _lock| {
        let deps = deps.clone();
        Box::pin(async move {
            if let Err(e) = cleanup_expired_reservations(&deps).await {
                tracing::error!(error = ?e, "expired-reservations sweep failed");
            }
            if let Err(e) = cleanup_expired_offline_reservations(&deps).await {
                tracing::error!(error = ?e, "offline-expiration sweep failed");
            }
            if let Err(e) = mark_stuck_in_payment_reservations(&deps).await {
                tracing::error!(error = ?e, "stuck-payment sweep failed");
            }
            if let Err(e) = send_offline_payment_reminders(&deps).await {
                tracing::error!(error = ?e, "payment-reminder sweep failed");
            }
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;
    tracing::info!("reclamation scheduler started");
    Ok(scheduler)
}
