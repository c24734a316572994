//! Append-only audit trail. Every lifecycle transition records what happened
//! to which entity, with a field-level before/after diff where one applies.

use serde::Serialize;
use sqlx::PgConnection;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventType {
    ReservationCreate,
    ReservationComplete,
    ReservationOfflinePaymentConfirmed,
    CancelReservation,
    CancelReservationExpired,
    UpdateReservation,
    UpdateTicket,
    MarkStuck,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::ReservationCreate => "RESERVATION_CREATE",
            AuditEventType::ReservationComplete => "RESERVATION_COMPLETE",
            AuditEventType::ReservationOfflinePaymentConfirmed => {
                "RESERVATION_OFFLINE_PAYMENT_CONFIRMED"
            }
            AuditEventType::CancelReservation => "CANCEL_RESERVATION",
            AuditEventType::CancelReservationExpired => "CANCEL_RESERVATION_EXPIRED",
            AuditEventType::UpdateReservation => "UPDATE_RESERVATION",
            AuditEventType::UpdateTicket => "UPDATE_TICKET",
            AuditEventType::MarkStuck => "MARK_STUCK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Field-level diff between two tracked snapshots of the same entity.
/// Unchanged fields are omitted.
pub fn diff(
    before: &[(&'static str, Option<String>)],
    after: &[(&'static str, Option<String>)],
) -> Vec<FieldChange> {
    after
        .iter()
        .filter_map(|(field, new)| {
            let old = before
                .iter()
                .find(|(name, _)| name == field)
                .and_then(|(_, value)| value.clone());
            if old == *new {
                None
            } else {
                Some(FieldChange {
                    field,
                    old,
                    new: new.clone(),
                })
            }
        })
        .collect()
}

/// Append one audit entry inside the caller's unit of work, so the trail
/// commits or rolls back together with the transition it describes.
pub async fn record(
    conn: &mut PgConnection,
    event_type: AuditEventType,
    reservation_id: Uuid,
    event_id: Uuid,
    entity_type: &str,
    entity_id: &str,
    changes: &[FieldChange],
) -> Result<(), sqlx::Error> {
    let changes_json = if changes.is_empty() {
        None
    } else {
        serde_json::to_value(changes).ok()
    };
    sqlx::query(
        "INSERT INTO audit_log
             (reservation_id, event_id, event_type, entity_type, entity_id, changes)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(reservation_id)
    .bind(event_id)
    .bind(event_type.as_str())
    .bind(entity_type)
    .bind(entity_id)
    .bind(changes_json)
    .execute(conn)
    .await?;
    Ok(())
}
