//! Inventory allocation. All selection goes through `FOR UPDATE SKIP LOCKED`
//! so concurrent reservations never fight over the same rows; a request is
//! satisfied completely or not at all.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::category::TicketCategory;
use crate::models::reservation::{Reservation, ReservationStatus};
use crate::models::special_price::{SpecialPrice, TokenStatus};
use crate::models::ticket::{Ticket, TicketStatus};
use crate::utils::error::EngineError;

/// What the regular purchase path may sell. RELEASED and PRE_RESERVED rows
/// are reserved for waiting-queue reclamation and stay out of it.
pub const SALEABLE: &[TicketStatus] = &[TicketStatus::Free];

/// Lock `quantity` tickets of the category matching one of the allowed
/// source statuses. Bounded categories draw from their own rows, unbounded
/// ones from the event's untagged pool. A shortfall fails the whole request;
/// nothing is partially granted.
pub async fn allocate(
    conn: &mut PgConnection,
    category: &TicketCategory,
    quantity: i64,
    statuses: &[TicketStatus],
) -> Result<Vec<Uuid>, EngineError> {
    if quantity <= 0 {
        return Err(EngineError::Validation(
            "requested quantity must be positive".to_string(),
        ));
    }
    let ids = if category.bounded {
        Ticket::select_in_category_for_update(
            conn,
            category.event_id,
            category.id,
            quantity,
            statuses,
        )
        .await?
    } else {
        Ticket::select_unallocated_for_update(conn, category.event_id, quantity, statuses).await?
    };
    if ids.len() as i64 != quantity {
        tracing::debug!(
            category_id = %category.id,
            requested = quantity,
            available = ids.len(),
            "allocation shortfall"
        );
        return Err(EngineError::NotEnoughInventory);
    }
    Ok(ids)
}

/// Validate the access token presented for a category.
///
/// Restricted categories demand a FREE token of that same category, and a
/// token covers exactly one unit. Non-restricted categories ignore tokens.
pub async fn resolve_access_token(
    conn: &mut PgConnection,
    category: &TicketCategory,
    token_code: Option<&str>,
    quantity: i64,
) -> Result<Option<SpecialPrice>, EngineError> {
    if !category.access_restricted {
        return Ok(None);
    }
    let Some(code) = token_code else {
        return Err(EngineError::MissingAccessToken);
    };
    if quantity > 1 {
        // one token, one unit
        return Err(EngineError::NotEnoughInventory);
    }
    let token = SpecialPrice::find_by_code(conn, code)
        .await?
        .ok_or(EngineError::InvalidAccessToken)?;
    if token.category_id != category.id || token.status != TokenStatus::Free {
        return Err(EngineError::InvalidAccessToken);
    }
    Ok(Some(token))
}

/// Re-issue an access token for a browsing session before it is spent.
///
/// A FREE token binds to the session. A PENDING token already owned by this
/// session is handed back as-is; one owned by another session is recoverable
/// only when its backing reservation has been reclaimed.
pub async fn renew_access_token(
    conn: &mut PgConnection,
    code: &str,
    session_id: &str,
) -> Result<SpecialPrice, EngineError> {
    let token = SpecialPrice::find_by_code(conn, code)
        .await?
        .ok_or(EngineError::InvalidAccessToken)?;
    match token.status {
        TokenStatus::Free => {
            let updated = SpecialPrice::bind_to_session(conn, token.id, session_id).await?;
            if updated != 1 {
                // lost the race against another session
                return Err(EngineError::InvalidAccessToken);
            }
            Ok(SpecialPrice {
                session_id: Some(session_id.to_string()),
                ..token
            })
        }
        TokenStatus::Pending => {
            if token.session_id.as_deref() == Some(session_id) {
                return Ok(token);
            }
            if backing_reservation_is_live(conn, &token).await? {
                return Err(EngineError::InvalidAccessToken);
            }
            SpecialPrice::update_status(conn, token.id, TokenStatus::Free, Some(session_id))
                .await?;
            Ok(SpecialPrice {
                status: TokenStatus::Free,
                session_id: Some(session_id.to_string()),
                ..token
            })
        }
        TokenStatus::Taken => Err(EngineError::InvalidAccessToken),
    }
}

/// Whether a PENDING token still backs a ticket whose reservation holds
/// inventory. Dangling tokens (no ticket, or a reclaimed reservation) may be
/// re-issued.
async fn backing_reservation_is_live(
    conn: &mut PgConnection,
    token: &SpecialPrice,
) -> Result<bool, EngineError> {
    let Some(ticket) = Ticket::find_by_special_price_id(conn, token.id).await? else {
        return Ok(false);
    };
    let Some(reservation_id) = ticket.reservation_id else {
        return Ok(false);
    };
    let Some(reservation) = Reservation::find_by_id(conn, reservation_id).await? else {
        return Ok(false);
    };
    Ok(reservation.status.holds_inventory() || reservation.status == ReservationStatus::Complete)
}
