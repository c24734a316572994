use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::engine::lifecycle::{
    self, ConfirmationRequest, ContactDetails, ReservationRequest, ServiceLineRequest,
    TicketLineRequest,
};
use crate::engine::{allocator, offline, EngineDeps};
use crate::models::reservation::Reservation;
use crate::payment::PaymentProxy;
use crate::utils::error::EngineError;
use crate::utils::response::success;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "boxoffice",
    };
    success(payload).into_response()
}

#[derive(Deserialize)]
pub struct TicketLineBody {
    pub category_id: Uuid,
    pub quantity: i64,
    pub access_token: Option<String>,
}

#[derive(Deserialize)]
pub struct ServiceLineBody {
    pub service_id: Uuid,
    pub quantity: i64,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Deserialize)]
pub struct CreateReservationBody {
    pub event_id: Uuid,
    #[serde(default)]
    pub tickets: Vec<TicketLineBody>,
    #[serde(default)]
    pub additional_services: Vec<ServiceLineBody>,
    pub promo_code: Option<String>,
    #[serde(default = "default_language")]
    pub user_language: String,
    pub session_id: Option<String>,
}

pub async fn create_reservation(
    State(deps): State<EngineDeps>,
    axum::Json(body): axum::Json<CreateReservationBody>,
) -> Result<Response, EngineError> {
    let request = ReservationRequest {
        event_id: body.event_id,
        tickets: body
            .tickets
            .into_iter()
            .map(|line| TicketLineRequest {
                category_id: line.category_id,
                quantity: line.quantity,
                access_token: line.access_token,
            })
            .collect(),
        additional_services: body
            .additional_services
            .into_iter()
            .map(|line| ServiceLineRequest {
                service_id: line.service_id,
                quantity: line.quantity,
            })
            .collect(),
        promo_code: body.promo_code,
        user_language: body.user_language,
        session_id: body.session_id,
    };
    let reservation_id = lifecycle::create_reservation(&deps, &request).await?;
    Ok(success(json!({ "reservation_id": reservation_id })).into_response())
}

pub async fn get_reservation(
    State(deps): State<EngineDeps>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Response, EngineError> {
    let mut conn = deps.pool.acquire().await?;
    let reservation = Reservation::find_by_id(&mut conn, reservation_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("reservation {reservation_id}")))?;
    Ok(success(reservation).into_response())
}

#[derive(Deserialize)]
pub struct ConfirmReservationBody {
    pub email: String,
    pub full_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default = "default_language")]
    pub user_language: String,
    pub billing_address: Option<String>,
    /// Payment proxy key (STRIPE, OFFLINE, ON_SITE...). Resolved by the
    /// engine when absent.
    pub payment_method: Option<String>,
    pub gateway_token: Option<String>,
    #[serde(default)]
    pub invoice_requested: bool,
}

pub async fn confirm_reservation(
    State(deps): State<EngineDeps>,
    Path(reservation_id): Path<Uuid>,
    axum::Json(body): axum::Json<ConfirmReservationBody>,
) -> Result<Response, EngineError> {
    let payment_proxy = match &body.payment_method {
        Some(key) => Some(PaymentProxy::from_key(key).ok_or_else(|| {
            EngineError::Validation(format!("unknown payment method '{key}'"))
        })?),
        None => None,
    };
    let request = ConfirmationRequest {
        contact: ContactDetails {
            email: body.email,
            full_name: body.full_name,
            first_name: body.first_name,
            last_name: body.last_name,
            user_language: body.user_language,
            billing_address: body.billing_address,
        },
        payment_proxy,
        gateway_token: body.gateway_token,
        invoice_requested: body.invoice_requested,
    };
    let result = lifecycle::confirm(&deps, reservation_id, &request).await?;
    Ok(success(result).into_response())
}

pub async fn cancel_reservation(
    State(deps): State<EngineDeps>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Response, EngineError> {
    lifecycle::cancel_pending_reservation(&deps, reservation_id).await?;
    Ok(success(json!({ "reservation_id": reservation_id })).into_response())
}

#[derive(Deserialize)]
pub struct AssignTicketBody {
    pub email: String,
    pub full_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Event-specific form answers, keyed by field name.
    #[serde(default)]
    pub additional_fields: std::collections::BTreeMap<String, String>,
}

pub async fn assign_ticket(
    State(deps): State<EngineDeps>,
    Path(ticket_id): Path<Uuid>,
    axum::Json(body): axum::Json<AssignTicketBody>,
) -> Result<Response, EngineError> {
    let assignment = lifecycle::TicketAssignment {
        email: body.email,
        full_name: body.full_name,
        first_name: body.first_name,
        last_name: body.last_name,
        additional_fields: body.additional_fields.into_iter().collect(),
    };
    lifecycle::assign_ticket(&deps, ticket_id, &assignment).await?;
    Ok(success(json!({ "ticket_id": ticket_id })).into_response())
}

#[derive(Deserialize)]
pub struct RenewTokenBody {
    pub session_id: String,
}

pub async fn renew_access_token(
    State(deps): State<EngineDeps>,
    Path(code): Path<String>,
    axum::Json(body): axum::Json<RenewTokenBody>,
) -> Result<Response, EngineError> {
    let mut conn = deps.pool.acquire().await?;
    let token = allocator::renew_access_token(&mut conn, &code, &body.session_id).await?;
    Ok(success(token).into_response())
}

/// Operator acknowledgment that a wire transfer arrived.
pub async fn confirm_offline_payment(
    State(deps): State<EngineDeps>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Response, EngineError> {
    offline::confirm_offline_payment(&deps, reservation_id).await?;
    Ok(success(json!({ "reservation_id": reservation_id })).into_response())
}

pub async fn pending_payments_count(
    State(deps): State<EngineDeps>,
    Path(event_id): Path<Uuid>,
) -> Result<Response, EngineError> {
    let mut conn = deps.pool.acquire().await?;
    let count = Reservation::count_waiting_for_payment(&mut conn, event_id).await?;
    Ok(success(json!({ "event_id": event_id, "count": count })).into_response())
}
