//! Reservation lifecycle: creation, confirmation and cancellation.
//!
//! Creation is all-or-nothing inside one transaction. Confirmation is split
//! into independent units of work so that a committed IN_PAYMENT marker
//! survives the gateway round-trip, with a compensating revert when the
//! charge does not go through.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::config::settings::{
    self, ConfigScope, DEFAULT_MAX_TICKETS_PER_RESERVATION, DEFAULT_OFFLINE_PAYMENT_DAYS,
    DEFAULT_RESERVATION_TIMEOUT_MINUTES,
};
use crate::engine::audit::{self, AuditEventType};
use crate::engine::offline;
use crate::engine::pricing::{self, ItemLine, TicketLine, TotalPrice};
use crate::engine::{allocator, EngineDeps};
use crate::models::category::TicketCategory;
use crate::models::event::Event;
use crate::models::extra::{AdditionalService, AdditionalServiceItem, ItemStatus};
use crate::models::field_answer::FieldAnswer;
use crate::models::promo_code::PromoCode;
use crate::models::reservation::{Reservation, ReservationStatus};
use crate::models::special_price::{SpecialPrice, TokenStatus};
use crate::models::transaction::PaymentTransaction;
use crate::models::ticket::{Ticket, TicketStatus};
use crate::payment::{
    evaluate_payment_proxy, ChargeOutcome, ChargeRequest, PaymentProxy, PaymentResult,
    NOT_YET_PAID_TRANSACTION_ID,
};
use crate::utils::error::EngineError;

#[derive(Debug, Clone)]
pub struct TicketLineRequest {
    pub category_id: Uuid,
    pub quantity: i64,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceLineRequest {
    pub service_id: Uuid,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub event_id: Uuid,
    pub tickets: Vec<TicketLineRequest>,
    pub additional_services: Vec<ServiceLineRequest>,
    pub promo_code: Option<String>,
    pub user_language: String,
    pub session_id: Option<String>,
}

/// Buyer identity collected on the confirmation form.
#[derive(Debug, Clone)]
pub struct ContactDetails {
    pub email: String,
    pub full_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub user_language: String,
    pub billing_address: Option<String>,
}

impl ContactDetails {
    pub(crate) fn from_reservation(reservation: &Reservation) -> Result<Self, EngineError> {
        match (&reservation.email, &reservation.full_name) {
            (Some(email), Some(full_name)) => Ok(Self {
                email: email.clone(),
                full_name: full_name.clone(),
                first_name: reservation.first_name.clone(),
                last_name: reservation.last_name.clone(),
                user_language: reservation.user_language.clone(),
                billing_address: reservation.billing_address.clone(),
            }),
            _ => Err(EngineError::InvariantViolation(format!(
                "reservation {} has no contact data on file",
                reservation.id
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub contact: ContactDetails,
    pub payment_proxy: Option<PaymentProxy>,
    pub gateway_token: Option<String>,
    pub invoice_requested: bool,
}

/// Create a reservation: allocate every requested unit, freeze the fiscal
/// terms, price the whole basket and persist the printable summary. Any
/// failure rolls the whole thing back; inventory is never partially held.
pub async fn create_reservation(
    deps: &EngineDeps,
    request: &ReservationRequest,
) -> Result<Uuid, EngineError> {
    if request.tickets.is_empty() && request.additional_services.is_empty() {
        return Err(EngineError::Validation("empty reservation request".to_string()));
    }
    let now = Utc::now();
    let reservation_id = Uuid::new_v4();

    let mut tx = deps.pool.begin().await?;
    let event = Event::find_by_id(&mut tx, request.event_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("event {}", request.event_id)))?;
    let scope = ConfigScope::event(event.organization_id, event.id);

    let max_tickets = deps
        .settings
        .get_int(
            scope,
            settings::MAX_TICKETS_PER_RESERVATION,
            DEFAULT_MAX_TICKETS_PER_RESERVATION,
        )
        .await;
    let requested_units: i64 = request.tickets.iter().map(|l| l.quantity).sum();
    if requested_units > max_tickets {
        return Err(EngineError::Validation(format!(
            "at most {max_tickets} tickets per reservation"
        )));
    }
    let timeout_minutes = deps
        .settings
        .get_int(
            scope,
            settings::RESERVATION_TIMEOUT_MINUTES,
            DEFAULT_RESERVATION_TIMEOUT_MINUTES,
        )
        .await;

    let promo = match &request.promo_code {
        Some(code) => {
            let found = PromoCode::find_in_event_or_organization(
                &mut tx,
                event.id,
                event.organization_id,
                code,
            )
            .await?;
            Some(found.ok_or_else(|| EngineError::NotFound(format!("promo code {code}")))?)
        }
        None => None,
    };

    Reservation::insert_new(
        &mut tx,
        reservation_id,
        event.id,
        &event.currency,
        event.vat_rate_bp,
        event.vat_policy,
        promo.as_ref().map(|p| p.id),
        &request.user_language,
        now + Duration::minutes(timeout_minutes),
    )
    .await?;

    for line in &request.tickets {
        let category = TicketCategory::get_by_id_and_event(&mut tx, line.category_id, event.id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("category {}", line.category_id)))?;
        let token = allocator::resolve_access_token(
            &mut tx,
            &category,
            line.access_token.as_deref(),
            line.quantity,
        )
        .await?;
        let ids =
            allocator::allocate(&mut tx, &category, line.quantity, allocator::SALEABLE).await?;
        Ticket::bind_to_reservation(
            &mut tx,
            &ids,
            reservation_id,
            category.id,
            &request.user_language,
            category.src_price_cts,
            token.as_ref().map(|t| t.id),
        )
        .await?;
        if let Some(token) = token {
            SpecialPrice::update_status(
                &mut tx,
                token.id,
                TokenStatus::Pending,
                request.session_id.as_deref(),
            )
            .await?;
        }
    }

    for line in &request.additional_services {
        if line.quantity <= 0 {
            return Err(EngineError::Validation(
                "requested quantity must be positive".to_string(),
            ));
        }
        let service = AdditionalService::get_by_id(&mut tx, line.service_id, event.id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("service {}", line.service_id)))?;
        if !service.saleable {
            return Err(EngineError::Validation(format!(
                "service {} is not on sale",
                service.name
            )));
        }
        for _ in 0..line.quantity {
            let price =
                pricing::price_unit(service.src_price_cts, event.vat_rate_bp, event.vat_policy, None);
            AdditionalServiceItem::insert(
                &mut tx,
                Uuid::new_v4(),
                service.id,
                event.id,
                reservation_id,
                price.src_cts,
                price.final_cts,
                price.vat_cts,
                price.discount_cts,
            )
            .await?;
        }
    }

    // Price tickets over the stable reservation ordering so the per-ticket
    // discount plan is reproducible at confirmation time.
    let context = load_pricing_context(&mut tx, reservation_id, promo).await?;
    let tickets = Ticket::find_in_reservation(&mut tx, reservation_id).await?;
    let plan = pricing::discount_plan(context.promo.as_ref(), &context.tickets);
    for (ticket, slot) in tickets.iter().zip(plan) {
        let price =
            pricing::price_unit(ticket.src_price_cts, event.vat_rate_bp, event.vat_policy, slot);
        Ticket::update_price(&mut tx, ticket.id, price.final_cts, price.vat_cts, price.discount_cts)
            .await?;
    }

    let summary = pricing::build_summary(
        event.vat_policy,
        event.vat_rate_bp,
        &context.tickets,
        &context.items,
        context.promo.as_ref(),
    );
    let snapshot = serde_json::to_value(&summary)
        .map_err(|e| EngineError::InvariantViolation(format!("summary serialization: {e}")))?;
    Reservation::set_summary_snapshot(&mut tx, reservation_id, &snapshot).await?;

    audit::record(
        &mut tx,
        AuditEventType::ReservationCreate,
        reservation_id,
        event.id,
        "RESERVATION",
        &reservation_id.to_string(),
        &[],
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        %reservation_id,
        event_id = %event.id,
        tickets = requested_units,
        "reservation created"
    );
    Ok(reservation_id)
}

pub(crate) struct PricingContext {
    pub tickets: Vec<TicketLine>,
    pub items: Vec<ItemLine>,
    pub promo: Option<PromoCode>,
}

/// Load everything needed to recompute a reservation's price from the
/// database. Tickets come back in stable order.
pub(crate) async fn load_pricing_context(
    conn: &mut PgConnection,
    reservation_id: Uuid,
    promo: Option<PromoCode>,
) -> Result<PricingContext, EngineError> {
    let tickets = Ticket::find_in_reservation(conn, reservation_id).await?;
    let mut category_names: HashMap<Uuid, String> = HashMap::new();
    let mut ticket_lines = Vec::with_capacity(tickets.len());
    for ticket in &tickets {
        let category_id = ticket.category_id.ok_or_else(|| {
            EngineError::InvariantViolation(format!("ticket {} has no category", ticket.id))
        })?;
        if !category_names.contains_key(&category_id) {
            let category = TicketCategory::get_by_id(conn, category_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("category {category_id}")))?;
            category_names.insert(category_id, category.name);
        }
        ticket_lines.push(TicketLine {
            category_id,
            category_name: category_names[&category_id].clone(),
            src_price_cts: ticket.src_price_cts,
        });
    }

    let items = AdditionalServiceItem::find_by_reservation(conn, reservation_id).await?;
    let mut service_names: HashMap<Uuid, String> = HashMap::new();
    let mut item_lines = Vec::with_capacity(items.len());
    for item in &items {
        if !service_names.contains_key(&item.service_id) {
            let service = AdditionalService::get_by_id(conn, item.service_id, item.event_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("service {}", item.service_id)))?;
            service_names.insert(item.service_id, service.name);
        }
        item_lines.push(ItemLine {
            service_id: item.service_id,
            service_name: service_names[&item.service_id].clone(),
            src_price_cts: item.src_price_cts,
        });
    }

    Ok(PricingContext {
        tickets: ticket_lines,
        items: item_lines,
        promo,
    })
}

/// Recompute the reservation total from current rows under the fiscal terms
/// frozen at creation. This is the amount that gets charged.
pub(crate) async fn authoritative_totals(
    conn: &mut PgConnection,
    reservation: &Reservation,
) -> Result<TotalPrice, EngineError> {
    let promo = match reservation.promo_code_id {
        Some(id) => PromoCode::find_by_id(conn, id).await?,
        None => None,
    };
    let context = load_pricing_context(conn, reservation.id, promo).await?;
    Ok(pricing::compute_totals(
        reservation.vat_policy,
        reservation.vat_rate_bp,
        &context.tickets,
        &context.items,
        context.promo.as_ref(),
    ))
}

/// Confirm a PENDING reservation through the resolved payment channel.
///
/// A declined charge comes back as `PaymentResult::Unsuccessful` with the
/// reservation returned to PENDING. An unexpected processing failure is also
/// reported as unsuccessful, but the reservation keeps whatever status it
/// reached: the charge may already have been captured, so rolling back would
/// let the sweep resell tickets somebody paid for. The stuck sweep surfaces
/// those rows to an operator instead.
pub async fn confirm(
    deps: &EngineDeps,
    reservation_id: Uuid,
    request: &ConfirmationRequest,
) -> Result<PaymentResult, EngineError> {
    let now = Utc::now();

    let mut conn = deps.pool.acquire().await?;
    let reservation = Reservation::find_by_id(&mut conn, reservation_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("reservation {reservation_id}")))?;
    if reservation.status != ReservationStatus::Pending {
        return Err(EngineError::Validation(
            "reservation cannot be confirmed in its current state".to_string(),
        ));
    }
    let event = Event::find_by_id(&mut conn, reservation.event_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("event {}", reservation.event_id)))?;
    let totals = authoritative_totals(&mut conn, &reservation).await?;
    drop(conn);

    let proxy = evaluate_payment_proxy(request.payment_proxy, totals.price_with_vat_cts);
    if proxy == PaymentProxy::Offline {
        return postpone_for_offline_payment(deps, &reservation, &event, request, now).await;
    }

    // The marker commits on its own so a crash during the gateway call
    // leaves a visible IN_PAYMENT trace instead of a silent PENDING row.
    let mut marker_set = false;
    if proxy.requires_payment_marker() {
        let mut tx = deps.pool.begin().await?;
        let updated = Reservation::mark_in_payment(
            &mut tx,
            reservation_id,
            &request.contact.email,
            &request.contact.full_name,
            request.contact.first_name.as_deref(),
            request.contact.last_name.as_deref(),
            &request.contact.user_language,
            request.contact.billing_address.as_deref(),
            proxy.key(),
        )
        .await?;
        if updated != 1 {
            return Err(EngineError::InvariantViolation(format!(
                "expected 1 reservation flagged IN_PAYMENT, got {updated}"
            )));
        }
        tx.commit().await?;
        marker_set = true;
    }

    match charge_and_settle(deps, &reservation, &event, proxy, request, &totals, now).await {
        Ok(result) => {
            if marker_set && !result.is_successful() {
                revert_payment_marker(deps, reservation_id).await;
            }
            Ok(result)
        }
        Err(err) => {
            // Deliberately no revert: the charge may have been captured, so
            // the safest state is the one already on disk. The stuck sweep
            // picks these up once valid_until lapses.
            tracing::error!(
                %reservation_id,
                error = ?err,
                "unexpected failure during payment processing, status left untouched"
            );
            Ok(PaymentResult::unsuccessful(
                "unexpected error during payment processing",
            ))
        }
    }
}

async fn postpone_for_offline_payment(
    deps: &EngineDeps,
    reservation: &Reservation,
    event: &Event,
    request: &ConfirmationRequest,
    now: DateTime<Utc>,
) -> Result<PaymentResult, EngineError> {
    let scope = ConfigScope::event(event.organization_id, event.id);
    let days = deps
        .settings
        .get_int(scope, settings::OFFLINE_PAYMENT_DAYS, DEFAULT_OFFLINE_PAYMENT_DAYS)
        .await;
    let deadline = offline::offline_payment_deadline(now, event.start_time, days)?;

    let mut tx = deps.pool.begin().await?;
    let locked = Reservation::lock_for_update(&mut tx, reservation.id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("reservation {}", reservation.id)))?;
    if locked.status != ReservationStatus::Pending {
        return Err(EngineError::Validation(
            "reservation cannot be confirmed in its current state".to_string(),
        ));
    }
    offline::transition_to_offline_payment(&mut tx, &locked, &request.contact, deadline).await?;
    tx.commit().await?;

    if let Err(e) = deps
        .notifications
        .send(
            event.id,
            &request.contact.email,
            "reservation-offline-instructions",
            json!({
                "reservation_id": reservation.id,
                "event": event.title,
                "deadline": deadline.to_rfc3339(),
            }),
        )
        .await
    {
        tracing::warn!(reservation_id = %reservation.id, error = ?e, "instructions email failed");
    }
    Ok(PaymentResult::successful(NOT_YET_PAID_TRANSACTION_ID))
}

async fn charge_and_settle(
    deps: &EngineDeps,
    reservation: &Reservation,
    event: &Event,
    proxy: PaymentProxy,
    request: &ConfirmationRequest,
    totals: &TotalPrice,
    now: DateTime<Utc>,
) -> Result<PaymentResult, EngineError> {
    // The invoice number goes on record before any money moves, so a
    // captured charge always has its fiscal document. Consumes a sequence
    // value even if the charge is declined or settlement later fails;
    // invoice numbering tolerates gaps, never duplicates.
    if request.invoice_requested && totals.price_with_vat_cts > 0 {
        let next = deps
            .sequences
            .lock_and_increment(event.organization_id)
            .await
            .map_err(|e| EngineError::InvariantViolation(format!("invoice sequence: {e}")))?;
        let scope = ConfigScope::event(event.organization_id, event.id);
        let pattern = deps
            .settings
            .get_string(scope, settings::INVOICE_NUMBER_PATTERN)
            .await;
        let number = format_invoice_number(pattern.as_deref(), next);
        let mut tx = deps.pool.begin().await?;
        Reservation::set_invoice_number(&mut tx, reservation.id, &number).await?;
        tx.commit().await?;
    }

    let mut gateway_tx_id: Option<String> = None;
    if proxy.is_online_gateway() && totals.price_with_vat_cts > 0 {
        let gateway_token = request
            .gateway_token
            .clone()
            .ok_or_else(|| EngineError::Validation("missing gateway token".to_string()))?;
        let outcome = deps
            .gateway
            .charge(ChargeRequest {
                reservation_id: reservation.id,
                gateway_token,
                amount_cts: totals.price_with_vat_cts,
                currency: reservation.currency.clone(),
                customer_email: request.contact.email.clone(),
                customer_name: request.contact.full_name.clone(),
            })
            .await;
        match outcome {
            Ok(ChargeOutcome::Approved { transaction_id }) => gateway_tx_id = Some(transaction_id),
            Ok(ChargeOutcome::Declined { reason }) => {
                tracing::info!(reservation_id = %reservation.id, %reason, "charge declined");
                return Ok(PaymentResult::unsuccessful(reason));
            }
            Err(e) => {
                // outcome unknown: must not be treated as a decline, so the
                // caller's no-revert path handles it
                return Err(EngineError::Gateway(e));
            }
        }
    }

    let mut tx = deps.pool.begin().await?;
    let locked = Reservation::lock_for_update(&mut tx, reservation.id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("reservation {}", reservation.id)))?;
    if locked.status != ReservationStatus::Pending && locked.status != ReservationStatus::InPayment
    {
        return Err(EngineError::Validation(
            "reservation cannot be settled in its current state".to_string(),
        ));
    }
    match &gateway_tx_id {
        Some(gateway_id) => {
            PaymentTransaction::insert(
                &mut tx,
                &format!("{}-{}", proxy.key(), now.timestamp_millis()),
                Some(gateway_id),
                reservation.id,
                totals.price_with_vat_cts,
                &reservation.currency,
                &format!("Payment confirmed for reservation {}", reservation.id),
                proxy.key(),
            )
            .await?;
        }
        None => {
            offline::register_transaction(&mut tx, &locked, proxy, totals.price_with_vat_cts)
                .await?;
        }
    }
    let before = locked.tracked_fields();
    let ticket_ids = settle_in_tx(&mut tx, &locked, proxy, &request.contact, now).await?;
    if let Some(after) = Reservation::find_by_id(&mut tx, reservation.id).await? {
        let changes = audit::diff(&before, &after.tracked_fields());
        audit::record(
            &mut tx,
            AuditEventType::ReservationComplete,
            reservation.id,
            event.id,
            "RESERVATION",
            &reservation.id.to_string(),
            &changes,
        )
        .await?;
    }
    tx.commit().await?;

    fire_confirmation_side_effects(
        deps,
        event,
        reservation.id,
        &ticket_ids,
        &request.contact,
        "reservation-confirmed",
    )
    .await;
    Ok(PaymentResult::successful(
        gateway_tx_id.unwrap_or_else(|| NOT_YET_PAID_TRANSACTION_ID.to_string()),
    ))
}

/// Settle a reservation inside the caller's transaction: hand out the
/// inventory, spend the access tokens and flip the reservation COMPLETE.
pub(crate) async fn settle_in_tx(
    conn: &mut PgConnection,
    reservation: &Reservation,
    proxy: PaymentProxy,
    contact: &ContactDetails,
    confirmed_at: DateTime<Utc>,
) -> Result<Vec<Uuid>, EngineError> {
    let (ticket_status, item_status) = if proxy.desk_payment_required() {
        (TicketStatus::ToBePaid, ItemStatus::ToBePaid)
    } else {
        (TicketStatus::Acquired, ItemStatus::Acquired)
    };
    let tickets_before = Ticket::find_in_reservation(conn, reservation.id).await?;
    let updated_tickets =
        Ticket::update_status_for_reservation(conn, reservation.id, ticket_status).await?;
    let updated_items =
        AdditionalServiceItem::update_status_for_reservation(conn, reservation.id, item_status)
            .await?;
    if updated_tickets + updated_items == 0 {
        return Err(EngineError::InvariantViolation(format!(
            "reservation {} has nothing to settle",
            reservation.id
        )));
    }
    SpecialPrice::mark_taken_for_reservations(conn, &[reservation.id]).await?;

    let updated = Reservation::mark_complete(
        conn,
        reservation.id,
        &contact.email,
        &contact.full_name,
        contact.first_name.as_deref(),
        contact.last_name.as_deref(),
        &contact.user_language,
        contact.billing_address.as_deref(),
        confirmed_at,
        proxy.key(),
    )
    .await?;
    if updated != 1 {
        return Err(EngineError::InvariantViolation(format!(
            "expected 1 reservation completed, got {updated}"
        )));
    }
    let tickets = Ticket::find_in_reservation(conn, reservation.id).await?;
    for (old, new) in tickets_before.iter().zip(&tickets) {
        let changes = audit::diff(&old.tracked_fields(), &new.tracked_fields());
        if !changes.is_empty() {
            audit::record(
                conn,
                AuditEventType::UpdateTicket,
                reservation.id,
                reservation.event_id,
                "TICKET",
                &new.id.to_string(),
                &changes,
            )
            .await?;
        }
    }
    Ok(tickets.into_iter().map(|t| t.id).collect())
}

/// Post-commit notifications. Failures here are logged and swallowed: the
/// settlement is already durable.
pub(crate) async fn fire_confirmation_side_effects(
    deps: &EngineDeps,
    event: &Event,
    reservation_id: Uuid,
    ticket_ids: &[Uuid],
    contact: &ContactDetails,
    template: &str,
) {
    if let Err(e) = deps.hooks.reservation_confirmed(event.id, reservation_id).await {
        tracing::warn!(%reservation_id, error = ?e, "reservation-confirmed hook failed");
    }
    for ticket_id in ticket_ids {
        if let Err(e) = deps.hooks.ticket_assigned(event.id, *ticket_id).await {
            tracing::warn!(%ticket_id, error = ?e, "ticket-assigned hook failed");
        }
    }
    if let Err(e) = deps
        .notifications
        .send(
            event.id,
            &contact.email,
            template,
            json!({
                "reservation_id": reservation_id,
                "event": event.title,
                "full_name": contact.full_name,
            }),
        )
        .await
    {
        tracing::warn!(%reservation_id, error = ?e, "confirmation email failed");
    }
}

/// Compensating action after a failed charge: put the reservation back on
/// the shelf. Best effort; a failure here is surfaced by the stuck sweep.
async fn revert_payment_marker(deps: &EngineDeps, reservation_id: Uuid) {
    let result = async {
        let mut tx = deps.pool.begin().await?;
        Reservation::update_status(&mut tx, reservation_id, ReservationStatus::Pending).await?;
        tx.commit().await
    }
    .await;
    if let Err(e) = result {
        tracing::error!(
            %reservation_id,
            error = ?e,
            "failed to revert IN_PAYMENT marker, reservation will surface as stuck"
        );
    }
}

/// Return every unit held by the given reservations to the sellable pool.
/// Runs inside the caller's transaction, before the reservation rows are
/// removed. Token reset must precede ticket release because the release
/// clears the ticket-to-token reference the reset navigates through.
pub(crate) async fn reclaim_inventory(
    conn: &mut PgConnection,
    reservation_ids: &[Uuid],
    item_status: ItemStatus,
) -> Result<(), EngineError> {
    FieldAnswer::delete_for_reservations(conn, reservation_ids).await?;
    SpecialPrice::reset_to_free_for_reservations(conn, reservation_ids).await?;
    Ticket::reset_category_for_unbounded(conn, reservation_ids).await?;
    Ticket::release_for_reservations(conn, reservation_ids).await?;
    AdditionalServiceItem::release_for_reservations(conn, reservation_ids, item_status).await?;
    Ok(())
}

/// Cancel a reservation that has not been paid. Inventory goes back to the
/// pool and the reservation row is removed; the audit trail keeps the story.
pub async fn cancel_pending_reservation(
    deps: &EngineDeps,
    reservation_id: Uuid,
) -> Result<(), EngineError> {
    let mut tx = deps.pool.begin().await?;
    let reservation = Reservation::lock_for_update(&mut tx, reservation_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("reservation {reservation_id}")))?;
    // IN_PAYMENT and OFFLINE_PAYMENT are not cancellable here: money may be
    // in flight, those paths resolve through settlement or the sweeps.
    if reservation.status != ReservationStatus::Pending {
        return Err(EngineError::Validation(
            "reservation cannot be cancelled in its current state".to_string(),
        ));
    }
    let event_id = reservation.event_id;
    audit::record(
        &mut tx,
        AuditEventType::CancelReservation,
        reservation_id,
        event_id,
        "RESERVATION",
        &reservation_id.to_string(),
        &[],
    )
    .await?;
    reclaim_inventory(&mut tx, &[reservation_id], ItemStatus::Cancelled).await?;
    Reservation::remove(&mut tx, &[reservation_id]).await?;
    tx.commit().await?;

    if let Err(e) = deps
        .hooks
        .reservations_cancelled(event_id, &[reservation_id])
        .await
    {
        tracing::warn!(%reservation_id, error = ?e, "cancellation hook failed");
    }
    tracing::info!(%reservation_id, "reservation cancelled");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct TicketAssignment {
    pub email: String,
    pub full_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Event-specific form answers (name/value). Each assignment replaces
    /// the previous holder's answers wholesale.
    pub additional_fields: Vec<(String, String)>,
}

/// Put a holder's name on a ticket. Allowed while the ticket is live
/// (reserved or handed out); recycled inventory cannot be assigned.
pub async fn assign_ticket(
    deps: &EngineDeps,
    ticket_id: Uuid,
    assignment: &TicketAssignment,
) -> Result<(), EngineError> {
    let mut tx = deps.pool.begin().await?;
    let ticket = Ticket::find_by_id(&mut tx, ticket_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("ticket {ticket_id}")))?;
    let reservation_id = ticket.reservation_id.ok_or_else(|| {
        EngineError::Validation("ticket is not part of a reservation".to_string())
    })?;
    let updated = Ticket::assign(
        &mut tx,
        ticket_id,
        &assignment.email,
        &assignment.full_name,
        assignment.first_name.as_deref(),
        assignment.last_name.as_deref(),
    )
    .await?;
    if updated != 1 {
        return Err(EngineError::Validation(
            "ticket cannot be assigned in its current state".to_string(),
        ));
    }
    FieldAnswer::delete_for_ticket(&mut tx, ticket_id).await?;
    for (field_name, field_value) in &assignment.additional_fields {
        FieldAnswer::insert(&mut tx, reservation_id, Some(ticket_id), field_name, field_value)
            .await?;
    }
    let before = ticket.tracked_fields();
    if let Some(after) = Ticket::find_by_id(&mut tx, ticket_id).await? {
        let changes = audit::diff(&before, &after.tracked_fields());
        audit::record(
            &mut tx,
            AuditEventType::UpdateTicket,
            reservation_id,
            ticket.event_id,
            "TICKET",
            &ticket_id.to_string(),
            &changes,
        )
        .await?;
    }
    tx.commit().await?;

    if let Err(e) = deps.hooks.ticket_assigned(ticket.event_id, ticket_id).await {
        tracing::warn!(%ticket_id, error = ?e, "ticket-assigned hook failed");
    }
    Ok(())
}

fn format_invoice_number(pattern: Option<&str>, sequence: i64) -> String {
    match pattern {
        Some(pattern) if pattern.contains("{}") => pattern.replace("{}", &sequence.to_string()),
        Some(pattern) => format!("{pattern}{sequence}"),
        None => sequence.to_string(),
    }
}
