//! End-to-end engine tests against a real Postgres instance.
//!
//! They run only when DATABASE_URL points at a disposable database; without
//! it every test skips so the suite stays green on machines without Postgres.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use boxoffice::config::Settings;
use boxoffice::engine::lifecycle::{
    self, ConfirmationRequest, ContactDetails, ReservationRequest, TicketLineRequest,
};
use boxoffice::engine::{allocator, offline, sweeper, EngineDeps};
use boxoffice::external::{
    LogHookDispatcher, LogNotificationSink, NotificationSink, PgSequenceProvider, SequenceProvider,
};
use boxoffice::models::reservation::{Reservation, ReservationStatus};
use boxoffice::payment::{
    AutoApproveGateway, ChargeOutcome, ChargeRequest, PaymentGateway, PaymentProxy, PaymentResult,
};
use boxoffice::utils::error::EngineError;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .ok()?;
    sqlx::migrate!("./migrations").run(&pool).await.ok()?;
    Some(pool)
}

fn deps_custom(
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    notifications: Arc<dyn NotificationSink>,
    sequences: Arc<dyn SequenceProvider>,
) -> EngineDeps {
    EngineDeps {
        pool,
        gateway,
        notifications,
        hooks: Arc::new(LogHookDispatcher),
        sequences,
        settings: Settings::fixed(HashMap::new()),
    }
}

fn deps_with_gateway(pool: PgPool, gateway: Arc<dyn PaymentGateway>) -> EngineDeps {
    let sequences = Arc::new(PgSequenceProvider::new(pool.clone()));
    deps_custom(pool, gateway, Arc::new(LogNotificationSink), sequences)
}

fn deps(pool: PgPool) -> EngineDeps {
    deps_with_gateway(pool, Arc::new(AutoApproveGateway))
}

async fn seed_event(pool: &PgPool) -> Uuid {
    let event_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO events (id, organization_id, organization_email, title, currency,
                             vat_rate_bp, vat_policy, start_time)
         VALUES ($1, $2, 'ops@example.com', 'Test Event', 'EUR', 1000, 'NOT_INCLUDED', $3)",
    )
    .bind(event_id)
    .bind(Uuid::new_v4())
    .bind(Utc::now() + Duration::days(30))
    .execute(pool)
    .await
    .unwrap();
    event_id
}

async fn seed_category(pool: &PgPool, event_id: Uuid, price_cts: i64, capacity: i64) -> Uuid {
    let category_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO ticket_categories (id, event_id, name, bounded, src_price_cts)
         VALUES ($1, $2, 'General', TRUE, $3)",
    )
    .bind(category_id)
    .bind(event_id)
    .bind(price_cts)
    .execute(pool)
    .await
    .unwrap();
    for _ in 0..capacity {
        sqlx::query(
            "INSERT INTO tickets (id, event_id, category_id, status) VALUES ($1, $2, $3, 'FREE')",
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(category_id)
        .execute(pool)
        .await
        .unwrap();
    }
    category_id
}

async fn seed_restricted_category(
    pool: &PgPool,
    event_id: Uuid,
    price_cts: i64,
    capacity: i64,
) -> Uuid {
    let category_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO ticket_categories (id, event_id, name, bounded, access_restricted, src_price_cts)
         VALUES ($1, $2, 'VIP', TRUE, TRUE, $3)",
    )
    .bind(category_id)
    .bind(event_id)
    .bind(price_cts)
    .execute(pool)
    .await
    .unwrap();
    for _ in 0..capacity {
        sqlx::query(
            "INSERT INTO tickets (id, event_id, category_id, status) VALUES ($1, $2, $3, 'FREE')",
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(category_id)
        .execute(pool)
        .await
        .unwrap();
    }
    category_id
}

async fn seed_access_token(pool: &PgPool, category_id: Uuid, code: &str) {
    sqlx::query(
        "INSERT INTO special_prices (id, code, status, category_id) VALUES ($1, $2, 'FREE', $3)",
    )
    .bind(Uuid::new_v4())
    .bind(code)
    .bind(category_id)
    .execute(pool)
    .await
    .unwrap();
}

async fn token_status(pool: &PgPool, code: &str) -> String {
    let (status,): (String,) =
        sqlx::query_as("SELECT status::text FROM special_prices WHERE code = $1")
            .bind(code)
            .fetch_one(pool)
            .await
            .unwrap();
    status
}

fn reservation_request(event_id: Uuid, category_id: Uuid, quantity: i64) -> ReservationRequest {
    ReservationRequest {
        event_id,
        tickets: vec![TicketLineRequest {
            category_id,
            quantity,
            access_token: None,
        }],
        additional_services: vec![],
        promo_code: None,
        user_language: "en".to_string(),
        session_id: None,
    }
}

fn gated_request(
    event_id: Uuid,
    category_id: Uuid,
    quantity: i64,
    access_token: Option<&str>,
    session_id: Option<&str>,
) -> ReservationRequest {
    ReservationRequest {
        event_id,
        tickets: vec![TicketLineRequest {
            category_id,
            quantity,
            access_token: access_token.map(str::to_string),
        }],
        additional_services: vec![],
        promo_code: None,
        user_language: "en".to_string(),
        session_id: session_id.map(str::to_string),
    }
}

fn confirmation(payment_method: Option<PaymentProxy>) -> ConfirmationRequest {
    ConfirmationRequest {
        contact: ContactDetails {
            email: "buyer@example.com".to_string(),
            full_name: "Test Buyer".to_string(),
            first_name: None,
            last_name: None,
            user_language: "en".to_string(),
            billing_address: None,
        },
        payment_proxy: payment_method,
        gateway_token: Some("tok_test".to_string()),
        invoice_requested: false,
    }
}

async fn free_tickets(pool: &PgPool, category_id: Uuid) -> i64 {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tickets WHERE category_id = $1 AND status = 'FREE'",
    )
    .bind(category_id)
    .fetch_one(pool)
    .await
    .unwrap();
    count
}

#[tokio::test]
async fn allocation_is_all_or_nothing() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 2).await;
    let deps = deps(pool.clone());

    let result =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 3)).await;
    assert!(matches!(result, Err(EngineError::NotEnoughInventory)));
    // nothing was held back
    assert_eq!(free_tickets(&pool, category_id).await, 2);

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 2))
            .await
            .unwrap();
    assert_eq!(free_tickets(&pool, category_id).await, 0);

    let mut conn = pool.acquire().await.unwrap();
    let reservation = Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.status, ReservationStatus::Pending);
    assert!(reservation.summary_snapshot.is_some());
}

#[tokio::test]
async fn concurrent_requests_never_oversell() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    let deps_a = deps(pool.clone());
    let deps_b = deps(pool.clone());

    let request = reservation_request(event_id, category_id, 1);
    let (a, b) = tokio::join!(
        lifecycle::create_reservation(&deps_a, &request),
        lifecycle::create_reservation(&deps_b, &request),
    );
    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one request must win the last ticket");
    assert_eq!(free_tickets(&pool, category_id).await, 0);
}

#[tokio::test]
async fn expired_reservations_are_reclaimed_and_resellable() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    let deps = deps(pool.clone());

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
            .await
            .unwrap();
    sqlx::query("UPDATE reservations SET valid_until = now() - interval '1 minute' WHERE id = $1")
        .bind(reservation_id)
        .execute(&pool)
        .await
        .unwrap();

    sweeper::cleanup_expired_reservations(&deps).await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    assert!(Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(free_tickets(&pool, category_id).await, 1);

    // the reclaimed unit is immediately sellable again
    lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
        .await
        .unwrap();
    assert_eq!(free_tickets(&pool, category_id).await, 0);
}

struct DecliningGateway;

#[async_trait]
impl PaymentGateway for DecliningGateway {
    async fn charge(&self, _request: ChargeRequest) -> anyhow::Result<ChargeOutcome> {
        Ok(ChargeOutcome::Declined {
            reason: "card declined".to_string(),
        })
    }
}

struct ErroringGateway;

#[async_trait]
impl PaymentGateway for ErroringGateway {
    async fn charge(&self, _request: ChargeRequest) -> anyhow::Result<ChargeOutcome> {
        anyhow::bail!("connection reset by peer")
    }
}

#[derive(Default)]
struct CapturingSink {
    sent: std::sync::Mutex<Vec<(String, String)>>,
}

impl CapturingSink {
    fn recipients_of(&self, template: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, t)| t == template)
            .map(|(to, _)| to.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for CapturingSink {
    async fn send(
        &self,
        _event_id: Uuid,
        to_address: &str,
        template: &str,
        _model: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to_address.to_string(), template.to_string()));
        Ok(())
    }
}

struct FailingSequences;

#[async_trait]
impl SequenceProvider for FailingSequences {
    async fn lock_and_increment(&self, _organization_id: Uuid) -> anyhow::Result<i64> {
        anyhow::bail!("sequence store unavailable")
    }
}

#[tokio::test]
async fn declined_charge_reverts_to_pending() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    let deps = deps_with_gateway(pool.clone(), Arc::new(DecliningGateway));

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
            .await
            .unwrap();
    let result = lifecycle::confirm(
        &deps,
        reservation_id,
        &confirmation(Some(PaymentProxy::Stripe)),
    )
    .await
    .unwrap();
    assert!(matches!(result, PaymentResult::Unsuccessful { .. }));

    let mut conn = pool.acquire().await.unwrap();
    let reservation = Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.status, ReservationStatus::Pending);
    // inventory stays attached to the reservation, ready for a retry
    let (pending,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tickets WHERE reservation_id = $1 AND status = 'PENDING'",
    )
    .bind(reservation_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn offline_payment_parks_and_settles_once() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    let deps = deps(pool.clone());

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
            .await
            .unwrap();
    let result = lifecycle::confirm(
        &deps,
        reservation_id,
        &confirmation(Some(PaymentProxy::Offline)),
    )
    .await
    .unwrap();
    assert!(result.is_successful());

    let mut conn = pool.acquire().await.unwrap();
    let parked = Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parked.status, ReservationStatus::OfflinePayment);
    assert!(parked.valid_until > Utc::now());
    drop(conn);

    offline::confirm_offline_payment(&deps, reservation_id)
        .await
        .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let settled = Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, ReservationStatus::Complete);
    let (acquired,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tickets WHERE reservation_id = $1 AND status = 'ACQUIRED'",
    )
    .bind(reservation_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(acquired, 1);
    let (transactions,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM payment_transactions WHERE reservation_id = $1")
            .bind(reservation_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(transactions, 1);

    // a second confirmation is rejected, not double-settled
    let second = offline::confirm_offline_payment(&deps, reservation_id).await;
    assert!(matches!(second, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn abandoned_payments_are_marked_stuck_and_keep_inventory() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    let sink = Arc::new(CapturingSink::default());
    let deps = deps_custom(
        pool.clone(),
        Arc::new(AutoApproveGateway),
        sink.clone(),
        Arc::new(PgSequenceProvider::new(pool.clone())),
    );

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
            .await
            .unwrap();
    sqlx::query(
        "UPDATE reservations
         SET status = 'IN_PAYMENT', valid_until = now() - interval '1 minute'
         WHERE id = $1",
    )
    .bind(reservation_id)
    .execute(&pool)
    .await
    .unwrap();

    sweeper::mark_stuck_in_payment_reservations(&deps)
        .await
        .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let reservation = Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.status, ReservationStatus::Stuck);
    // a possible external charge means the inventory is not auto-released
    assert_eq!(free_tickets(&pool, category_id).await, 0);
    // the organization is told to review the batch
    assert_eq!(
        sink.recipients_of("reservations-stuck-review"),
        vec!["ops@example.com".to_string()]
    );

    // the regular expiration sweep must not touch a STUCK reservation
    sweeper::cleanup_expired_reservations(&deps).await.unwrap();
    assert!(Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn zero_total_reservation_completes_without_gateway() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 0, 1).await;
    let deps = deps_with_gateway(pool.clone(), Arc::new(DecliningGateway));

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
            .await
            .unwrap();
    // gateway would decline, but a zero total never reaches it
    let result = lifecycle::confirm(&deps, reservation_id, &confirmation(None))
        .await
        .unwrap();
    assert!(result.is_successful());

    let mut conn = pool.acquire().await.unwrap();
    let reservation = Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.status, ReservationStatus::Complete);
}

#[tokio::test]
async fn unexpected_processing_failure_never_reverts_the_reservation() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    let deps = deps_custom(
        pool.clone(),
        Arc::new(AutoApproveGateway),
        Arc::new(LogNotificationSink),
        Arc::new(FailingSequences),
    );

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
            .await
            .unwrap();
    let mut request = confirmation(Some(PaymentProxy::Stripe));
    request.invoice_requested = true;
    let result = lifecycle::confirm(&deps, reservation_id, &request)
        .await
        .unwrap();
    assert!(matches!(result, PaymentResult::Unsuccessful { .. }));

    // the failure happened after the marker: the reservation must stay
    // IN_PAYMENT instead of silently going back on the shelf
    let mut conn = pool.acquire().await.unwrap();
    let reservation = Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.status, ReservationStatus::InPayment);
    drop(conn);

    // the expiration sweep never reclaims it; the stuck sweep surfaces it
    sqlx::query("UPDATE reservations SET valid_until = now() - interval '1 minute' WHERE id = $1")
        .bind(reservation_id)
        .execute(&pool)
        .await
        .unwrap();
    sweeper::cleanup_expired_reservations(&deps).await.unwrap();
    assert_eq!(free_tickets(&pool, category_id).await, 0);
    sweeper::mark_stuck_in_payment_reservations(&deps)
        .await
        .unwrap();
    let mut conn = pool.acquire().await.unwrap();
    let reservation = Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.status, ReservationStatus::Stuck);
}

#[tokio::test]
async fn gateway_transport_fault_is_not_treated_as_a_decline() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    let deps = deps_with_gateway(pool.clone(), Arc::new(ErroringGateway));

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
            .await
            .unwrap();
    let result = lifecycle::confirm(
        &deps,
        reservation_id,
        &confirmation(Some(PaymentProxy::Stripe)),
    )
    .await
    .unwrap();
    assert!(matches!(result, PaymentResult::Unsuccessful { .. }));

    // the charge outcome is unknown, so the reservation is not put back on
    // the shelf the way a decline would be
    let mut conn = pool.acquire().await.unwrap();
    let reservation = Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.status, ReservationStatus::InPayment);
}

#[tokio::test]
async fn invoice_number_is_assigned_before_the_charge() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    let deps = deps_with_gateway(pool.clone(), Arc::new(DecliningGateway));

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
            .await
            .unwrap();
    let mut request = confirmation(Some(PaymentProxy::Stripe));
    request.invoice_requested = true;
    let result = lifecycle::confirm(&deps, reservation_id, &request)
        .await
        .unwrap();
    assert!(matches!(result, PaymentResult::Unsuccessful { .. }));

    // the decline put the reservation back on the shelf, but the invoice
    // number was already on record when the gateway was called
    let mut conn = pool.acquire().await.unwrap();
    let reservation = Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.status, ReservationStatus::Pending);
    assert_eq!(reservation.invoice_number.as_deref(), Some("1"));
}

#[tokio::test]
async fn released_tickets_are_not_resold_through_the_regular_path() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    sqlx::query(
        "INSERT INTO tickets (id, event_id, category_id, status) VALUES ($1, $2, $3, 'RELEASED')",
    )
    .bind(Uuid::new_v4())
    .bind(event_id)
    .bind(category_id)
    .execute(&pool)
    .await
    .unwrap();
    let deps = deps(pool.clone());

    // only the FREE unit is sellable
    let result =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 2)).await;
    assert!(matches!(result, Err(EngineError::NotEnoughInventory)));

    lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
        .await
        .unwrap();
    let (released,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tickets WHERE category_id = $1 AND status = 'RELEASED'",
    )
    .bind(category_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(released, 1);
}

#[tokio::test]
async fn restricted_category_is_gated_by_access_tokens() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_restricted_category(&pool, event_id, 5_000, 2).await;
    seed_access_token(&pool, category_id, "VIP-A").await;
    let deps = deps(pool.clone());

    let no_token =
        lifecycle::create_reservation(&deps, &gated_request(event_id, category_id, 1, None, None))
            .await;
    assert!(matches!(no_token, Err(EngineError::MissingAccessToken)));

    // one token covers exactly one unit
    let too_many = lifecycle::create_reservation(
        &deps,
        &gated_request(event_id, category_id, 2, Some("VIP-A"), None),
    )
    .await;
    assert!(matches!(too_many, Err(EngineError::NotEnoughInventory)));

    let unknown = lifecycle::create_reservation(
        &deps,
        &gated_request(event_id, category_id, 1, Some("NO-SUCH"), None),
    )
    .await;
    assert!(matches!(unknown, Err(EngineError::InvalidAccessToken)));

    let reservation_id = lifecycle::create_reservation(
        &deps,
        &gated_request(event_id, category_id, 1, Some("VIP-A"), None),
    )
    .await
    .unwrap();
    assert_eq!(token_status(&pool, "VIP-A").await, "PENDING");

    // a spent token cannot gate a second reservation
    let reuse = lifecycle::create_reservation(
        &deps,
        &gated_request(event_id, category_id, 1, Some("VIP-A"), None),
    )
    .await;
    assert!(matches!(reuse, Err(EngineError::InvalidAccessToken)));

    let result = lifecycle::confirm(
        &deps,
        reservation_id,
        &confirmation(Some(PaymentProxy::Stripe)),
    )
    .await
    .unwrap();
    assert!(result.is_successful());
    assert_eq!(token_status(&pool, "VIP-A").await, "TAKEN");
}

#[tokio::test]
async fn pending_token_is_recoverable_only_after_reclamation() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_restricted_category(&pool, event_id, 5_000, 1).await;
    seed_access_token(&pool, category_id, "VIP-B").await;
    let deps = deps(pool.clone());

    let reservation_id = lifecycle::create_reservation(
        &deps,
        &gated_request(event_id, category_id, 1, Some("VIP-B"), Some("session-1")),
    )
    .await
    .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    // the owning session gets its token back as-is
    let token = allocator::renew_access_token(&mut conn, "VIP-B", "session-1")
        .await
        .unwrap();
    assert_eq!(token.session_id.as_deref(), Some("session-1"));

    // another session cannot steal it while the reservation holds inventory
    let stolen = allocator::renew_access_token(&mut conn, "VIP-B", "session-2").await;
    assert!(matches!(stolen, Err(EngineError::InvalidAccessToken)));
    drop(conn);

    sqlx::query("UPDATE reservations SET valid_until = now() - interval '1 minute' WHERE id = $1")
        .bind(reservation_id)
        .execute(&pool)
        .await
        .unwrap();
    sweeper::cleanup_expired_reservations(&deps).await.unwrap();

    // reclamation freed the token, so the other session can now take it
    let mut conn = pool.acquire().await.unwrap();
    let token = allocator::renew_access_token(&mut conn, "VIP-B", "session-2")
        .await
        .unwrap();
    assert_eq!(token.session_id.as_deref(), Some("session-2"));
}

#[tokio::test]
async fn offline_deadline_reminder_is_sent_once() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    let sink = Arc::new(CapturingSink::default());
    let deps = deps_custom(
        pool.clone(),
        Arc::new(AutoApproveGateway),
        sink.clone(),
        Arc::new(PgSequenceProvider::new(pool.clone())),
    );

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
            .await
            .unwrap();
    lifecycle::confirm(
        &deps,
        reservation_id,
        &confirmation(Some(PaymentProxy::Offline)),
    )
    .await
    .unwrap();

    // not yet inside the reminder window
    sweeper::send_offline_payment_reminders(&deps).await.unwrap();
    assert!(sink.recipients_of("reservation-payment-reminder").is_empty());

    sqlx::query("UPDATE reservations SET valid_until = now() + interval '6 hours' WHERE id = $1")
        .bind(reservation_id)
        .execute(&pool)
        .await
        .unwrap();
    sweeper::send_offline_payment_reminders(&deps).await.unwrap();
    sweeper::send_offline_payment_reminders(&deps).await.unwrap();
    assert_eq!(
        sink.recipients_of("reservation-payment-reminder"),
        vec!["buyer@example.com".to_string()]
    );

    let mut conn = pool.acquire().await.unwrap();
    let reservation = Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert!(reservation.last_reminder_at.is_some());
}

#[tokio::test]
async fn offline_confirmation_requires_the_offline_channel() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    let deps = deps(pool.clone());

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
            .await
            .unwrap();
    lifecycle::confirm(
        &deps,
        reservation_id,
        &confirmation(Some(PaymentProxy::Offline)),
    )
    .await
    .unwrap();
    sqlx::query("UPDATE reservations SET payment_method = 'STRIPE' WHERE id = $1")
        .bind(reservation_id)
        .execute(&pool)
        .await
        .unwrap();

    let result = offline::confirm_offline_payment(&deps, reservation_id).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn duplicate_transaction_blocks_offline_settlement() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    let deps = deps(pool.clone());

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
            .await
            .unwrap();
    lifecycle::confirm(
        &deps,
        reservation_id,
        &confirmation(Some(PaymentProxy::Offline)),
    )
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO payment_transactions
             (id, gateway_tx_id, reservation_id, amount_cts, currency, description, proxy)
         VALUES ('manual-1', NULL, $1, 1100, 'EUR', 'entered by hand', 'OFFLINE')",
    )
    .bind(reservation_id)
    .execute(&pool)
    .await
    .unwrap();

    let result = offline::confirm_offline_payment(&deps, reservation_id).await;
    assert!(matches!(result, Err(EngineError::InvariantViolation(_))));

    // the settlement rolled back wholesale
    let mut conn = pool.acquire().await.unwrap();
    let reservation = Reservation::find_by_id(&mut conn, reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.status, ReservationStatus::OfflinePayment);
}

#[tokio::test]
async fn assignment_replaces_form_answers_and_reclamation_purges_them() {
    let Some(pool) = test_pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let event_id = seed_event(&pool).await;
    let category_id = seed_category(&pool, event_id, 1_000, 1).await;
    let deps = deps(pool.clone());

    let reservation_id =
        lifecycle::create_reservation(&deps, &reservation_request(event_id, category_id, 1))
            .await
            .unwrap();
    let (ticket_id,): (Uuid,) = sqlx::query_as("SELECT id FROM tickets WHERE reservation_id = $1")
        .bind(reservation_id)
        .fetch_one(&pool)
        .await
        .unwrap();

    let assignment = lifecycle::TicketAssignment {
        email: "holder@example.com".to_string(),
        full_name: "Ticket Holder".to_string(),
        first_name: None,
        last_name: None,
        additional_fields: vec![("tshirt_size".to_string(), "M".to_string())],
    };
    lifecycle::assign_ticket(&deps, ticket_id, &assignment)
        .await
        .unwrap();

    let answers = |pool: PgPool, ticket_id: Uuid| async move {
        sqlx::query_as::<_, (String, String)>(
            "SELECT field_name, field_value FROM field_answers WHERE ticket_id = $1",
        )
        .bind(ticket_id)
        .fetch_all(&pool)
        .await
        .unwrap()
    };
    assert_eq!(
        answers(pool.clone(), ticket_id).await,
        vec![("tshirt_size".to_string(), "M".to_string())]
    );

    // re-assignment replaces, never accumulates
    let reassignment = lifecycle::TicketAssignment {
        additional_fields: vec![("tshirt_size".to_string(), "L".to_string())],
        ..assignment
    };
    lifecycle::assign_ticket(&deps, ticket_id, &reassignment)
        .await
        .unwrap();
    assert_eq!(
        answers(pool.clone(), ticket_id).await,
        vec![("tshirt_size".to_string(), "L".to_string())]
    );

    sqlx::query("UPDATE reservations SET valid_until = now() - interval '1 minute' WHERE id = $1")
        .bind(reservation_id)
        .execute(&pool)
        .await
        .unwrap();
    sweeper::cleanup_expired_reservations(&deps).await.unwrap();
    assert!(answers(pool.clone(), ticket_id).await.is_empty());
}
