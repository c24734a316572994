use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::with_security_headers;
use crate::engine::EngineDeps;
use crate::handlers::{
    assign_ticket, cancel_reservation, confirm_offline_payment, confirm_reservation,
    create_reservation, get_reservation, health_check, pending_payments_count, renew_access_token,
};

pub fn create_routes(deps: EngineDeps) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/reservations", post(create_reservation))
        .route(
            "/reservations/:id",
            get(get_reservation).delete(cancel_reservation),
        )
        .route("/reservations/:id/confirm", post(confirm_reservation))
        .route("/tickets/:id/assign", post(assign_ticket))
        .route("/access-tokens/:code/renew", post(renew_access_token))
        .route(
            "/admin/reservations/:id/confirm-offline",
            post(confirm_offline_payment),
        )
        .route(
            "/admin/events/:id/pending-payments-count",
            get(pending_payments_count),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(deps);
    with_security_headers(router)
}
