//! The reservation engine: allocation, pricing, lifecycle transitions,
//! offline settlement, reclamation and the audit trail.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Settings;
use crate::external::{HookDispatcher, NotificationSink, SequenceProvider};
use crate::payment::PaymentGateway;

pub mod allocator;
pub mod audit;
pub mod lifecycle;
pub mod offline;
pub mod pricing;
pub mod sweeper;

/// Everything the engine needs besides the database: collaborators are
/// trait objects so tests and local runs can swap in inert implementations.
#[derive(Clone)]
pub struct EngineDeps {
    pub pool: PgPool,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifications: Arc<dyn NotificationSink>,
    pub hooks: Arc<dyn HookDispatcher>,
    pub sequences: Arc<dyn SequenceProvider>,
    pub settings: Settings,
}
