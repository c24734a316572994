//! Contracts for the engine's external collaborators.
//!
//! The engine never formats email bodies, dispatches plugin callbacks or
//! owns invoice-number formatting; it only needs these narrow interfaces.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Outbound notification: a named template key plus a JSON model. Rendering
/// and delivery are somebody else's problem.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(
        &self,
        event_id: Uuid,
        to_address: &str,
        template: &str,
        model: serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Hook notification points for plugins/extensions. Fire-and-forget: a
/// failing hook is logged by the caller and never rolls back the engine's
/// unit of work.
#[async_trait]
pub trait HookDispatcher: Send + Sync {
    async fn reservation_confirmed(&self, event_id: Uuid, reservation_id: Uuid)
        -> anyhow::Result<()>;
    async fn ticket_assigned(&self, event_id: Uuid, ticket_id: Uuid) -> anyhow::Result<()>;
    async fn reservations_expired(
        &self,
        event_id: Uuid,
        reservation_ids: &[Uuid],
    ) -> anyhow::Result<()>;
    async fn reservations_cancelled(
        &self,
        event_id: Uuid,
        reservation_ids: &[Uuid],
    ) -> anyhow::Result<()>;
    async fn stuck_reservations(
        &self,
        event_id: Uuid,
        reservation_ids: &[Uuid],
    ) -> anyhow::Result<()>;
}

/// Atomic, monotonic per-organization counter (invoice numbering).
#[async_trait]
pub trait SequenceProvider: Send + Sync {
    async fn lock_and_increment(&self, organization_id: Uuid) -> anyhow::Result<i64>;
}

/// Sequence provider backed by the `invoice_sequences` table: the row is
/// locked for the duration of the increment, so concurrent confirmations of
/// the same organization serialize.
pub struct PgSequenceProvider {
    pool: PgPool,
}

impl PgSequenceProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SequenceProvider for PgSequenceProvider {
    async fn lock_and_increment(&self, organization_id: Uuid) -> anyhow::Result<i64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO invoice_sequences (organization_id) VALUES ($1)
             ON CONFLICT (organization_id) DO NOTHING",
        )
        .bind(organization_id)
        .execute(&mut *tx)
        .await?;
        let (value,): (i64,) = sqlx::query_as(
            "UPDATE invoice_sequences SET next_value = next_value + 1
             WHERE organization_id = $1
             RETURNING next_value - 1",
        )
        .bind(organization_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(value)
    }
}

/// Default sink for local runs: logs instead of delivering.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn send(
        &self,
        event_id: Uuid,
        to_address: &str,
        template: &str,
        _model: serde_json::Value,
    ) -> anyhow::Result<()> {
        tracing::info!(%event_id, to = %to_address, template, "notification (log sink)");
        Ok(())
    }
}

/// Default dispatcher for local runs: logs every hook.
pub struct LogHookDispatcher;

#[async_trait]
impl HookDispatcher for LogHookDispatcher {
    async fn reservation_confirmed(
        &self,
        event_id: Uuid,
        reservation_id: Uuid,
    ) -> anyhow::Result<()> {
        tracing::info!(%event_id, %reservation_id, "hook: reservation confirmed");
        Ok(())
    }

    async fn ticket_assigned(&self, event_id: Uuid, ticket_id: Uuid) -> anyhow::Result<()> {
        tracing::info!(%event_id, %ticket_id, "hook: ticket assigned");
        Ok(())
    }

    async fn reservations_expired(
        &self,
        event_id: Uuid,
        reservation_ids: &[Uuid],
    ) -> anyhow::Result<()> {
        tracing::info!(%event_id, count = reservation_ids.len(), "hook: reservations expired");
        Ok(())
    }

    async fn reservations_cancelled(
        &self,
        event_id: Uuid,
        reservation_ids: &[Uuid],
    ) -> anyhow::Result<()> {
        tracing::info!(%event_id, count = reservation_ids.len(), "hook: reservations cancelled");
        Ok(())
    }

    async fn stuck_reservations(
        &self,
        event_id: Uuid,
        reservation_ids: &[Uuid],
    ) -> anyhow::Result<()> {
        tracing::warn!(%event_id, count = reservation_ids.len(), "hook: stuck reservations");
        Ok(())
    }
}
