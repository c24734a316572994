//! Scoped runtime settings: organization → event → category, most specific
//! wins. Values live in the `settings` table; string overrides can be layered
//! on top for tests and local runs.

use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

pub const OFFLINE_PAYMENT_DAYS: &str = "OFFLINE_PAYMENT_DAYS";
pub const OFFLINE_REMINDER_HOURS: &str = "OFFLINE_REMINDER_HOURS";
pub const RESERVATION_TIMEOUT_MINUTES: &str = "RESERVATION_TIMEOUT_MINUTES";
pub const INVOICE_NUMBER_PATTERN: &str = "INVOICE_NUMBER_PATTERN";
pub const MAX_TICKETS_PER_RESERVATION: &str = "MAX_TICKETS_PER_RESERVATION";

pub const DEFAULT_OFFLINE_PAYMENT_DAYS: i64 = 5;
pub const DEFAULT_OFFLINE_REMINDER_HOURS: i64 = 24;
pub const DEFAULT_RESERVATION_TIMEOUT_MINUTES: i64 = 25;
pub const DEFAULT_MAX_TICKETS_PER_RESERVATION: i64 = 5;

/// Lookup scope. Unset levels simply don't participate in the resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigScope {
    pub organization_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
}

impl ConfigScope {
    pub fn event(organization_id: Uuid, event_id: Uuid) -> Self {
        Self {
            organization_id: Some(organization_id),
            event_id: Some(event_id),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct Settings {
    pool: Option<PgPool>,
    overrides: HashMap<String, String>,
}

impl Settings {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Some(pool),
            overrides: HashMap::new(),
        }
    }

    /// Settings resolved from the given map only. Used in tests and anywhere
    /// a database is not available.
    pub fn fixed(overrides: HashMap<String, String>) -> Self {
        Self {
            pool: None,
            overrides,
        }
    }

    async fn resolve(&self, scope: ConfigScope, key: &str) -> Option<String> {
        if let Some(value) = self.overrides.get(key) {
            return Some(value.clone());
        }
        let pool = self.pool.as_ref()?;
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM settings
             WHERE key = $1
               AND (organization_id IS NULL OR organization_id = $2)
               AND (event_id IS NULL OR event_id = $3)
               AND (category_id IS NULL OR category_id = $4)
             ORDER BY (category_id IS NOT NULL) DESC,
                      (event_id IS NOT NULL) DESC,
                      (organization_id IS NOT NULL) DESC
             LIMIT 1",
        )
        .bind(key)
        .bind(scope.organization_id)
        .bind(scope.event_id)
        .bind(scope.category_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            tracing::warn!(key, error = ?e, "settings lookup failed, using default");
            e
        })
        .ok()
        .flatten();
        row.map(|(value,)| value)
    }

    pub async fn get_int(&self, scope: ConfigScope, key: &str, default: i64) -> i64 {
        match self.resolve(scope, key).await {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(key, raw, "setting is not an integer, using default");
                default
            }),
            None => default,
        }
    }

    pub async fn get_bool(&self, scope: ConfigScope, key: &str, default: bool) -> bool {
        match self.resolve(scope, key).await {
            Some(raw) => matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
            None => default,
        }
    }

    pub async fn get_string(&self, scope: ConfigScope, key: &str) -> Option<String> {
        self.resolve(scope, key).await
    }
}
