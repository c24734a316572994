use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel transaction id for settlements that did not go through an online
/// gateway (deferred or zero-cost reservations).
pub const NOT_YET_PAID_TRANSACTION_ID: &str = "not-paid";

/// Closed set of payment channels. Every branch is matched exhaustively;
/// there is no runtime default case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentProxy {
    Stripe,
    Paypal,
    Offline,
    OnSite,
    None,
    Admin,
}

impl PaymentProxy {
    pub fn key(&self) -> &'static str {
        match self {
            PaymentProxy::Stripe => "STRIPE",
            PaymentProxy::Paypal => "PAYPAL",
            PaymentProxy::Offline => "OFFLINE",
            PaymentProxy::OnSite => "ON_SITE",
            PaymentProxy::None => "NONE",
            PaymentProxy::Admin => "ADMIN",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "STRIPE" => Some(PaymentProxy::Stripe),
            "PAYPAL" => Some(PaymentProxy::Paypal),
            "OFFLINE" => Some(PaymentProxy::Offline),
            "ON_SITE" => Some(PaymentProxy::OnSite),
            "NONE" => Some(PaymentProxy::None),
            "ADMIN" => Some(PaymentProxy::Admin),
            _ => Option::None,
        }
    }

    /// Whether confirmation must flag the reservation IN_PAYMENT in its own
    /// unit of work before calling the gateway.
    pub fn requires_payment_marker(&self) -> bool {
        matches!(self, PaymentProxy::Stripe)
    }

    /// Whether settlement happens through an online gateway at confirm time.
    pub fn is_online_gateway(&self) -> bool {
        matches!(self, PaymentProxy::Stripe | PaymentProxy::Paypal)
    }

    /// Payment is collected at the venue desk: tickets stay TO_BE_PAID.
    pub fn desk_payment_required(&self) -> bool {
        matches!(self, PaymentProxy::OnSite)
    }
}

/// Pick the channel to settle a reservation: explicit request wins, a
/// zero-cost reservation needs no payment, everything else defaults to the
/// online gateway.
pub fn evaluate_payment_proxy(requested: Option<PaymentProxy>, price_with_vat: i64) -> PaymentProxy {
    if let Some(proxy) = requested {
        return proxy;
    }
    if price_with_vat == 0 {
        return PaymentProxy::None;
    }
    PaymentProxy::Stripe
}

/// Outcome of a single confirmation attempt as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentResult {
    Successful { gateway_transaction_id: String },
    Unsuccessful { reason: String },
}

impl PaymentResult {
    pub fn successful(gateway_transaction_id: impl Into<String>) -> Self {
        PaymentResult::Successful {
            gateway_transaction_id: gateway_transaction_id.into(),
        }
    }

    pub fn unsuccessful(reason: impl Into<String>) -> Self {
        PaymentResult::Unsuccessful {
            reason: reason.into(),
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, PaymentResult::Successful { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub reservation_id: Uuid,
    pub gateway_token: String,
    pub amount_cts: i64,
    pub currency: String,
    pub customer_email: String,
    pub customer_name: String,
}

/// Gateway verdict for one charge attempt. A decline is a value; only local
/// infrastructure faults surface as errors.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Approved { transaction_id: String },
    Declined { reason: String },
}

/// External payment gateway. The wire format is not the engine's concern:
/// a charge either yields a transaction id or a decline reason.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: ChargeRequest) -> anyhow::Result<ChargeOutcome>;
}

/// Gateway used for deferred proxies and local runs: approves everything.
pub struct AutoApproveGateway;

#[async_trait]
impl PaymentGateway for AutoApproveGateway {
    async fn charge(&self, request: ChargeRequest) -> anyhow::Result<ChargeOutcome> {
        tracing::info!(
            reservation_id = %request.reservation_id,
            amount_cts = request.amount_cts,
            "auto-approving charge (no gateway configured)"
        );
        Ok(ChargeOutcome::Approved {
            transaction_id: format!("auto-{}", request.reservation_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_proxy_wins() {
        assert_eq!(
            evaluate_payment_proxy(Some(PaymentProxy::Offline), 1000),
            PaymentProxy::Offline
        );
    }

    #[test]
    fn test_zero_total_resolves_to_none() {
        assert_eq!(evaluate_payment_proxy(Option::None, 0), PaymentProxy::None);
    }

    #[test]
    fn test_default_proxy_is_the_online_gateway() {
        assert_eq!(evaluate_payment_proxy(Option::None, 2500), PaymentProxy::Stripe);
    }

    #[test]
    fn test_proxy_keys_round_trip() {
        for proxy in [
            PaymentProxy::Stripe,
            PaymentProxy::Paypal,
            PaymentProxy::Offline,
            PaymentProxy::OnSite,
            PaymentProxy::None,
            PaymentProxy::Admin,
        ] {
            assert_eq!(PaymentProxy::from_key(proxy.key()), Some(proxy));
        }
    }

    #[test]
    fn test_only_on_site_defers_to_the_desk() {
        assert!(PaymentProxy::OnSite.desk_payment_required());
        assert!(!PaymentProxy::Stripe.desk_payment_required());
        assert!(!PaymentProxy::Offline.desk_payment_required());
    }
}
