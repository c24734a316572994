//! Price, VAT and discount computation. Pure integer arithmetic over minor
//! units: the same inputs always reproduce bit-identical totals, so the
//! amounts computed at creation time match the ones at confirmation time.

use serde::Serialize;
use uuid::Uuid;

use crate::models::event::VatPolicy;
use crate::models::promo_code::{DiscountType, PromoCode};

/// Integer division rounding half-up, exact for the cent ranges we handle.
fn round_div(numerator: i128, denominator: i128) -> i64 {
    ((numerator + denominator / 2) / denominator) as i64
}

/// VAT portion contained in a gross amount (VAT-inclusive pricing).
pub fn vat_from_inclusive(gross_cts: i64, vat_rate_bp: i64) -> i64 {
    let net = round_div(gross_cts as i128 * 10_000, 10_000 + vat_rate_bp as i128);
    gross_cts - net
}

/// VAT to add on top of a net amount (VAT-exclusive pricing).
pub fn vat_on(net_cts: i64, vat_rate_bp: i64) -> i64 {
    round_div(net_cts as i128 * vat_rate_bp as i128, 10_000)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedDiscount {
    pub discount_type: DiscountType,
    /// Percentage points or minor units, depending on the type.
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitPrice {
    pub src_cts: i64,
    pub final_cts: i64,
    pub vat_cts: i64,
    pub discount_cts: i64,
}

/// Price one ticket or add-on unit.
pub fn price_unit(
    src_cts: i64,
    vat_rate_bp: i64,
    policy: VatPolicy,
    discount: Option<AppliedDiscount>,
) -> UnitPrice {
    let discount_cts = match discount {
        Some(AppliedDiscount {
            discount_type: DiscountType::Percentage,
            amount,
        }) => round_div(src_cts as i128 * amount as i128, 100),
        Some(AppliedDiscount {
            discount_type: DiscountType::FixedAmount,
            amount,
        }) => amount.min(src_cts),
        None => 0,
    };
    let discounted = src_cts - discount_cts;
    let (final_cts, vat_cts) = match policy {
        VatPolicy::Included => (discounted, vat_from_inclusive(discounted, vat_rate_bp)),
        VatPolicy::NotIncluded => {
            let vat = vat_on(discounted, vat_rate_bp);
            (discounted + vat, vat)
        }
        VatPolicy::None => (discounted, 0),
    };
    UnitPrice {
        src_cts,
        final_cts,
        vat_cts,
        discount_cts,
    }
}

/// Unit price with the contained VAT stripped out, for summary display.
pub fn price_before_vat(src_cts: i64, vat_rate_bp: i64, policy: VatPolicy) -> i64 {
    match policy {
        VatPolicy::Included => src_cts - vat_from_inclusive(src_cts, vat_rate_bp),
        VatPolicy::NotIncluded | VatPolicy::None => src_cts,
    }
}

/// A ticket as seen by the pricing engine.
#[derive(Debug, Clone)]
pub struct TicketLine {
    pub category_id: Uuid,
    pub category_name: String,
    pub src_price_cts: i64,
}

/// An add-on unit as seen by the pricing engine. Promotional discounts do
/// not apply to add-ons.
#[derive(Debug, Clone)]
pub struct ItemLine {
    pub service_id: Uuid,
    pub service_name: String,
    pub src_price_cts: i64,
}

/// Decide which units a discount applies to.
///
/// A percentage rebate applies to every eligible unit; a fixed-amount rebate
/// is granted once per reservation, so it lands on the first eligible unit
/// only. Ticket order must be stable between creation and confirmation for
/// the plan to be reproducible.
pub fn discount_plan(
    promo: Option<&PromoCode>,
    tickets: &[TicketLine],
) -> Vec<Option<AppliedDiscount>> {
    let Some(promo) = promo else {
        return vec![None; tickets.len()];
    };
    let applied = AppliedDiscount {
        discount_type: promo.discount_type,
        amount: promo.discount_amount,
    };
    let mut fixed_spent = false;
    tickets
        .iter()
        .map(|t| {
            if !promo.applies_to(t.category_id) {
                return None;
            }
            match promo.discount_type {
                DiscountType::Percentage => Some(applied),
                DiscountType::FixedAmount => {
                    if fixed_spent {
                        None
                    } else {
                        fixed_spent = true;
                        Some(applied)
                    }
                }
            }
        })
        .collect()
}

/// Reservation-level totals. Derived, never authoritative when persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TotalPrice {
    pub price_with_vat_cts: i64,
    pub vat_cts: i64,
    /// Negative amount, zero when no discount applied.
    pub discount_cts: i64,
    pub discount_applied_count: i64,
}

pub fn compute_totals(
    policy: VatPolicy,
    vat_rate_bp: i64,
    tickets: &[TicketLine],
    items: &[ItemLine],
    promo: Option<&PromoCode>,
) -> TotalPrice {
    let plan = discount_plan(promo, tickets);
    let mut total = 0i64;
    let mut vat = 0i64;
    let mut discount = 0i64;
    let mut applied = 0i64;
    for (ticket, slot) in tickets.iter().zip(plan) {
        let price = price_unit(ticket.src_price_cts, vat_rate_bp, policy, slot);
        total += price.final_cts;
        vat += price.vat_cts;
        discount += price.discount_cts;
        if price.discount_cts > 0 {
            applied += 1;
        }
    }
    for item in items {
        let price = price_unit(item.src_price_cts, vat_rate_bp, policy, None);
        total += price.final_cts;
        vat += price.vat_cts;
    }
    TotalPrice {
        price_with_vat_cts: total,
        vat_cts: vat,
        discount_cts: -discount,
        discount_applied_count: applied,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SummaryRowType {
    Ticket,
    AdditionalService,
    PromotionCode,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub name: String,
    pub unit_price_cts: i64,
    pub unit_price_before_vat_cts: i64,
    pub count: i64,
    pub subtotal_cts: i64,
    pub subtotal_before_vat_cts: i64,
    pub row_type: SummaryRowType,
}

/// Printable order summary: tickets grouped by category, add-ons grouped by
/// service, and one synthetic negative row when a discount applies.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub total: TotalPrice,
    pub rows: Vec<SummaryRow>,
    pub free: bool,
    pub vat_rate_bp: i64,
    pub vat_policy: VatPolicy,
}

pub fn build_summary(
    policy: VatPolicy,
    vat_rate_bp: i64,
    tickets: &[TicketLine],
    items: &[ItemLine],
    promo: Option<&PromoCode>,
) -> OrderSummary {
    let total = compute_totals(policy, vat_rate_bp, tickets, items, promo);
    let mut rows = Vec::new();

    let mut category_order: Vec<Uuid> = Vec::new();
    for ticket in tickets {
        if !category_order.contains(&ticket.category_id) {
            category_order.push(ticket.category_id);
        }
    }
    for category_id in category_order {
        let group: Vec<&TicketLine> = tickets
            .iter()
            .filter(|t| t.category_id == category_id)
            .collect();
        let unit = group[0].src_price_cts;
        let unit_before_vat = price_before_vat(unit, vat_rate_bp, policy);
        let subtotal: i64 = group.iter().map(|t| t.src_price_cts).sum();
        let subtotal_before_vat: i64 = group
            .iter()
            .map(|t| price_before_vat(t.src_price_cts, vat_rate_bp, policy))
            .sum();
        rows.push(SummaryRow {
            name: group[0].category_name.clone(),
            unit_price_cts: unit,
            unit_price_before_vat_cts: unit_before_vat,
            count: group.len() as i64,
            subtotal_cts: subtotal,
            subtotal_before_vat_cts: subtotal_before_vat,
            row_type: SummaryRowType::Ticket,
        });
    }

    let mut service_order: Vec<Uuid> = Vec::new();
    for item in items {
        if !service_order.contains(&item.service_id) {
            service_order.push(item.service_id);
        }
    }
    for service_id in service_order {
        let group: Vec<&ItemLine> = items.iter().filter(|i| i.service_id == service_id).collect();
        let unit = group[0].src_price_cts;
        let subtotal: i64 = group.iter().map(|i| i.src_price_cts).sum();
        rows.push(SummaryRow {
            name: group[0].service_name.clone(),
            unit_price_cts: unit,
            unit_price_before_vat_cts: price_before_vat(unit, vat_rate_bp, policy),
            count: group.len() as i64,
            subtotal_cts: subtotal,
            subtotal_before_vat_cts: group
                .iter()
                .map(|i| price_before_vat(i.src_price_cts, vat_rate_bp, policy))
                .sum(),
            row_type: SummaryRowType::AdditionalService,
        });
    }

    if let Some(promo) = promo {
        if total.discount_cts != 0 {
            let unit = match promo.discount_type {
                DiscountType::Percentage => total.discount_cts / total.discount_applied_count.max(1),
                DiscountType::FixedAmount => -promo.discount_amount,
            };
            rows.push(SummaryRow {
                name: promo.code.clone(),
                unit_price_cts: unit,
                unit_price_before_vat_cts: unit,
                count: total.discount_applied_count,
                subtotal_cts: total.discount_cts,
                subtotal_before_vat_cts: total.discount_cts,
                row_type: SummaryRowType::PromotionCode,
            });
        }
    }

    OrderSummary {
        free: total.price_with_vat_cts == 0,
        total,
        rows,
        vat_rate_bp,
        vat_policy: policy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn promo(discount_type: DiscountType, amount: i64, categories: Vec<Uuid>) -> PromoCode {
        PromoCode {
            id: Uuid::new_v4(),
            code: "SUMMER".to_string(),
            event_id: None,
            organization_id: None,
            discount_type,
            discount_amount: amount,
            categories,
            created_at: Utc::now(),
        }
    }

    fn line(category_id: Uuid, src: i64) -> TicketLine {
        TicketLine {
            category_id,
            category_name: "General".to_string(),
            src_price_cts: src,
        }
    }

    #[test]
    fn test_vat_excluded_is_added_on_top() {
        let price = price_unit(10_000, 2100, VatPolicy::NotIncluded, None);
        assert_eq!(price.vat_cts, 2_100);
        assert_eq!(price.final_cts, 12_100);
        assert_eq!(price.discount_cts, 0);
    }

    #[test]
    fn test_vat_included_is_extracted() {
        let price = price_unit(12_100, 2100, VatPolicy::Included, None);
        assert_eq!(price.final_cts, 12_100);
        assert_eq!(price.vat_cts, 2_100);
    }

    #[test]
    fn test_no_vat_policy_skips_vat() {
        let price = price_unit(10_000, 2100, VatPolicy::None, None);
        assert_eq!(price.vat_cts, 0);
        assert_eq!(price.final_cts, 10_000);
    }

    #[test]
    fn test_percentage_discount_applies_per_unit() {
        let category = Uuid::new_v4();
        let code = promo(DiscountType::Percentage, 10, vec![]);
        let tickets = vec![line(category, 1_000), line(category, 1_000), line(category, 1_000)];
        let total = compute_totals(VatPolicy::None, 0, &tickets, &[], Some(&code));
        assert_eq!(total.discount_cts, -300);
        assert_eq!(total.discount_applied_count, 3);
        assert_eq!(total.price_with_vat_cts, 2_700);
    }

    #[test]
    fn test_fixed_discount_is_granted_once_per_reservation() {
        let category = Uuid::new_v4();
        let code = promo(DiscountType::FixedAmount, 500, vec![]);
        let tickets = vec![line(category, 1_000), line(category, 1_000), line(category, 1_000)];
        let total = compute_totals(VatPolicy::None, 0, &tickets, &[], Some(&code));
        assert_eq!(total.discount_cts, -500);
        assert_eq!(total.discount_applied_count, 1);
        assert_eq!(total.price_with_vat_cts, 2_500);
    }

    #[test]
    fn test_discount_respects_eligible_categories() {
        let eligible = Uuid::new_v4();
        let other = Uuid::new_v4();
        let code = promo(DiscountType::Percentage, 50, vec![eligible]);
        let tickets = vec![line(eligible, 1_000), line(other, 1_000)];
        let total = compute_totals(VatPolicy::None, 0, &tickets, &[], Some(&code));
        assert_eq!(total.discount_cts, -500);
        assert_eq!(total.discount_applied_count, 1);
    }

    #[test]
    fn test_discounts_never_touch_add_ons() {
        let code = promo(DiscountType::Percentage, 50, vec![]);
        let items = vec![ItemLine {
            service_id: Uuid::new_v4(),
            service_name: "Parking".to_string(),
            src_price_cts: 2_000,
        }];
        let total = compute_totals(VatPolicy::None, 0, &[], &items, Some(&code));
        assert_eq!(total.discount_cts, 0);
        assert_eq!(total.price_with_vat_cts, 2_000);
    }

    #[test]
    fn test_pricing_is_deterministic() {
        let category = Uuid::new_v4();
        let code = promo(DiscountType::Percentage, 17, vec![]);
        let tickets = vec![line(category, 3_333), line(category, 6_667)];
        let first = compute_totals(VatPolicy::Included, 770, &tickets, &[], Some(&code));
        let second = compute_totals(VatPolicy::Included, 770, &tickets, &[], Some(&code));
        assert_eq!(first, second);
    }

    #[test]
    fn test_fixed_discount_never_exceeds_unit_price() {
        let price = price_unit(
            300,
            0,
            VatPolicy::None,
            Some(AppliedDiscount {
                discount_type: DiscountType::FixedAmount,
                amount: 500,
            }),
        );
        assert_eq!(price.discount_cts, 300);
        assert_eq!(price.final_cts, 0);
    }

    #[test]
    fn test_summary_groups_by_category_and_appends_promo_row() {
        let category = Uuid::new_v4();
        let code = promo(DiscountType::FixedAmount, 500, vec![]);
        let tickets = vec![line(category, 1_000), line(category, 1_000)];
        let summary = build_summary(VatPolicy::None, 0, &tickets, &[], Some(&code));
        assert_eq!(summary.rows.len(), 2);
        let ticket_row = &summary.rows[0];
        assert_eq!(ticket_row.count, 2);
        assert_eq!(ticket_row.subtotal_cts, 2_000);
        let promo_row = &summary.rows[1];
        assert_eq!(promo_row.row_type, SummaryRowType::PromotionCode);
        assert_eq!(promo_row.subtotal_cts, -500);
        assert_eq!(promo_row.count, 1);
        assert!(!summary.free);
    }

    #[test]
    fn test_zero_total_is_marked_free() {
        let category = Uuid::new_v4();
        let summary = build_summary(VatPolicy::None, 0, &[line(category, 0)], &[], None);
        assert!(summary.free);
        assert_eq!(summary.total.price_with_vat_cts, 0);
    }

    #[test]
    fn test_included_vat_rows_expose_net_unit_price() {
        let category = Uuid::new_v4();
        let summary = build_summary(VatPolicy::Included, 2100, &[line(category, 12_100)], &[], None);
        let row = &summary.rows[0];
        assert_eq!(row.unit_price_cts, 12_100);
        assert_eq!(row.unit_price_before_vat_cts, 10_000);
    }
}
