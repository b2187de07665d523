// ===============================
// src/estimate.rs
// ===============================
use crate::config::CostPolicy;
use crate::domain::{round2, SourceType, SourcingMatch, SourcingRecommendation};

/// Cost and carbon annotation. Pure: same match + policy, same numbers.
pub fn annotate(m: SourcingMatch, cost: &CostPolicy) -> SourcingRecommendation {
    let (source_type, multiplier) = if m.source.is_fallback() {
        (SourceType::ExternalVendor, cost.fallback_multiplier)
    } else {
        (SourceType::InternalStore, cost.internal_multiplier)
    };
    let carbon = cost.emission_factor * m.distance_km.max(0.0) * m.suggested_quantity as f64;

    SourcingRecommendation {
        product: m.product,
        needy_store: m.needy_store,
        source: m.source,
        distance_km: m.distance_km,
        deficit: m.deficit,
        source_stock: m.source_stock,
        suggested_quantity: m.suggested_quantity,
        carbon_impact: round2(carbon),
        cost_multiplier: multiplier,
        source_type,
        adjusted_unit_cost: round2(cost.base_unit_cost * multiplier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Source, SourceStock};

    fn sample(source: Source, distance_km: f64, qty: u64) -> SourcingMatch {
        SourcingMatch {
            product: "X".into(),
            needy_store: "B".into(),
            source_stock: if source.is_fallback() { SourceStock::Unlimited } else { SourceStock::Units(500) },
            source,
            distance_km,
            deficit: qty,
            suggested_quantity: qty,
        }
    }

    #[test]
    fn internal_transfer_costs_base_price() {
        let r = annotate(sample(Source::Store("A".into()), 12.345, 70), &CostPolicy::default());
        assert_eq!(r.source_type, SourceType::InternalStore);
        assert_eq!(r.cost_multiplier, 1.0);
        assert_eq!(r.adjusted_unit_cost, 50.0);
        // 0.3 * 12.345 * 70 = 259.245
        assert!((r.carbon_impact - 259.25).abs() < 0.011);
    }

    #[test]
    fn fallback_vendor_costs_ten_percent_more() {
        let r = annotate(sample(Source::FallbackVendor, 100.0, 70), &CostPolicy::default());
        assert_eq!(r.source_type, SourceType::ExternalVendor);
        assert_eq!(r.cost_multiplier, 1.10);
        assert_eq!(r.adjusted_unit_cost, 55.0);
        assert_eq!(r.carbon_impact, 2100.0);
    }

    #[test]
    fn policy_values_are_honoured() {
        let cost = CostPolicy { emission_factor: 1.0, base_unit_cost: 10.0, internal_multiplier: 1.0, fallback_multiplier: 2.0 };
        let r = annotate(sample(Source::FallbackVendor, 3.0, 2), &cost);
        assert_eq!(r.carbon_impact, 6.0);
        assert_eq!(r.adjusted_unit_cost, 20.0);
    }

    #[test]
    fn zero_distance_means_zero_carbon() {
        let r = annotate(sample(Source::Store("A".into()), 0.0, 40), &CostPolicy::default());
        assert_eq!(r.carbon_impact, 0.0);
    }
}
