//! Per-part offer selection.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::model::{ChoicePart, Selection};

/// One feasible (actual part, vendor part, price break) triple.
struct Candidate<'a> {
    total_cost: f64,
    order_quantity: u32,
    actual_index: usize,
    vendor_index: usize,
    price_break_index: usize,
    vendor_name: &'a str,
    vendor_part_name: &'a str,
    manufacturer_name: &'a str,
    manufacturer_part_name: &'a str,
    break_quantity: u32,
}

/// Cheapest first, then smallest order. Remaining ties are broken by name so
/// the result does not depend on the order offers were fetched in.
fn candidate_cmp(a: &Candidate, b: &Candidate) -> Ordering {
    a.total_cost
        .total_cmp(&b.total_cost)
        .then(a.order_quantity.cmp(&b.order_quantity))
        .then_with(|| a.vendor_name.cmp(b.vendor_name))
        .then_with(|| a.manufacturer_name.cmp(b.manufacturer_name))
        .then_with(|| a.manufacturer_part_name.cmp(b.manufacturer_part_name))
        .then_with(|| a.vendor_part_name.cmp(b.vendor_part_name))
        .then(a.break_quantity.cmp(&b.break_quantity))
}

impl ChoicePart {
    /// Select the cheapest feasible offer for `required_quantity`, ignoring
    /// vendors in `excluded` and offers without enough stock.
    ///
    /// Returns `true` when the part is missing, i.e. nothing feasible remains.
    /// A missing part has its selection cleared. A part nobody needs selects
    /// nothing and is not missing.
    pub fn select(&mut self, excluded: &BTreeSet<String>) -> bool {
        let needed = self.required_quantity;
        if needed == 0 {
            self.selection = None;
            return false;
        }

        let mut candidates = Vec::new();
        for (actual_index, actual_part) in self.actual_parts.iter().enumerate() {
            for (vendor_index, vendor_part) in actual_part.vendor_parts.iter().enumerate() {
                if excluded.contains(vendor_part.vendor_name.as_str()) {
                    continue;
                }
                for (price_break_index, price_break) in
                    vendor_part.price_breaks().iter().enumerate()
                {
                    let order_quantity = price_break.order_quantity(needed);
                    if vendor_part.quantity_available < order_quantity {
                        continue;
                    }
                    candidates.push(Candidate {
                        total_cost: price_break.total_cost(needed),
                        order_quantity,
                        actual_index,
                        vendor_index,
                        price_break_index,
                        vendor_name: &vendor_part.vendor_name,
                        vendor_part_name: &vendor_part.vendor_part_name,
                        manufacturer_name: &actual_part.manufacturer_name,
                        manufacturer_part_name: &actual_part.manufacturer_part_name,
                        break_quantity: price_break.quantity,
                    });
                }
            }
        }

        let selection = candidates
            .into_iter()
            .min_by(candidate_cmp)
            .map(|best| Selection {
                actual_index: best.actual_index,
                vendor_index: best.vendor_index,
                price_break_index: best.price_break_index,
                vendor_name: best.vendor_name.to_string(),
                order_quantity: best.order_quantity,
                total_cost: best.total_cost,
            });

        let missing = selection.is_none();
        if missing {
            log::debug!("No feasible offer for '{}' ({} needed)", self.name, needed);
        }
        self.selection = selection;
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActualPart, PriceBreak, VendorPart};
    use chrono::{DateTime, Utc};

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn offer(vendor: &str, part: &str, stock: u32, breaks: &[(u32, f64)]) -> VendorPart {
        let breaks = breaks
            .iter()
            .map(|&(q, p)| PriceBreak::new(q, p).unwrap())
            .collect();
        VendorPart::new(vendor, part, stock, breaks, now()).unwrap()
    }

    fn resistor(required: u32) -> ChoicePart {
        let mut actual = ActualPart::new("Yageo", "RC0603FR-0710KL");
        actual.vendor_parts = vec![
            offer(
                "Digi-Key",
                "311-10.0KHRCT-ND",
                10_000,
                &[(1, 0.10), (100, 0.03), (1000, 0.012)],
            ),
            offer(
                "Mouser",
                "603-RC0603FR-0710KL",
                10_000,
                &[(1, 0.11), (500, 0.025)],
            ),
        ];
        let mut choice = ChoicePart::new("10K;1608", "R_0603_1608Metric", "10K 1% resistor");
        choice.push_actual_part(actual).unwrap();
        choice.required_quantity = required;
        choice
    }

    #[test]
    fn test_select_prefers_larger_break_when_cheaper() {
        let mut choice = resistor(500);
        assert!(!choice.select(&BTreeSet::new()));

        let selection = choice.selection().unwrap();
        assert_eq!(selection.vendor_name, "Digi-Key");
        assert_eq!(selection.order_quantity, 1000);
        assert!((selection.total_cost - 12.0).abs() < 1e-9);
        assert_eq!(choice.selected_price_break().unwrap().quantity, 1000);
        assert_eq!(
            choice.selected_vendor_part().unwrap().vendor_part_name,
            "311-10.0KHRCT-ND"
        );
    }

    #[test]
    fn test_select_respects_exclusions() {
        let mut choice = resistor(500);
        let excluded = BTreeSet::from(["Digi-Key".to_string()]);
        assert!(!choice.select(&excluded));

        let selection = choice.selection().unwrap();
        assert_eq!(selection.vendor_name, "Mouser");
        assert_eq!(selection.order_quantity, 500);
        assert!((selection.total_cost - 12.5).abs() < 1e-9);
        // The exclusion set is left untouched.
        assert_eq!(excluded.len(), 1);
    }

    #[test]
    fn test_select_skips_breaks_beyond_stock() {
        let mut actual = ActualPart::new("TI", "LM358DR");
        actual.vendor_parts = vec![offer("Newark", "LM358DR", 150, &[(1, 0.50), (250, 0.20)])];
        let mut choice = ChoicePart::new("LM358;SOIC8", "SOIC-8", "Dual op-amp");
        choice.push_actual_part(actual).unwrap();
        choice.required_quantity = 100;

        assert!(!choice.select(&BTreeSet::new()));
        let selection = choice.selection().unwrap();
        assert_eq!(selection.order_quantity, 100);
        assert!((selection.total_cost - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_select_missing_clears_previous_selection() {
        let mut choice = resistor(500);
        assert!(!choice.select(&BTreeSet::new()));
        assert!(choice.selection().is_some());

        let excluded = BTreeSet::from(["Digi-Key".to_string(), "Mouser".to_string()]);
        assert!(choice.select(&excluded));
        assert!(choice.selection().is_none());
        assert_eq!(choice.selected_total_cost(), 0.0);
    }

    #[test]
    fn test_select_insufficient_stock_is_missing() {
        let mut choice = resistor(20_000);
        assert!(choice.select(&BTreeSet::new()));
    }

    #[test]
    fn test_select_without_demand_is_not_missing() {
        let mut choice = resistor(0);
        assert!(!choice.select(&BTreeSet::new()));
        assert!(choice.selection().is_none());
    }

    #[test]
    fn test_select_tie_break_is_independent_of_offer_order() {
        let build = |reverse: bool| {
            let mut offers = vec![
                offer("Mouser", "M-1", 1000, &[(1, 0.50)]),
                offer("Arrow", "A-1", 1000, &[(1, 0.50)]),
            ];
            if reverse {
                offers.reverse();
            }
            let mut actual = ActualPart::new("Nexperia", "BC847");
            actual.vendor_parts = offers;
            let mut choice = ChoicePart::new("BC847;SOT23", "SOT-23", "NPN");
            choice.push_actual_part(actual).unwrap();
            choice.required_quantity = 10;
            choice
        };

        for reverse in [false, true] {
            let mut choice = build(reverse);
            choice.select(&BTreeSet::new());
            assert_eq!(choice.selected_vendor_name(), Some("Arrow"));
        }
    }

    #[test]
    fn test_select_is_globally_minimal() {
        let mut choice = resistor(350);
        choice.select(&BTreeSet::new());
        let chosen = choice.selected_total_cost();

        // Brute force every feasible triple and check nothing is cheaper.
        for actual in choice.actual_parts() {
            for vp in &actual.vendor_parts {
                for pb in vp.price_breaks() {
                    if vp.quantity_available >= pb.order_quantity(350) {
                        assert!(chosen <= pb.total_cost(350) + 1e-12);
                    }
                }
            }
        }
    }
}
