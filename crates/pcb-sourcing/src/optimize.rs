//! Vendor-set reduction.
//!
//! Buying every part from whichever vendor is cheapest tends to spread an
//! order over many vendors, and each extra vendor costs a shipment. The
//! optimizer greedily excludes vendors whose savings do not cover that cost,
//! one per round, without ever making a part unobtainable. It is a heuristic:
//! a round never revisits an earlier exclusion.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::config::SourcingConfig;
use crate::model::ChoicePart;

/// Outcome of selecting every part under one exclusion set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quad {
    pub missing_count: usize,
    pub total_cost: f64,
    pub vendor_priority: u32,
    /// The vendor excluded for this trial; `None` for the baseline.
    pub vendor_name: Option<String>,
}

/// First auto-assigned priority; the seeded table uses 0-9 and 1000+.
pub const FIRST_ASSIGNED_PRIORITY: u32 = 10;

/// Exclusion tie-break order: lower priorities are dropped first.
#[derive(Debug, Clone)]
pub struct VendorPriorities {
    table: BTreeMap<String, u32>,
    next: u32,
}

impl VendorPriorities {
    pub fn new(table: BTreeMap<String, u32>) -> Self {
        Self {
            table,
            next: FIRST_ASSIGNED_PRIORITY,
        }
    }

    /// Priority of `vendor_name`, assigning the next free one on first sight.
    pub fn priority(&mut self, vendor_name: &str) -> u32 {
        if let Some(&priority) = self.table.get(vendor_name) {
            return priority;
        }
        let priority = self.next;
        self.next += 1;
        self.table.insert(vendor_name.to_string(), priority);
        priority
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Dropping the vendor did not change the order total.
    NoSavings,
    /// The vendor saves less than one shipment costs.
    BelowShippingThreshold { savings: f64 },
    /// The parts bought from the vendor do not reach its minimum order.
    BelowMinimum { order_total: f64, minimum: f64 },
    /// Not on the configured vendor allowlist.
    NotSelected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    pub vendor_name: String,
    pub reason: ExclusionReason,
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Excluding '{}': ", self.vendor_name)?;
        match &self.reason {
            ExclusionReason::NoSavings => write!(f, "saves nothing"),
            ExclusionReason::BelowShippingThreshold { savings } => {
                write!(f, "only saves {savings:.2}")
            }
            ExclusionReason::BelowMinimum {
                order_total,
                minimum,
            } => write!(f, "needed order {order_total:.2} < minimum order {minimum:.2}"),
            ExclusionReason::NotSelected => write!(f, "not in selected vendors"),
        }
    }
}

/// Every vendor offering any candidate of any part, minus `excluded`.
pub fn vendor_names(parts: &[ChoicePart], excluded: &BTreeSet<String>) -> BTreeSet<String> {
    parts
        .iter()
        .flat_map(|part| part.vendor_names())
        .filter(|name| !excluded.contains(*name))
        .map(str::to_string)
        .collect()
}

pub struct Optimizer {
    shipping_threshold: f64,
    pinned_vendors: BTreeSet<String>,
    vendor_minimums: BTreeMap<String, f64>,
    selected_vendor_names: Option<BTreeSet<String>>,
    priorities: VendorPriorities,
}

impl Optimizer {
    pub fn new(config: &SourcingConfig) -> Self {
        Self {
            shipping_threshold: config.shipping_threshold,
            pinned_vendors: config.pinned_vendors.clone(),
            vendor_minimums: config.vendor_minimums.clone(),
            selected_vendor_names: config.selected_vendor_names.clone(),
            priorities: VendorPriorities::new(config.vendor_priorities.clone()),
        }
    }

    /// Select every part with `excluded` applied and total up the result.
    /// `candidate` is the vendor this trial excludes, if any.
    pub fn quad_compute(
        &mut self,
        parts: &mut [ChoicePart],
        excluded: &BTreeSet<String>,
        candidate: Option<&str>,
    ) -> Quad {
        let mut missing_count = 0;
        let mut total_cost = 0.0;
        for part in parts.iter_mut() {
            if part.select(excluded) {
                missing_count += 1;
            }
            total_cost += part.selected_total_cost();
        }
        Quad {
            missing_count,
            total_cost,
            vendor_priority: candidate.map_or(0, |name| self.priorities.priority(name)),
            vendor_name: candidate.map(str::to_string),
        }
    }

    /// Grow `excluded` and return what was excluded and why.
    ///
    /// With a vendor allowlist configured only the allowlist is applied.
    /// Otherwise minimum-order exclusions run first, then the shipping-cost
    /// loop.
    pub fn run(&mut self, parts: &mut [ChoicePart], excluded: &mut BTreeSet<String>) -> Vec<Exclusion> {
        let mut exclusions = Vec::new();
        if let Some(selected) = self.selected_vendor_names.clone() {
            apply_vendor_selection(parts, &selected, excluded, &mut exclusions);
        } else {
            self.exclude_vendors_with_high_minimums(parts, excluded, &mut exclusions);
            self.exclude_vendors_to_reduce_shipping_costs(parts, excluded, &mut exclusions);
        }
        exclusions
    }

    /// Drop vendors whose share of the order stays below their minimum order,
    /// as long as no part becomes unobtainable.
    pub fn exclude_vendors_with_high_minimums(
        &mut self,
        parts: &mut [ChoicePart],
        excluded: &mut BTreeSet<String>,
        exclusions: &mut Vec<Exclusion>,
    ) {
        let minimums = self.vendor_minimums.clone();
        for (vendor_name, &minimum) in &minimums {
            if !vendor_names(parts, excluded).contains(vendor_name) {
                continue;
            }

            let base = self.quad_compute(parts, excluded, None);
            let order_total: f64 = parts
                .iter()
                .filter(|part| part.selected_vendor_name() == Some(vendor_name.as_str()))
                .map(ChoicePart::selected_total_cost)
                .sum();
            if order_total >= minimum {
                continue;
            }

            let mut trial_excluded = excluded.clone();
            trial_excluded.insert(vendor_name.clone());
            let trial = self.quad_compute(parts, &trial_excluded, Some(vendor_name.as_str()));
            if trial.missing_count > base.missing_count {
                log::debug!(
                    "Keeping '{}' below its minimum order: it is the only source for some parts",
                    vendor_name
                );
                continue;
            }

            *excluded = trial_excluded;
            push_exclusion(
                exclusions,
                vendor_name,
                ExclusionReason::BelowMinimum {
                    order_total,
                    minimum,
                },
            );
        }
    }

    /// The greedy shipping-cost loop. Each round excludes the vendor whose
    /// removal costs least; it stops once every remaining vendor saves at
    /// least the shipping threshold, or when only one usable vendor is left.
    pub fn exclude_vendors_to_reduce_shipping_costs(
        &mut self,
        parts: &mut [ChoicePart],
        excluded: &mut BTreeSet<String>,
        exclusions: &mut Vec<Exclusion>,
    ) {
        let initial_missing = self.quad_compute(parts, excluded, None).missing_count;

        loop {
            let base = self.quad_compute(parts, excluded, None);
            if base.missing_count > initial_missing {
                break;
            }

            let vendors = vendor_names(parts, excluded);
            if vendors.len() <= 1 {
                break;
            }

            let mut trials = Vec::new();
            for vendor_name in &vendors {
                if self.pinned_vendors.contains(vendor_name) {
                    continue;
                }
                let mut trial_excluded = excluded.clone();
                trial_excluded.insert(vendor_name.clone());
                let trial = self.quad_compute(parts, &trial_excluded, Some(vendor_name.as_str()));
                if trial.missing_count > base.missing_count {
                    log::debug!("'{}' is the only source for some parts", vendor_name);
                    continue;
                }
                trials.push(trial);
            }
            if trials.is_empty() {
                break;
            }
            trials.sort_by(|a, b| {
                a.total_cost
                    .total_cmp(&b.total_cost)
                    .then(a.vendor_priority.cmp(&b.vendor_priority))
                    .then_with(|| a.vendor_name.cmp(&b.vendor_name))
            });

            let mut pruned = false;
            while trials.len() >= 2 && trials[0].total_cost == base.total_cost {
                let trial = trials.remove(0);
                let Some(vendor_name) = trial.vendor_name else {
                    break;
                };
                let mut trial_excluded = excluded.clone();
                trial_excluded.insert(vendor_name.clone());
                if pruned {
                    // Excluding several vendors at once can interact.
                    let check = self.quad_compute(parts, &trial_excluded, Some(vendor_name.as_str()));
                    if check.missing_count != base.missing_count
                        || check.total_cost != base.total_cost
                    {
                        break;
                    }
                }
                *excluded = trial_excluded;
                push_exclusion(exclusions, &vendor_name, ExclusionReason::NoSavings);
                pruned = true;
            }
            if pruned {
                continue;
            }

            let lowest = &trials[0];
            let Some(vendor_name) = lowest.vendor_name.clone() else {
                break;
            };
            let savings = lowest.total_cost - base.total_cost;
            log::debug!(
                "Price is {:.2} when '{}' is excluded",
                lowest.total_cost,
                vendor_name
            );
            if savings < self.shipping_threshold && vendors.len() >= 2 {
                let reason = if savings == 0.0 {
                    ExclusionReason::NoSavings
                } else {
                    ExclusionReason::BelowShippingThreshold { savings }
                };
                excluded.insert(vendor_name.clone());
                push_exclusion(exclusions, &vendor_name, reason);
            } else {
                break;
            }
        }
    }
}

/// Exclude every known vendor that is not in `selected`.
pub fn apply_vendor_selection(
    parts: &[ChoicePart],
    selected: &BTreeSet<String>,
    excluded: &mut BTreeSet<String>,
    exclusions: &mut Vec<Exclusion>,
) {
    for vendor_name in vendor_names(parts, excluded) {
        if !selected.contains(&vendor_name) {
            excluded.insert(vendor_name.clone());
            push_exclusion(exclusions, &vendor_name, ExclusionReason::NotSelected);
        }
    }
}

fn push_exclusion(exclusions: &mut Vec<Exclusion>, vendor_name: &str, reason: ExclusionReason) {
    let exclusion = Exclusion {
        vendor_name: vendor_name.to_string(),
        reason,
    };
    log::info!("{}", exclusion);
    exclusions.push(exclusion);
}
