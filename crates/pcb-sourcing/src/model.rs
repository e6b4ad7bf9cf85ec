//! Part/offer data model: logical choice parts, the manufacturer parts that
//! satisfy them, and the vendor offers (with price breaks) for those.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Unit price that applies from `quantity` pieces upwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPriceBreak")]
pub struct PriceBreak {
    pub quantity: u32,
    pub unit_price: f64,
}

#[derive(Deserialize)]
struct RawPriceBreak {
    quantity: u32,
    unit_price: f64,
}

impl TryFrom<RawPriceBreak> for PriceBreak {
    type Error = ModelError;

    fn try_from(raw: RawPriceBreak) -> Result<Self, Self::Error> {
        PriceBreak::new(raw.quantity, raw.unit_price)
    }
}

impl PriceBreak {
    pub fn new(quantity: u32, unit_price: f64) -> Result<Self, ModelError> {
        if quantity == 0 {
            return Err(ModelError::ZeroQuantity);
        }
        if !unit_price.is_finite() || unit_price < 0.0 {
            return Err(ModelError::InvalidPrice(unit_price));
        }
        Ok(Self {
            quantity,
            unit_price,
        })
    }

    /// Pieces that must be bought to use this break when `needed` are required.
    #[inline]
    pub fn order_quantity(&self, needed: u32) -> u32 {
        needed.max(self.quantity)
    }

    /// Cost of buying `order_quantity(needed)` pieces at this break.
    #[inline]
    pub fn total_cost(&self, needed: u32) -> f64 {
        f64::from(self.order_quantity(needed)) * self.unit_price
    }
}

impl fmt::Display for PriceBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:.3}", self.quantity, self.unit_price)
    }
}

/// Identifies a vendor's catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VendorKey {
    pub vendor_name: String,
    pub vendor_part_name: String,
}

impl fmt::Display for VendorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vendor_name, self.vendor_part_name)
    }
}

/// Identifies a manufacturer part.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActualKey {
    pub manufacturer_name: String,
    pub manufacturer_part_name: String,
}

impl ActualKey {
    pub fn new(manufacturer_name: impl Into<String>, manufacturer_part_name: impl Into<String>) -> Self {
        Self {
            manufacturer_name: manufacturer_name.into(),
            manufacturer_part_name: manufacturer_part_name.into(),
        }
    }
}

impl fmt::Display for ActualKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.manufacturer_name, self.manufacturer_part_name)
    }
}

/// One vendor's offer for a manufacturer part.
///
/// Price breaks are kept sorted by ascending quantity and are never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawVendorPart")]
pub struct VendorPart {
    pub vendor_name: String,
    pub vendor_part_name: String,
    pub quantity_available: u32,
    price_breaks: Vec<PriceBreak>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawVendorPart {
    vendor_name: String,
    vendor_part_name: String,
    quantity_available: u32,
    price_breaks: Vec<PriceBreak>,
    fetched_at: DateTime<Utc>,
}

impl TryFrom<RawVendorPart> for VendorPart {
    type Error = ModelError;

    fn try_from(raw: RawVendorPart) -> Result<Self, Self::Error> {
        VendorPart::new(
            raw.vendor_name,
            raw.vendor_part_name,
            raw.quantity_available,
            raw.price_breaks,
            raw.fetched_at,
        )
    }
}

impl VendorPart {
    pub fn new(
        vendor_name: impl Into<String>,
        vendor_part_name: impl Into<String>,
        quantity_available: u32,
        mut price_breaks: Vec<PriceBreak>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        let vendor_name = vendor_name.into();
        let vendor_part_name = vendor_part_name.into();
        if price_breaks.is_empty() {
            return Err(ModelError::NoPriceBreaks {
                vendor: vendor_name,
                vendor_part: vendor_part_name,
            });
        }
        price_breaks.sort_by_key(|pb| pb.quantity);

        Ok(Self {
            vendor_name,
            vendor_part_name,
            quantity_available,
            price_breaks,
            fetched_at,
        })
    }

    pub fn key(&self) -> VendorKey {
        VendorKey {
            vendor_name: self.vendor_name.clone(),
            vendor_part_name: self.vendor_part_name.clone(),
        }
    }

    pub fn price_breaks(&self) -> &[PriceBreak] {
        &self.price_breaks
    }

    /// Price breaks around `index`: the one before, the one at, and the one
    /// after it.
    pub fn neighboring_breaks(&self, index: usize) -> &[PriceBreak] {
        let start = index.saturating_sub(1);
        let end = (index + 2).min(self.price_breaks.len());
        &self.price_breaks[start.min(end)..end]
    }
}

/// A manufacturer part and every vendor offer known for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualPart {
    pub manufacturer_name: String,
    pub manufacturer_part_name: String,
    #[serde(default)]
    pub vendor_parts: Vec<VendorPart>,
}

impl ActualPart {
    pub fn new(manufacturer_name: impl Into<String>, manufacturer_part_name: impl Into<String>) -> Self {
        Self {
            manufacturer_name: manufacturer_name.into(),
            manufacturer_part_name: manufacturer_part_name.into(),
            vendor_parts: Vec::new(),
        }
    }

    pub fn key(&self) -> ActualKey {
        ActualKey::new(&self.manufacturer_name, &self.manufacturer_part_name)
    }

    /// Oldest fetch time across the offers, or `None` when there are none.
    pub fn oldest_fetch(&self) -> Option<DateTime<Utc>> {
        self.vendor_parts.iter().map(|vp| vp.fetched_at).min()
    }

    /// Replace every offer, keeping the first offer for each vendor key.
    pub fn replace_vendor_parts(&mut self, vendor_parts: Vec<VendorPart>) {
        let key = self.key();
        let mut seen = BTreeSet::new();
        self.vendor_parts = vendor_parts
            .into_iter()
            .filter(|vp| {
                let fresh = seen.insert(vp.key());
                if !fresh {
                    log::warn!("Dropping duplicate offer {} for {}", vp.key(), key);
                }
                fresh
            })
            .collect();
    }
}

/// Where a choice part is placed: a reference designator within a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub project: String,
    pub reference: String,
}

impl Ord for Placement {
    fn cmp(&self, other: &Self) -> Ordering {
        self.project
            .cmp(&other.project)
            .then_with(|| natord::compare(&self.reference, &other.reference))
    }
}

impl PartialOrd for Placement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The offer chosen for a [`ChoicePart`] by [`ChoicePart::select`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub actual_index: usize,
    pub vendor_index: usize,
    pub price_break_index: usize,
    pub vendor_name: String,
    pub order_quantity: u32,
    pub total_cost: f64,
}

/// A logical, orderable part (e.g. `10K;1608`) and the manufacturer parts
/// that may be bought for it.
#[derive(Debug, Clone)]
pub struct ChoicePart {
    pub name: String,
    pub footprint: String,
    pub description: String,
    pub required_quantity: u32,
    pub placements: Vec<Placement>,
    pub(crate) actual_parts: Vec<ActualPart>,
    pub(crate) selection: Option<Selection>,
}

impl ChoicePart {
    pub fn new(
        name: impl Into<String>,
        footprint: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            footprint: footprint.into(),
            description: description.into(),
            required_quantity: 0,
            placements: Vec::new(),
            actual_parts: Vec::new(),
            selection: None,
        }
    }

    pub fn actual_parts(&self) -> &[ActualPart] {
        &self.actual_parts
    }

    /// Add a candidate manufacturer part; keys must be unique.
    pub fn push_actual_part(&mut self, actual_part: ActualPart) -> Result<(), ModelError> {
        let key = actual_part.key();
        if self.actual_parts.iter().any(|ap| ap.key() == key) {
            return Err(ModelError::DuplicateActualPart {
                choice: self.name.clone(),
                manufacturer: key.manufacturer_name,
                mpn: key.manufacturer_part_name,
            });
        }
        self.actual_parts.push(actual_part);
        self.selection = None;
        Ok(())
    }

    /// Replace the candidate list wholesale. Any previous selection is dropped.
    pub fn set_actual_parts(&mut self, actual_parts: Vec<ActualPart>) -> Result<(), ModelError> {
        self.actual_parts.clear();
        self.selection = None;
        for actual_part in actual_parts {
            self.push_actual_part(actual_part)?;
        }
        Ok(())
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn selected_actual_part(&self) -> Option<&ActualPart> {
        let selection = self.selection.as_ref()?;
        self.actual_parts.get(selection.actual_index)
    }

    pub fn selected_vendor_part(&self) -> Option<&VendorPart> {
        let selection = self.selection.as_ref()?;
        self.selected_actual_part()?
            .vendor_parts
            .get(selection.vendor_index)
    }

    pub fn selected_price_break(&self) -> Option<&PriceBreak> {
        let selection = self.selection.as_ref()?;
        self.selected_vendor_part()?
            .price_breaks()
            .get(selection.price_break_index)
    }

    pub fn selected_vendor_name(&self) -> Option<&str> {
        self.selection.as_ref().map(|s| s.vendor_name.as_str())
    }

    /// Cost of the current selection; zero when nothing is selected.
    pub fn selected_total_cost(&self) -> f64 {
        self.selection.as_ref().map_or(0.0, |s| s.total_cost)
    }

    /// Every vendor offering any candidate manufacturer part.
    pub fn vendor_names(&self) -> impl Iterator<Item = &str> {
        self.actual_parts
            .iter()
            .flat_map(|ap| ap.vendor_parts.iter())
            .map(|vp| vp.vendor_name.as_str())
    }

    /// Placements grouped per project, e.g. `[blinky: R1 R2][probe: R7]`.
    pub fn references_text(&self) -> String {
        let mut placements: Vec<&Placement> = self.placements.iter().collect();
        placements.sort();

        let mut text = String::new();
        let mut current: Option<&str> = None;
        for placement in placements {
            if current != Some(placement.project.as_str()) {
                if current.is_some() {
                    text.push(']');
                }
                text.push('[');
                text.push_str(&placement.project);
                text.push(':');
                current = Some(&placement.project);
            }
            text.push(' ');
            text.push_str(&placement.reference);
        }
        if current.is_some() {
            text.push(']');
        }
        text
    }
}
