//! Purchasing reports over the final selection.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::Issue;
use crate::model::{ChoicePart, PriceBreak};
use crate::optimize::Exclusion;

pub const REDUCTION_REPORT_FILE: &str = "vendor_reduction_report.txt";

/// The orderings the text listing is available in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Listing {
    /// Cheapest lines first.
    ByCost,
    /// Grouped by vendor, e.g. for entering orders.
    ByVendor,
    /// Alphabetical by part name.
    ByName,
}

impl Listing {
    pub const ALL: [Listing; 3] = [Listing::ByCost, Listing::ByVendor, Listing::ByName];

    pub fn file_name(self) -> &'static str {
        match self {
            Listing::ByCost => "bom_by_price.txt",
            Listing::ByVendor => "bom_by_vendor.txt",
            Listing::ByName => "bom_by_name.txt",
        }
    }
}

/// One choice part and what is being bought for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub name: String,
    pub footprint: String,
    pub description: String,
    pub required_quantity: u32,
    pub references: String,
    pub vendor_name: Option<String>,
    pub vendor_part_name: Option<String>,
    pub manufacturer_name: Option<String>,
    pub manufacturer_part_name: Option<String>,
    pub order_quantity: u32,
    pub price_break: Option<PriceBreak>,
    pub neighboring_breaks: Vec<PriceBreak>,
    pub total_cost: f64,
}

impl LineItem {
    fn from_choice_part(part: &ChoicePart) -> Self {
        let mut item = LineItem {
            name: part.name.clone(),
            footprint: part.footprint.clone(),
            description: part.description.clone(),
            required_quantity: part.required_quantity,
            references: part.references_text(),
            vendor_name: None,
            vendor_part_name: None,
            manufacturer_name: None,
            manufacturer_part_name: None,
            order_quantity: 0,
            price_break: None,
            neighboring_breaks: Vec::new(),
            total_cost: 0.0,
        };
        if let (Some(selection), Some(actual), Some(vendor_part)) = (
            part.selection(),
            part.selected_actual_part(),
            part.selected_vendor_part(),
        ) {
            item.vendor_name = Some(vendor_part.vendor_name.clone());
            item.vendor_part_name = Some(vendor_part.vendor_part_name.clone());
            item.manufacturer_name = Some(actual.manufacturer_name.clone());
            item.manufacturer_part_name = Some(actual.manufacturer_part_name.clone());
            item.order_quantity = selection.order_quantity;
            item.price_break = part.selected_price_break().copied();
            item.neighboring_breaks = vendor_part
                .neighboring_breaks(selection.price_break_index)
                .to_vec();
            item.total_cost = selection.total_cost;
        }
        item
    }

    pub fn is_sourced(&self) -> bool {
        self.vendor_name.is_some()
    }

    fn vendor(&self) -> &str {
        self.vendor_name.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VendorSubtotal {
    pub vendor_name: String,
    pub line_count: usize,
    pub total_cost: f64,
}

/// Everything a run produced, ready to render.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub currency: String,
    pub line_items: Vec<LineItem>,
    pub vendor_subtotals: Vec<VendorSubtotal>,
    pub total_cost: f64,
    pub excluded_vendor_names: BTreeSet<String>,
    pub exclusions: Vec<Exclusion>,
    pub issues: Vec<Issue>,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    quantity: u32,
    vendor_part_name: &'a str,
    manufacturer: &'a str,
    mpn: &'a str,
    name: &'a str,
}

impl Report {
    pub fn new(
        parts: &[ChoicePart],
        excluded_vendor_names: &BTreeSet<String>,
        exclusions: &[Exclusion],
        issues: &[Issue],
        currency: &str,
    ) -> Self {
        let line_items: Vec<LineItem> = parts.iter().map(LineItem::from_choice_part).collect();

        let mut subtotals: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
        for item in line_items.iter().filter(|item| item.is_sourced()) {
            let entry = subtotals.entry(item.vendor()).or_default();
            entry.0 += 1;
            entry.1 += item.total_cost;
        }
        let vendor_subtotals = subtotals
            .into_iter()
            .map(|(vendor_name, (line_count, total_cost))| VendorSubtotal {
                vendor_name: vendor_name.to_string(),
                line_count,
                total_cost,
            })
            .collect();
        let total_cost = line_items.iter().map(|item| item.total_cost).sum();

        Self {
            currency: currency.to_string(),
            line_items,
            vendor_subtotals,
            total_cost,
            excluded_vendor_names: excluded_vendor_names.clone(),
            exclusions: exclusions.to_vec(),
            issues: issues.to_vec(),
        }
    }

    /// Line items that could not be sourced.
    pub fn missing(&self) -> impl Iterator<Item = &LineItem> {
        self.line_items
            .iter()
            .filter(|item| !item.is_sourced() && item.required_quantity > 0)
    }

    pub fn sorted(&self, listing: Listing) -> Vec<&LineItem> {
        let by_cost = |a: &LineItem, b: &LineItem| a.total_cost.total_cmp(&b.total_cost);
        let by_vendor = |a: &LineItem, b: &LineItem| a.vendor().cmp(b.vendor());
        let by_name = |a: &LineItem, b: &LineItem| a.name.cmp(&b.name);

        let mut items: Vec<&LineItem> = self.line_items.iter().collect();
        items.sort_by(|&a, &b| -> Ordering {
            match listing {
                Listing::ByCost => by_cost(a, b)
                    .then_with(|| by_vendor(a, b))
                    .then_with(|| by_name(a, b)),
                Listing::ByVendor => by_vendor(a, b)
                    .then_with(|| by_cost(a, b))
                    .then_with(|| by_name(a, b)),
                Listing::ByName => by_name(a, b)
                    .then_with(|| by_vendor(a, b))
                    .then_with(|| by_cost(a, b)),
            }
        });
        items
    }

    pub fn listing_text(&self, listing: Listing) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.write_listing(&mut out, listing);
        out
    }

    /// Write one listing: every line item in `listing` order, then the total,
    /// the vendor subtotals and the issues.
    pub fn write_listing<W: fmt::Write>(&self, writer: &mut W, listing: Listing) -> fmt::Result {
        for item in self.sorted(listing) {
            writeln!(
                writer,
                "  {}:{};{} {}:{}",
                item.name, item.footprint, item.description, item.required_quantity, item.references
            )?;
            match (&item.vendor_name, &item.price_break) {
                (Some(vendor_name), Some(price_break)) => {
                    let breaks: Vec<String> = item
                        .neighboring_breaks
                        .iter()
                        .map(PriceBreak::to_string)
                        .collect();
                    writeln!(
                        writer,
                        "    {}:{} [{}: {}] {}",
                        vendor_name,
                        item.vendor_part_name.as_deref().unwrap_or(""),
                        item.manufacturer_name.as_deref().unwrap_or(""),
                        item.manufacturer_part_name.as_deref().unwrap_or(""),
                        breaks.join(" ")
                    )?;
                    writeln!(
                        writer,
                        "        {}@({})={:.2}",
                        item.order_quantity, price_break, item.total_cost
                    )?;
                }
                _ if item.required_quantity == 0 => writeln!(writer, "    not needed")?,
                _ => writeln!(writer, "    no vendor offers")?,
            }
        }

        writeln!(writer, "Total: {:.2} {}", self.total_cost, self.currency)?;
        if !self.vendor_subtotals.is_empty() {
            writeln!(writer, "Vendor subtotals:")?;
            for subtotal in &self.vendor_subtotals {
                writeln!(
                    writer,
                    "  {}: {:.2} {}",
                    subtotal.vendor_name, subtotal.total_cost, self.currency
                )?;
            }
        }
        if !self.issues.is_empty() {
            writeln!(writer, "Issues:")?;
            for issue in &self.issues {
                writeln!(writer, "  {issue}")?;
            }
        }
        Ok(())
    }

    /// One line per excluded vendor, in the order they were excluded.
    pub fn reduction_text(&self) -> String {
        let mut out = String::new();
        let _ = self.write_reduction(&mut out);
        out
    }

    pub fn write_reduction<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        if self.exclusions.is_empty() {
            return writeln!(writer, "No vendors excluded");
        }
        for exclusion in &self.exclusions {
            writeln!(writer, "{exclusion}")?;
        }
        Ok(())
    }

    /// Order upload file for one vendor: quantity, vendor part, manufacturer,
    /// manufacturer part and part name per line, sorted by part name.
    pub fn vendor_csv(&self, vendor_name: &str) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for item in self.sorted(Listing::ByName) {
            if item.vendor_name.as_deref() != Some(vendor_name) {
                continue;
            }
            writer.serialize(CsvRow {
                quantity: item.order_quantity,
                vendor_part_name: item.vendor_part_name.as_deref().unwrap_or(""),
                manufacturer: item.manufacturer_name.as_deref().unwrap_or(""),
                mpn: item.manufacturer_part_name.as_deref().unwrap_or(""),
                name: &item.name,
            })?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to finish CSV for {vendor_name}: {e}"))?;
        Ok(String::from_utf8(bytes)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the three listings, the reduction report and a CSV per vendor
    /// into `dir`. Returns the written paths.
    pub fn write_all(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let mut files = Vec::new();
        for listing in Listing::ALL {
            files.push((dir.join(listing.file_name()), self.listing_text(listing)));
        }
        files.push((dir.join(REDUCTION_REPORT_FILE), self.reduction_text()));
        for subtotal in &self.vendor_subtotals {
            let file_name = format!("{}.csv", subtotal.vendor_name.replace(['/', '\\'], "_"));
            files.push((dir.join(file_name), self.vendor_csv(&subtotal.vendor_name)?));
        }

        let mut written = Vec::new();
        for (path, contents) in files {
            std::fs::write(&path, contents)
                .with_context(|| format!("failed to write {}", path.display()))?;
            written.push(path);
        }
        log::info!("Wrote {} report files to {}", written.len(), dir.display());
        Ok(written)
    }
}
