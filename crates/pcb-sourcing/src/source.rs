//! Vendor offer sources.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{ActualKey, PriceBreak};

/// A vendor offer as returned by a source, before currency conversion and
/// timestamping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedOffer {
    pub vendor_name: String,
    pub vendor_part_name: String,
    pub quantity_available: u32,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub price_breaks: Vec<PriceBreak>,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Something that can list the current vendor offers for a manufacturer part.
///
/// Sources are called from the refresh pool, one call per manufacturer part.
/// An unknown part is not an error; it simply has no offers.
pub trait OfferSource: Send + Sync {
    fn fetch_offers(&self, key: &ActualKey) -> Result<Vec<FetchedOffer>>;
}

#[derive(Debug, Deserialize)]
struct OfferEntry {
    manufacturer: String,
    mpn: String,
    #[serde(default)]
    offers: Vec<FetchedOffer>,
}

/// Offers loaded from a JSON document, for offline runs and tests:
///
/// ```json
/// [
///   {
///     "manufacturer": "Yageo",
///     "mpn": "RC0603FR-0710KL",
///     "offers": [
///       {
///         "vendor_name": "Digi-Key",
///         "vendor_part_name": "311-10.0KHRCT-ND",
///         "quantity_available": 10000,
///         "currency": "USD",
///         "price_breaks": [{"quantity": 1, "unit_price": 0.1}]
///       }
///     ]
///   }
/// ]
/// ```
#[derive(Debug, Clone, Default)]
pub struct OfferFile {
    offers: BTreeMap<ActualKey, Vec<FetchedOffer>>,
}

impl OfferFile {
    pub fn parse(content: &str) -> serde_json::Result<Self> {
        let entries: Vec<OfferEntry> = serde_json::from_str(content)?;
        let mut offers: BTreeMap<ActualKey, Vec<FetchedOffer>> = BTreeMap::new();
        for entry in entries {
            offers
                .entry(ActualKey::new(entry.manufacturer, entry.mpn))
                .or_default()
                .extend(entry.offers);
        }
        Ok(Self { offers })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse offers in {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}

impl OfferSource for OfferFile {
    fn fetch_offers(&self, key: &ActualKey) -> Result<Vec<FetchedOffer>> {
        Ok(self.offers.get(key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFERS: &str = r#"[
        {
            "manufacturer": "Yageo",
            "mpn": "RC0603FR-0710KL",
            "offers": [
                {
                    "vendor_name": "Digi-Key",
                    "vendor_part_name": "311-10.0KHRCT-ND",
                    "quantity_available": 10000,
                    "price_breaks": [{"quantity": 1, "unit_price": 0.1}]
                }
            ]
        },
        {
            "manufacturer": "Yageo",
            "mpn": "RC0603FR-0710KL",
            "offers": [
                {
                    "vendor_name": "Farnell element14",
                    "vendor_part_name": "9238603",
                    "quantity_available": 500,
                    "currency": "GBP",
                    "price_breaks": [{"quantity": 50, "unit_price": 0.02}]
                }
            ]
        }
    ]"#;

    #[test]
    fn test_offer_file_merges_entries() {
        let file = OfferFile::parse(OFFERS).unwrap();
        assert_eq!(file.len(), 1);

        let offers = file
            .fetch_offers(&ActualKey::new("Yageo", "RC0603FR-0710KL"))
            .unwrap();
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].currency, "USD");
        assert_eq!(offers[1].currency, "GBP");
    }

    #[test]
    fn test_unknown_part_has_no_offers() {
        let file = OfferFile::parse(OFFERS).unwrap();
        let offers = file.fetch_offers(&ActualKey::new("TI", "LM358DR")).unwrap();
        assert!(offers.is_empty());
    }

    #[test]
    fn test_invalid_price_break_rejected() {
        let content = r#"[{"manufacturer": "A", "mpn": "B", "offers": [{
            "vendor_name": "V", "vendor_part_name": "P", "quantity_available": 1,
            "price_breaks": [{"quantity": 1, "unit_price": -1.0}]
        }]}]"#;
        assert!(OfferFile::parse(content).is_err());
    }
}
