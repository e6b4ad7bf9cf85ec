use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Vendors that carry large minimum orders or ship across an ocean go first
/// when the optimizer has to pick between equally cheap exclusions; the big
/// domestic distributors go last.
pub const DEFAULT_VENDOR_PRIORITIES: &[(&str, u32)] = &[
    ("Verical", 0),
    ("Chip1Stop", 1),
    ("Farnell element14", 2),
    ("element14 Asia-Pacific", 2),
    ("Heilind Electronics - Asia", 2),
    ("Mouser", 1003),
    ("Digi-Key", 1004),
];

pub const DEFAULT_SHIPPING_THRESHOLD: f64 = 15.0;

/// Two days.
pub const DEFAULT_STALENESS_SECONDS: i64 = 2 * 24 * 60 * 60;

/// `sourcing.toml`
///
/// Every key is optional:
///
/// ```toml
/// shipping-threshold = 15.0
/// staleness-seconds = 172800
/// pinned-vendors = ["Digi-Key"]
/// currency = "USD"
///
/// [vendor-minimums]
/// "Verical" = 50.0
///
/// [currency-rates]
/// EUR = 1.08
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct SourcingConfig {
    /// Savings (in the order currency) below which a vendor is not worth a
    /// separate shipment.
    pub shipping_threshold: f64,

    /// Cached offers younger than this are reused without fetching.
    pub staleness_seconds: i64,

    /// Tie-break priority per vendor; lower is excluded first.
    pub vendor_priorities: BTreeMap<String, u32>,

    /// Minimum order amount per vendor.
    pub vendor_minimums: BTreeMap<String, f64>,

    /// Vendors the shipping-cost loop never excludes.
    pub pinned_vendors: BTreeSet<String>,

    /// When set, only these vendors are used and the optimizer is skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_vendor_names: Option<BTreeSet<String>>,

    pub fetch_jobs: usize,
    pub fetch_timeout_seconds: u64,

    /// Currency every price is converted to.
    pub currency: String,

    /// Value of one unit of each currency in `currency`.
    pub currency_rates: BTreeMap<String, f64>,
}

impl Default for SourcingConfig {
    fn default() -> Self {
        Self {
            shipping_threshold: DEFAULT_SHIPPING_THRESHOLD,
            staleness_seconds: DEFAULT_STALENESS_SECONDS,
            vendor_priorities: DEFAULT_VENDOR_PRIORITIES
                .iter()
                .map(|(name, priority)| (name.to_string(), *priority))
                .collect(),
            vendor_minimums: BTreeMap::new(),
            pinned_vendors: BTreeSet::from(["Digi-Key".to_string()]),
            selected_vendor_names: None,
            fetch_jobs: 4,
            fetch_timeout_seconds: 30,
            currency: "USD".to_string(),
            currency_rates: BTreeMap::new(),
        }
    }
}

impl SourcingConfig {
    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: SourcingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid configuration in {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.shipping_threshold.is_finite() || self.shipping_threshold < 0.0 {
            return Err(ConfigError::InvalidShippingThreshold(self.shipping_threshold));
        }
        if self.staleness_seconds < 0 {
            return Err(ConfigError::NegativeStaleness(self.staleness_seconds));
        }
        if self.fetch_jobs == 0 {
            return Err(ConfigError::NoFetchJobs);
        }
        if self.fetch_timeout_seconds == 0 {
            return Err(ConfigError::NoFetchTimeout);
        }
        for (vendor, &amount) in &self.vendor_minimums {
            if !amount.is_finite() || amount < 0.0 {
                return Err(ConfigError::InvalidMinimum {
                    vendor: vendor.clone(),
                    amount,
                });
            }
        }
        if self
            .selected_vendor_names
            .as_ref()
            .is_some_and(|names| names.is_empty())
        {
            return Err(ConfigError::EmptyVendorSelection);
        }
        for (currency, &rate) in &self.currency_rates {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(ConfigError::InvalidRate {
                    currency: currency.clone(),
                    rate,
                });
            }
        }
        Ok(())
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}
