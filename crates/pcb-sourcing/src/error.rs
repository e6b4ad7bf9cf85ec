use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Invalid values in the part/offer data model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("price break quantity must be at least 1")]
    ZeroQuantity,

    #[error("price break unit price {0} is not a finite, non-negative number")]
    InvalidPrice(f64),

    #[error("vendor part {vendor}:{vendor_part} has no price breaks")]
    NoPriceBreaks { vendor: String, vendor_part: String },

    #[error("'{choice}' lists manufacturer part {manufacturer}:{mpn} more than once")]
    DuplicateActualPart {
        choice: String,
        manufacturer: String,
        mpn: String,
    },
}

/// Problems with `sourcing.toml`. All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse sourcing configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("shipping-threshold must be a finite, non-negative amount (got {0})")]
    InvalidShippingThreshold(f64),

    #[error("staleness-seconds must not be negative (got {0})")]
    NegativeStaleness(i64),

    #[error("fetch-jobs must be at least 1")]
    NoFetchJobs,

    #[error("fetch-timeout-seconds must be at least 1")]
    NoFetchTimeout,

    #[error("minimum order for '{vendor}' must be a finite, non-negative amount (got {amount})")]
    InvalidMinimum { vendor: String, amount: f64 },

    #[error("selected-vendor-names is set but empty")]
    EmptyVendorSelection,

    #[error("currency rate for '{currency}' must be a positive number (got {rate})")]
    InvalidRate { currency: String, rate: f64 },
}

/// Inconsistent part database or order input. Fatal, since every downstream
/// quantity depends on it.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: toml::de::Error,
    },

    #[error("part name '{0}' is defined more than once")]
    DuplicateName(String),

    #[error("'{name}' refers to unknown part '{target}'")]
    UnknownTarget { name: String, target: String },

    #[error("fractional part '{name}' must refer to a choice part, not '{target}'")]
    FractionTarget { name: String, target: String },

    #[error("alias '{0}' refers back to itself")]
    AliasCycle(String),

    #[error("fractional part '{name}' has invalid fraction {numerator}/{denominator}")]
    InvalidFraction {
        name: String,
        numerator: u32,
        denominator: u32,
    },

    #[error("'{choice}' is used with denominators {first} and {second}")]
    DenominatorMismatch {
        choice: String,
        first: u32,
        second: u32,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Cache store failures. Callers treat read failures as misses.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed cache record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cache record version {found} does not match {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("cache lock poisoned")]
    Poisoned,
}

/// A per-part problem found during an order run.
///
/// Issues never abort a run. They are collected on the order and listed in
/// the report so that nothing is dropped silently.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// No feasible offer remains once excluded vendors and stock are applied.
    MissingOffer { part: String },
    /// A project placement names a part the catalog does not know.
    UnknownPart {
        part: String,
        project: String,
        reference: String,
    },
    /// The cached record exists but could not be read.
    CacheReadFailure { part: String, message: String },
    /// The refreshed record could not be written back.
    CacheWriteFailure { part: String, message: String },
    /// The vendor data source failed or timed out for a manufacturer part.
    FetchFailure {
        part: String,
        manufacturer: String,
        mpn: String,
        message: String,
    },
    /// An offer was priced in a currency that could not be converted.
    UnconvertibleCurrency {
        part: String,
        vendor: String,
        currency: String,
    },
}

impl Issue {
    /// The logical part the issue belongs to.
    pub fn part(&self) -> &str {
        match self {
            Issue::MissingOffer { part }
            | Issue::UnknownPart { part, .. }
            | Issue::CacheReadFailure { part, .. }
            | Issue::CacheWriteFailure { part, .. }
            | Issue::FetchFailure { part, .. }
            | Issue::UnconvertibleCurrency { part, .. } => part,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::MissingOffer { part } => write!(f, "no vendor offers found for '{part}'"),
            Issue::UnknownPart {
                part,
                project,
                reference,
            } => write!(f, "{project}:{reference} uses unknown part '{part}'"),
            Issue::CacheReadFailure { part, message } => {
                write!(f, "ignoring cached offers for '{part}': {message}")
            }
            Issue::CacheWriteFailure { part, message } => {
                write!(f, "could not cache offers for '{part}': {message}")
            }
            Issue::FetchFailure {
                part,
                manufacturer,
                mpn,
                message,
            } => write!(
                f,
                "fetching offers for {manufacturer}:{mpn} ('{part}') failed: {message}"
            ),
            Issue::UnconvertibleCurrency {
                part,
                vendor,
                currency,
            } => write!(
                f,
                "dropped {vendor} offer for '{part}': no exchange rate for {currency}"
            ),
        }
    }
}
