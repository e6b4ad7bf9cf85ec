use std::collections::BTreeMap;

use crate::config::SourcingConfig;

/// Converts prices between currencies.
pub trait CurrencyConverter: Send + Sync {
    /// Factor that turns an amount in `from` into an amount in `to`, or `None`
    /// when no rate is known.
    fn multiplier(&self, from: &str, to: &str) -> Option<f64>;
}

/// Static exchange rates, each expressed in a common base currency.
#[derive(Debug, Clone)]
pub struct FixedRates {
    base: String,
    rates: BTreeMap<String, f64>,
}

impl FixedRates {
    pub fn new(base: impl Into<String>, rates: BTreeMap<String, f64>) -> Self {
        Self {
            base: base.into(),
            rates,
        }
    }

    pub fn from_config(config: &SourcingConfig) -> Self {
        Self::new(&config.currency, config.currency_rates.clone())
    }

    fn value_in_base(&self, currency: &str) -> Option<f64> {
        if currency.eq_ignore_ascii_case(&self.base) {
            return Some(1.0);
        }
        self.rates
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(currency))
            .map(|(_, rate)| *rate)
    }
}

impl CurrencyConverter for FixedRates {
    fn multiplier(&self, from: &str, to: &str) -> Option<f64> {
        if from.eq_ignore_ascii_case(to) {
            return Some(1.0);
        }
        Some(self.value_in_base(from)? / self.value_in_base(to)?)
    }
}
