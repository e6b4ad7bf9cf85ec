//! Bringing vendor offers up to date before optimization.
//!
//! Each choice part is refreshed independently on a bounded rayon pool. Cached
//! offers younger than the staleness window are reused as they are; everything
//! else is fetched from the [`OfferSource`], converted to the order currency,
//! stamped with the run's clock and written back as one record per part.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::cache::{CacheRecord, VendorCache};
use crate::config::SourcingConfig;
use crate::currency::CurrencyConverter;
use crate::error::Issue;
use crate::model::{ActualKey, ActualPart, ChoicePart, PriceBreak, VendorPart};
use crate::source::{FetchedOffer, OfferSource};

/// Whether `actual`'s offers can be reused at `now`. An actual part without
/// offers is never fresh, so parts nobody stocked are asked about again.
pub fn is_fresh(actual: &ActualPart, now: DateTime<Utc>, staleness: chrono::Duration) -> bool {
    actual
        .oldest_fetch()
        .is_some_and(|oldest| now - oldest < staleness)
}

fn build_fetch_pool(jobs: usize) -> Result<rayon::ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|idx| format!("pcb-order-fetch-{idx}"))
        .build()
        .map_err(|e| anyhow!("Failed to build fetch thread pool: {e}"))
}

pub struct Refresher {
    cache: Arc<dyn VendorCache>,
    source: Arc<dyn OfferSource>,
    converter: Arc<dyn CurrencyConverter>,
    currency: String,
    staleness: chrono::Duration,
    timeout: Duration,
    jobs: usize,
}

impl Refresher {
    pub fn new(
        cache: Arc<dyn VendorCache>,
        source: Arc<dyn OfferSource>,
        converter: Arc<dyn CurrencyConverter>,
        config: &SourcingConfig,
    ) -> Self {
        Self {
            cache,
            source,
            converter,
            currency: config.currency.clone(),
            staleness: config.staleness(),
            timeout: config.fetch_timeout(),
            jobs: config.fetch_jobs,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Refresh every part; returns once all of them are done.
    pub fn refresh_all(&self, parts: &mut [ChoicePart], now: DateTime<Utc>) -> Result<Vec<Issue>> {
        let pool = build_fetch_pool(self.jobs)?;
        let issues: Vec<Vec<Issue>> = pool.install(|| {
            parts
                .par_iter_mut()
                .map(|part| self.refresh_choice_part(part, now))
                .collect()
        });
        Ok(issues.into_iter().flatten().collect())
    }

    /// Fill in `part`'s vendor offers from the cache or the source, writing
    /// the snapshot back when anything changed. Problems are returned as
    /// issues and never stop the refresh.
    pub fn refresh_choice_part(&self, part: &mut ChoicePart, now: DateTime<Utc>) -> Vec<Issue> {
        let mut issues = Vec::new();
        let record = match self.cache.get(&part.name) {
            Ok(record) => record,
            Err(err) => {
                log::warn!("Ignoring cached offers for '{}': {}", part.name, err);
                issues.push(Issue::CacheReadFailure {
                    part: part.name.clone(),
                    message: err.to_string(),
                });
                None
            }
        };

        // Cached prices are only usable in the currency they were converted to
        let record = record.filter(|record| {
            let usable = record.currency.eq_ignore_ascii_case(&self.currency);
            if !usable {
                log::debug!(
                    "Cached offers for '{}' are in {}, not {}",
                    part.name,
                    record.currency,
                    self.currency
                );
            }
            usable
        });

        let candidate_keys: BTreeSet<ActualKey> =
            part.actual_parts.iter().map(ActualPart::key).collect();
        let cached_keys: Option<BTreeSet<ActualKey>> = record
            .as_ref()
            .map(|r| r.actual_parts.iter().map(ActualPart::key).collect());
        let mut dirty = cached_keys.as_ref() != Some(&candidate_keys);

        // What gets written back. A failed refetch keeps the previous entry so
        // the last good offers survive until a fetch succeeds.
        let mut snapshot = Vec::with_capacity(part.actual_parts.len());
        let mut fetches = 0;
        for actual in part.actual_parts.iter_mut() {
            let key = actual.key();
            let cached = record.as_ref().and_then(|r| r.find(&key));
            match cached {
                Some(cached) if is_fresh(cached, now, self.staleness) => {
                    actual.vendor_parts = cached.vendor_parts.clone();
                    snapshot.push(actual.clone());
                }
                _ => {
                    fetches += 1;
                    match self.fetch(&part.name, &key, now, &mut issues) {
                        Some(vendor_parts) => {
                            actual.replace_vendor_parts(vendor_parts);
                            dirty = true;
                            snapshot.push(actual.clone());
                        }
                        None => {
                            actual.vendor_parts.clear();
                            snapshot.push(cached.cloned().unwrap_or_else(|| actual.clone()));
                        }
                    }
                }
            }
        }
        part.selection = None;
        log::debug!(
            "'{}': {} fetched, {} from cache",
            part.name,
            fetches,
            part.actual_parts.len() - fetches
        );

        if dirty {
            let record = CacheRecord::new(&part.name, &self.currency, snapshot);
            if let Err(err) = self.cache.put(&part.name, &record) {
                log::warn!("Could not cache offers for '{}': {}", part.name, err);
                issues.push(Issue::CacheWriteFailure {
                    part: part.name.clone(),
                    message: err.to_string(),
                });
            }
        }
        issues
    }

    /// Offers for `key` in the order currency, or `None` when the source
    /// failed or timed out.
    fn fetch(
        &self,
        part_name: &str,
        key: &ActualKey,
        now: DateTime<Utc>,
        issues: &mut Vec<Issue>,
    ) -> Option<Vec<VendorPart>> {
        let offers = match self.fetch_with_timeout(key) {
            Ok(offers) => offers,
            Err(err) => {
                log::warn!("Fetching offers for {} failed: {:#}", key, err);
                issues.push(Issue::FetchFailure {
                    part: part_name.to_string(),
                    manufacturer: key.manufacturer_name.clone(),
                    mpn: key.manufacturer_part_name.clone(),
                    message: format!("{err:#}"),
                });
                return None;
            }
        };

        Some(
            offers
                .into_iter()
                .filter_map(|offer| self.convert(part_name, key, offer, now, issues))
                .collect(),
        )
    }

    /// Run the source on its own thread so a hung vendor cannot stall the
    /// pool past the timeout. A timed-out call is abandoned, not cancelled.
    fn fetch_with_timeout(&self, key: &ActualKey) -> Result<Vec<FetchedOffer>> {
        let (tx, rx) = mpsc::channel();
        let source = Arc::clone(&self.source);
        let request = key.clone();
        std::thread::Builder::new()
            .name("pcb-order-source".to_string())
            .spawn(move || {
                let _ = tx.send(source.fetch_offers(&request));
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                bail!("timed out after {:.1}s", self.timeout.as_secs_f64())
            }
            Err(RecvTimeoutError::Disconnected) => bail!("offer source stopped without answering"),
        }
    }

    fn convert(
        &self,
        part_name: &str,
        key: &ActualKey,
        offer: FetchedOffer,
        now: DateTime<Utc>,
        issues: &mut Vec<Issue>,
    ) -> Option<VendorPart> {
        let Some(multiplier) = self.converter.multiplier(&offer.currency, &self.currency) else {
            log::warn!(
                "Dropping {} offer for {}: no rate from {} to {}",
                offer.vendor_name,
                key,
                offer.currency,
                self.currency
            );
            issues.push(Issue::UnconvertibleCurrency {
                part: part_name.to_string(),
                vendor: offer.vendor_name,
                currency: offer.currency,
            });
            return None;
        };

        let converted = offer
            .price_breaks
            .iter()
            .map(|pb| PriceBreak::new(pb.quantity, pb.unit_price * multiplier))
            .collect::<Result<Vec<_>, _>>()
            .and_then(|breaks| {
                VendorPart::new(
                    &offer.vendor_name,
                    &offer.vendor_part_name,
                    offer.quantity_available,
                    breaks,
                    now,
                )
            });
        match converted {
            Ok(vendor_part) => Some(vendor_part),
            Err(err) => {
                log::warn!("Dropping {} offer for {}: {}", offer.vendor_name, key, err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FileCache, MemoryCache};
    use crate::currency::FixedRates;
    use crate::error::CacheError;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn offer(vendor: &str, currency: &str, price: f64) -> FetchedOffer {
        FetchedOffer {
            vendor_name: vendor.to_string(),
            vendor_part_name: format!("{vendor}-1"),
            quantity_available: 1000,
            currency: currency.to_string(),
            price_breaks: vec![PriceBreak::new(1, price).unwrap()],
        }
    }

    /// Returns the same offers for every part and counts the calls.
    struct CountingSource {
        offers: Vec<FetchedOffer>,
        calls: AtomicUsize,
    }

    impl CountingSource {
        fn new(offers: Vec<FetchedOffer>) -> Arc<Self> {
            Arc::new(Self {
                offers,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl OfferSource for CountingSource {
        fn fetch_offers(&self, _key: &ActualKey) -> Result<Vec<FetchedOffer>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.offers.clone())
        }
    }

    struct FailingSource;

    impl OfferSource for FailingSource {
        fn fetch_offers(&self, _key: &ActualKey) -> Result<Vec<FetchedOffer>> {
            bail!("connection refused")
        }
    }

    struct SlowSource;

    impl OfferSource for SlowSource {
        fn fetch_offers(&self, _key: &ActualKey) -> Result<Vec<FetchedOffer>> {
            std::thread::sleep(Duration::from_secs(2));
            Ok(Vec::new())
        }
    }

    struct ReadOnlyCache;

    impl VendorCache for ReadOnlyCache {
        fn get(&self, _name: &str) -> Result<Option<CacheRecord>, CacheError> {
            Ok(None)
        }

        fn put(&self, _name: &str, _record: &CacheRecord) -> Result<(), CacheError> {
            Err(CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    fn resistor() -> ChoicePart {
        let mut choice = ChoicePart::new("10K;1608", "R_0603", "10K resistor");
        choice
            .set_actual_parts(vec![
                ActualPart::new("Yageo", "RC0603FR-0710KL"),
                ActualPart::new("Vishay", "CRCW060310K0FKEA"),
            ])
            .unwrap();
        choice.required_quantity = 10;
        choice
    }

    fn refresher(cache: Arc<dyn VendorCache>, source: Arc<dyn OfferSource>) -> Refresher {
        let config = SourcingConfig {
            currency_rates: BTreeMap::from([("EUR".to_string(), 1.25)]),
            ..SourcingConfig::default()
        };
        let rates = Arc::new(FixedRates::from_config(&config));
        Refresher::new(cache, source, rates, &config)
    }

    fn stamped(seconds_ago: i64) -> ActualPart {
        let mut actual = ActualPart::new("Yageo", "RC0603FR-0710KL");
        actual.vendor_parts = vec![
            VendorPart::new(
                "Mouser",
                "M-1",
                10,
                vec![PriceBreak::new(1, 1.0).unwrap()],
                now() - chrono::Duration::seconds(seconds_ago),
            )
            .unwrap(),
        ];
        actual
    }

    #[test]
    fn test_staleness_boundaries() {
        let staleness = chrono::Duration::seconds(DEFAULT_STALENESS);
        assert!(!is_fresh(&stamped(DEFAULT_STALENESS + 1), now(), staleness));
        assert!(!is_fresh(&stamped(DEFAULT_STALENESS), now(), staleness));
        assert!(is_fresh(&stamped(DEFAULT_STALENESS - 1), now(), staleness));
        assert!(!is_fresh(
            &ActualPart::new("Yageo", "RC0603FR-0710KL"),
            now(),
            staleness
        ));
    }

    const DEFAULT_STALENESS: i64 = crate::config::DEFAULT_STALENESS_SECONDS;

    #[test]
    fn test_second_refresh_uses_cache() {
        let cache = Arc::new(MemoryCache::new());
        let source = CountingSource::new(vec![offer("Mouser", "USD", 0.1), offer("Digi-Key", "USD", 0.09)]);
        let refresher = refresher(cache.clone(), source.clone());

        let mut first = vec![resistor()];
        assert!(refresher.refresh_all(&mut first, now()).unwrap().is_empty());
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.len(), 1);

        let mut second = vec![resistor()];
        let later = now() + chrono::Duration::hours(1);
        assert!(refresher.refresh_all(&mut second, later).unwrap().is_empty());
        assert_eq!(source.calls(), 2);

        first[0].select(&BTreeSet::new());
        second[0].select(&BTreeSet::new());
        assert_eq!(first[0].selection(), second[0].selection());
        assert_eq!(first[0].actual_parts(), second[0].actual_parts());
    }

    #[test]
    fn test_stale_record_refetched() {
        let cache = Arc::new(MemoryCache::new());
        let source = CountingSource::new(vec![offer("Mouser", "USD", 0.1)]);
        let refresher = refresher(cache, source.clone());

        refresher.refresh_choice_part(&mut resistor(), now());
        let later = now() + chrono::Duration::seconds(DEFAULT_STALENESS + 1);
        let mut part = resistor();
        refresher.refresh_choice_part(&mut part, later);

        assert_eq!(source.calls(), 4);
        assert!(
            part.actual_parts()
                .iter()
                .all(|ap| ap.oldest_fetch() == Some(later))
        );
    }

    #[test]
    fn test_changed_candidates_rewrite_record() {
        let cache = Arc::new(MemoryCache::new());
        let source = CountingSource::new(vec![offer("Mouser", "USD", 0.1)]);
        let refresher = refresher(cache.clone(), source.clone());
        refresher.refresh_choice_part(&mut resistor(), now());

        let mut part = resistor();
        part.set_actual_parts(vec![ActualPart::new("Yageo", "RC0603FR-0710KL")])
            .unwrap();
        refresher.refresh_choice_part(&mut part, now());

        // The remaining candidate was fresh, but the record still shrinks.
        assert_eq!(source.calls(), 2);
        let record = cache.get("10K;1608").unwrap().unwrap();
        assert_eq!(record.actual_parts.len(), 1);
    }

    #[test]
    fn test_part_without_offers_is_refetched() {
        let cache = Arc::new(MemoryCache::new());
        let source = CountingSource::new(vec![]);
        let refresher = refresher(cache, source.clone());

        refresher.refresh_choice_part(&mut resistor(), now());
        refresher.refresh_choice_part(&mut resistor(), now());
        assert_eq!(source.calls(), 4);
    }

    #[test]
    fn test_fetch_failure_means_no_offers() {
        let refresher = refresher(Arc::new(MemoryCache::new()), Arc::new(FailingSource));
        let mut part = resistor();
        let issues = refresher.refresh_choice_part(&mut part, now());

        assert_eq!(issues.len(), 2);
        assert!(matches!(
            &issues[0],
            Issue::FetchFailure { message, .. } if message.contains("connection refused")
        ));
        assert!(part.actual_parts().iter().all(|ap| ap.vendor_parts.is_empty()));
        assert!(part.select(&BTreeSet::new()));
    }

    #[test]
    fn test_fetch_timeout() {
        let refresher = refresher(Arc::new(MemoryCache::new()), Arc::new(SlowSource))
            .with_timeout(Duration::from_millis(50));
        let mut part = ChoicePart::new("LM358;SOIC8", "SOIC-8", "Dual op-amp");
        part.set_actual_parts(vec![ActualPart::new("TI", "LM358DR")])
            .unwrap();

        let issues = refresher.refresh_choice_part(&mut part, now());
        assert_eq!(issues.len(), 1);
        assert!(issues[0].to_string().contains("timed out"));
    }

    #[test]
    fn test_currency_conversion() {
        let source = CountingSource::new(vec![offer("Farnell", "EUR", 0.08), offer("Akizuki", "JPY", 10.0)]);
        let refresher = refresher(Arc::new(MemoryCache::new()), source);
        let mut part = ChoicePart::new("LM358;SOIC8", "SOIC-8", "Dual op-amp");
        part.set_actual_parts(vec![ActualPart::new("TI", "LM358DR")])
            .unwrap();

        let issues = refresher.refresh_choice_part(&mut part, now());
        assert_eq!(
            issues,
            vec![Issue::UnconvertibleCurrency {
                part: "LM358;SOIC8".to_string(),
                vendor: "Akizuki".to_string(),
                currency: "JPY".to_string(),
            }]
        );
        let vendor_parts = &part.actual_parts()[0].vendor_parts;
        assert_eq!(vendor_parts.len(), 1);
        assert!((vendor_parts[0].price_breaks()[0].unit_price - 0.1).abs() < 1e-12);
        assert_eq!(vendor_parts[0].fetched_at, now());
    }

    #[test]
    fn test_record_in_other_currency_is_refetched() {
        let cache = Arc::new(MemoryCache::new());
        let source = CountingSource::new(vec![offer("Farnell", "EUR", 0.08)]);
        let opamp = || {
            let mut part = ChoicePart::new("LM358;SOIC8", "SOIC-8", "Dual op-amp");
            part.set_actual_parts(vec![ActualPart::new("TI", "LM358DR")])
                .unwrap();
            part
        };
        let unit_price =
            |part: &ChoicePart| part.actual_parts()[0].vendor_parts[0].price_breaks()[0].unit_price;

        let mut part = opamp();
        refresher(cache.clone(), source.clone()).refresh_choice_part(&mut part, now());
        assert!((unit_price(&part) - 0.1).abs() < 1e-12);

        let config = SourcingConfig {
            currency: "EUR".to_string(),
            currency_rates: BTreeMap::from([("USD".to_string(), 0.8)]),
            ..SourcingConfig::default()
        };
        let rates = Arc::new(FixedRates::from_config(&config));
        let eur = Refresher::new(cache.clone(), source.clone(), rates, &config);

        let mut part = opamp();
        let issues = eur.refresh_choice_part(&mut part, now() + chrono::Duration::hours(1));
        assert!(issues.is_empty());
        assert_eq!(source.calls(), 2);
        assert!((unit_price(&part) - 0.08).abs() < 1e-12);
        assert_eq!(cache.get("LM358;SOIC8").unwrap().unwrap().currency, "EUR");
    }

    #[test]
    fn test_failed_refetch_keeps_cached_offers() {
        let cache = Arc::new(MemoryCache::new());
        let source = CountingSource::new(vec![offer("Mouser", "USD", 0.1)]);
        refresher(cache.clone(), source).refresh_choice_part(&mut resistor(), now());
        let stored = cache.get("10K;1608").unwrap().unwrap();

        let later = now() + chrono::Duration::seconds(DEFAULT_STALENESS + 1);
        let mut part = resistor();
        let issues =
            refresher(cache.clone(), Arc::new(FailingSource)).refresh_choice_part(&mut part, later);

        assert_eq!(issues.len(), 2);
        assert!(part.actual_parts().iter().all(|ap| ap.vendor_parts.is_empty()));
        assert_eq!(cache.get("10K;1608").unwrap().unwrap(), stored);
    }

    #[test]
    fn test_corrupt_cache_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        std::fs::write(cache.path_for("10K;1608"), "garbage").unwrap();

        let source = CountingSource::new(vec![offer("Mouser", "USD", 0.1)]);
        let refresher = refresher(Arc::new(cache.clone()), source.clone());
        let issues = refresher.refresh_choice_part(&mut resistor(), now());

        assert!(matches!(issues.as_slice(), [Issue::CacheReadFailure { .. }]));
        assert_eq!(source.calls(), 2);
        // The record was rewritten and reads back cleanly.
        assert!(cache.get("10K;1608").unwrap().is_some());
    }

    #[test]
    fn test_write_failure_reported() {
        let source = CountingSource::new(vec![offer("Mouser", "USD", 0.1)]);
        let refresher = refresher(Arc::new(ReadOnlyCache), source);
        let mut part = resistor();
        let issues = refresher.refresh_choice_part(&mut part, now());

        assert!(matches!(issues.as_slice(), [Issue::CacheWriteFailure { .. }]));
        assert!(!part.select(&BTreeSet::new()));
    }
}
