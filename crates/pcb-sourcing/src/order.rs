//! One order run, from project placements to a purchasing report.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::cache::VendorCache;
use crate::catalog::Catalog;
use crate::config::SourcingConfig;
use crate::currency::{CurrencyConverter, FixedRates};
use crate::demand::{Project, aggregate_demand};
use crate::error::Issue;
use crate::model::ChoicePart;
use crate::optimize::{Exclusion, Optimizer};
use crate::refresh::Refresher;
use crate::report::Report;
use crate::source::OfferSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AggregateDemand,
    RefreshCaches,
    Optimize,
    FinalSelect,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::AggregateDemand => "aggregate demand",
            Stage::RefreshCaches => "refresh caches",
            Stage::Optimize => "optimize vendors",
            Stage::FinalSelect => "final selection",
            Stage::Report => "report",
        };
        f.write_str(name)
    }
}

/// Result of [`OrderProcessor::run`].
#[derive(Debug)]
pub struct OrderOutcome {
    pub choice_parts: Vec<ChoicePart>,
    pub excluded_vendor_names: BTreeSet<String>,
    pub exclusions: Vec<Exclusion>,
    pub issues: Vec<Issue>,
    pub report: Report,
}

pub struct OrderProcessor {
    catalog: Catalog,
    config: SourcingConfig,
    cache: Arc<dyn VendorCache>,
    source: Arc<dyn OfferSource>,
    converter: Arc<dyn CurrencyConverter>,
    now: DateTime<Utc>,
}

impl OrderProcessor {
    pub fn new(
        catalog: Catalog,
        config: SourcingConfig,
        cache: Arc<dyn VendorCache>,
        source: Arc<dyn OfferSource>,
    ) -> Self {
        let converter = Arc::new(FixedRates::from_config(&config));
        Self {
            catalog,
            config,
            cache,
            source,
            converter,
            now: Utc::now(),
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn CurrencyConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Clock used for staleness checks and fetch stamps.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn config(&self) -> &SourcingConfig {
        &self.config
    }

    pub fn run(&self, projects: &[Project]) -> Result<OrderOutcome> {
        self.config.validate()?;

        stage(Stage::AggregateDemand);
        let demand =
            aggregate_demand(&self.catalog, projects).context("failed to aggregate part demand")?;
        let mut parts = demand.choice_parts;
        let mut issues = demand.issues;
        log::info!(
            "{} distinct parts across {} projects",
            parts.len(),
            projects.len()
        );

        stage(Stage::RefreshCaches);
        let refresher = Refresher::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.source),
            Arc::clone(&self.converter),
            &self.config,
        );
        issues.extend(refresher.refresh_all(&mut parts, self.now)?);

        stage(Stage::Optimize);
        let mut excluded = BTreeSet::new();
        let exclusions = Optimizer::new(&self.config).run(&mut parts, &mut excluded);

        stage(Stage::FinalSelect);
        for part in parts.iter_mut() {
            if part.select(&excluded) {
                log::warn!("No vendor offers found for '{}'", part.name);
                issues.push(Issue::MissingOffer {
                    part: part.name.clone(),
                });
            }
        }

        stage(Stage::Report);
        let report = Report::new(
            &parts,
            &excluded,
            &exclusions,
            &issues,
            &self.config.currency,
        );
        log::info!(
            "Order total {:.2} {} from {} vendors",
            report.total_cost,
            self.config.currency,
            report.vendor_subtotals.len()
        );

        Ok(OrderOutcome {
            choice_parts: parts,
            excluded_vendor_names: excluded,
            exclusions,
            issues,
            report,
        })
    }
}

fn stage(stage: Stage) {
    log::info!("Stage: {stage}");
}
