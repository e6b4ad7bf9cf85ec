//! Part sourcing engine for multi-project PCB orders.
//!
//! The crate turns a set of projects (each built some number of times) into a
//! purchasing plan:
//!
//! * [`demand`] resolves every placement through the [`catalog`] into one
//!   [`ChoicePart`] per logical part and sums the required quantity.
//! * [`refresh`] brings each choice part's vendor offers up to date, reusing
//!   [`cache`] records that are younger than the staleness window and asking
//!   an [`source::OfferSource`] for the rest.
//! * [`ChoicePart::select`] picks the cheapest feasible offer/price-break for a
//!   single part, and [`optimize`] greedily drops vendors whose savings do not
//!   cover the cost of another shipment.
//! * [`report`] renders the selected order as text listings, per-vendor CSV
//!   files and JSON.
//!
//! [`order::OrderProcessor`] ties the stages together.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod currency;
pub mod demand;
pub mod error;
pub mod model;
pub mod optimize;
pub mod order;
pub mod refresh;
pub mod report;
mod select;
pub mod source;

pub use catalog::Catalog;
pub use config::SourcingConfig;
pub use demand::{Project, ProjectPart};
pub use error::{CacheError, CatalogError, ConfigError, Issue, ModelError};
pub use model::{
    ActualKey, ActualPart, ChoicePart, Placement, PriceBreak, Selection, VendorKey, VendorPart,
};
pub use order::{OrderOutcome, OrderProcessor};
pub use report::{Listing, Report};
