use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use comfy_table::Table;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use env_logger::Env;
use pcb_sourcing::cache::{FileCache, MemoryCache, SqliteCache, VendorCache};
use pcb_sourcing::demand::OrderFile;
use pcb_sourcing::source::OfferFile;
use pcb_sourcing::{Catalog, OrderOutcome, OrderProcessor, SourcingConfig};

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
enum CacheKind {
    /// One JSON file per part
    #[default]
    File,
    /// A single SQLite database
    Sqlite,
    /// Keep offers in memory for this run only
    None,
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKind::File => write!(f, "file"),
            CacheKind::Sqlite => write!(f, "sqlite"),
            CacheKind::None => write!(f, "none"),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default)]
enum OrderFormat {
    #[default]
    Table,
    Json,
}

impl std::fmt::Display for OrderFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderFormat::Table => write!(f, "table"),
            OrderFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "pcb-order")]
#[command(about = "Pick vendors and quantities for the parts of a multi-board order", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug", hide = true)]
    debug: bool,

    /// Order file listing the projects to build
    #[arg(value_name = "ORDER", value_hint = clap::ValueHint::FilePath)]
    order: PathBuf,

    /// Part catalog (choice, alias and fractional parts)
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    catalog: PathBuf,

    /// JSON file of vendor offers to fetch from
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    offers: Option<PathBuf>,

    /// Sourcing configuration (sourcing.toml)
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Directory to write the listings and per-vendor CSV files to
    #[arg(short, long, value_name = "DIR", value_hint = clap::ValueHint::DirPath)]
    output: Option<PathBuf>,

    /// Where fetched offers are cached between runs
    #[arg(long, default_value_t = CacheKind::File)]
    cache: CacheKind,

    /// Cache location (defaults to the user cache directory)
    #[arg(long, value_name = "DIR", value_hint = clap::ValueHint::DirPath)]
    cache_dir: Option<PathBuf>,

    /// Only order from these vendors (comma separated); skips vendor reduction
    #[arg(long, value_name = "VENDOR", value_delimiter = ',')]
    vendors: Vec<String>,

    /// Savings below which an extra vendor is not worth a shipment
    #[arg(long, value_name = "AMOUNT")]
    shipping_threshold: Option<f64>,

    /// Number of parallel offer fetches
    #[arg(short = 'j', long, value_name = "N")]
    jobs: Option<usize>,

    /// Output format
    #[arg(short, long, default_value_t = OrderFormat::Table)]
    format: OrderFormat,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {e}", "Error:".red());
        for cause in e.chain().skip(1) {
            eprintln!("  {cause}");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Default level depends on --debug (overridden by RUST_LOG)
    let env = if cli.debug {
        Env::default().default_filter_or("debug")
    } else {
        Env::default().default_filter_or("error")
    };
    env_logger::Builder::from_env(env).init();

    let config = load_config(&cli)?;
    let catalog = Catalog::from_path(&cli.catalog)?;
    let order = OrderFile::from_path(&cli.order)?;
    let offers = match &cli.offers {
        Some(path) => OfferFile::from_path(path)?,
        None => {
            log::warn!("No --offers given; only cached offers will be used");
            OfferFile::default()
        }
    };
    let cache = open_cache(cli.cache, cli.cache_dir.as_deref())?;

    let processor = OrderProcessor::new(catalog, config, cache, Arc::new(offers));
    let outcome = processor.run(&order.projects)?;

    if let Some(dir) = &cli.output {
        let written = outcome.report.write_all(dir)?;
        for path in written {
            log::debug!("Wrote {}", path.display());
        }
    }

    let mut writer = io::stdout().lock();
    match cli.format {
        OrderFormat::Json => writeln!(writer, "{}", outcome.report.to_json()?)?,
        OrderFormat::Table => write_summary(&outcome, processor.config(), writer)?,
    }
    Ok(())
}

/// `sourcing.toml` with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<SourcingConfig> {
    let mut config = match &cli.config {
        Some(path) => SourcingConfig::from_path(path)?,
        None => SourcingConfig::default(),
    };
    if !cli.vendors.is_empty() {
        config.selected_vendor_names = Some(cli.vendors.iter().cloned().collect());
    }
    if let Some(threshold) = cli.shipping_threshold {
        config.shipping_threshold = threshold;
    }
    if let Some(jobs) = cli.jobs {
        config.fetch_jobs = jobs;
    }
    config
        .validate()
        .context("invalid command-line overrides")?;
    Ok(config)
}

fn open_cache(kind: CacheKind, dir: Option<&Path>) -> Result<Arc<dyn VendorCache>> {
    if kind == CacheKind::None {
        return Ok(Arc::new(MemoryCache::new()));
    }
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::cache_dir()
            .context("could not determine a cache directory; pass --cache-dir")?
            .join("pcb")
            .join("order"),
    };
    log::debug!("Using {} offer cache in {}", kind, dir.display());
    Ok(match kind {
        CacheKind::Sqlite => Arc::new(
            SqliteCache::open(&dir.join("offers.db"))
                .with_context(|| format!("failed to open offer cache in {}", dir.display()))?,
        ),
        _ => Arc::new(FileCache::new(dir)),
    })
}

fn write_summary<W: Write>(outcome: &OrderOutcome, config: &SourcingConfig, mut writer: W) -> io::Result<()> {
    let report = &outcome.report;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(comfy_table::ContentArrangement::DynamicFullWidth);
    table.set_header(vec!["Vendor", "Lines", "Subtotal"]);
    for subtotal in &report.vendor_subtotals {
        table.add_row(vec![
            subtotal.vendor_name.clone(),
            subtotal.line_count.to_string(),
            format!("{:.2}", subtotal.total_cost),
        ]);
    }
    table.add_row(vec![
        "Total".to_string(),
        report
            .vendor_subtotals
            .iter()
            .map(|s| s.line_count)
            .sum::<usize>()
            .to_string(),
        format!("{:.2} {}", report.total_cost, config.currency),
    ]);
    writeln!(writer, "{table}")?;

    if !report.exclusions.is_empty() {
        writeln!(writer)?;
        writeln!(writer, "{}", "Vendor reduction:".bold())?;
        for exclusion in &report.exclusions {
            writeln!(writer, "  {exclusion}")?;
        }
    }

    if !report.issues.is_empty() {
        writeln!(writer)?;
        writeln!(writer, "{}", "Issues:".yellow().bold())?;
        for issue in &report.issues {
            writeln!(writer, "  {} {issue}", "warning:".yellow())?;
        }
    }
    Ok(())
}
