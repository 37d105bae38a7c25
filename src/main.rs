mod dataset;
mod enrich;
mod extract;
mod harvest;
mod model;
mod renderer;
mod rules;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::dataset::Dataset;
use crate::renderer::chrome::ChromeRendererFactory;
use crate::renderer::http::HttpRendererFactory;
use crate::renderer::RendererFactory;
use crate::rules::ExtractRules;

const DEFAULT_BASE_URL: &str = "https://pay.verychat.io/shops";

#[derive(Parser)]
#[command(name = "shop_scraper", about = "VeryChat shop directory scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover the full listing and record base shop entries
    Harvest {
        #[command(flatten)]
        source: SourceOpts,
        #[command(flatten)]
        common: CommonOpts,
    },
    /// Render detail pages for known shops and merge extracted attributes
    Enrich {
        #[command(flatten)]
        common: CommonOpts,
        #[command(flatten)]
        enrich: EnrichOpts,
    },
    /// Harvest + enrich in one pipeline
    Run {
        #[command(flatten)]
        source: SourceOpts,
        #[command(flatten)]
        common: CommonOpts,
        #[command(flatten)]
        enrich: EnrichOpts,
    },
    /// Dataset field coverage summary
    Stats {
        /// Dataset file
        #[arg(short, long, default_value = "data/shops.json")]
        out: PathBuf,
        /// Also list up to N shops
        #[arg(short = 'n', long, default_value_t = 0)]
        limit: usize,
    },
}

#[derive(Args)]
struct SourceOpts {
    /// Listing page to harvest
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,
}

#[derive(Args)]
struct CommonOpts {
    /// Dataset file (JSON array of shop records)
    #[arg(short, long, default_value = "data/shops.json")]
    out: PathBuf,
    /// Fetch pages with plain HTTP instead of headless Chrome
    #[arg(long)]
    http: bool,
    /// Show the browser window
    #[arg(long, conflicts_with = "http")]
    headed: bool,
    /// Seconds to wait for a page render
    #[arg(long, default_value_t = 10)]
    wait: u64,
    /// Seconds to let dynamic content settle after navigation or a pagination advance
    #[arg(long, default_value_t = 1.5)]
    settle: f64,
}

impl CommonOpts {
    fn wait_duration(&self) -> Duration {
        Duration::from_secs(self.wait)
    }

    fn settle_duration(&self) -> Duration {
        Duration::from_secs_f64(self.settle)
    }
}

#[derive(Args)]
struct EnrichOpts {
    /// Concurrent detail-page workers
    #[arg(short = 'c', long, default_value_t = 5)]
    concurrency: usize,
    /// Skip shops that already have phone, hours and description
    #[arg(long)]
    skip_enriched: bool,
    /// Max shops to enrich this run
    #[arg(short = 'n', long)]
    limit: Option<usize>,
    /// Extraction rules TOML overriding the built-in keyword sets
    #[arg(long)]
    rules: Option<PathBuf>,
    /// Commit the dataset every N merged results (0 = only at the end)
    #[arg(long, default_value_t = 0)]
    checkpoint: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Harvest { source, common } => {
            let mut dataset = Dataset::load(&common.out)?;
            harvest_into(&mut dataset, &source, &common).await?;
            Ok(())
        }
        Commands::Enrich { common, enrich } => {
            let mut dataset = Dataset::load(&common.out)?;
            if dataset.is_empty() {
                println!("No shops known at {}. Run 'harvest' first.", common.out.display());
                return Ok(());
            }
            enrich_into(&mut dataset, &common, &enrich).await
        }
        Commands::Run { source, common, enrich } => {
            let mut dataset = Dataset::load(&common.out)?;
            harvest_into(&mut dataset, &source, &common).await?;
            enrich_into(&mut dataset, &common, &enrich).await
        }
        Commands::Stats { out, limit } => stats(&out, limit),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn harvest_into(
    dataset: &mut Dataset,
    source: &SourceOpts,
    common: &CommonOpts,
) -> Result<()> {
    let factory = build_factory(common).await?;
    let session = factory
        .open_session()
        .await
        .map_err(|e| anyhow::anyhow!("could not open a discovery session: {e}"))?;

    println!("Harvesting listing at {} ...", source.base_url);
    let shops = harvest::harvest(session.as_ref(), &source.base_url, common.settle_duration()).await?;
    let (added, known) = dataset.absorb(shops);
    dataset.commit(&common.out)?;
    println!(
        "Discovered {} shops ({} new, {} already known); dataset now {} -> {}",
        added + known,
        added,
        known,
        dataset.len(),
        common.out.display()
    );
    Ok(())
}

async fn enrich_into(dataset: &mut Dataset, common: &CommonOpts, opts: &EnrichOpts) -> Result<()> {
    let targets = dataset.enrich_targets(opts.skip_enriched, opts.limit);
    if targets.is_empty() {
        println!("Nothing to enrich.");
        return Ok(());
    }

    let rules = Arc::new(ExtractRules::load(opts.rules.as_deref())?);
    let factory = build_factory(common).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("stop requested; letting in-flight pages finish");
                cancel.cancel();
            }
        });
    }

    println!("Enriching {} shops ({} workers)...", targets.len(), opts.concurrency);
    let report = enrich::run_enrichment(
        factory,
        rules,
        targets,
        &enrich::EnrichOptions {
            concurrency: opts.concurrency,
            checkpoint_every: opts.checkpoint,
            out: common.out.clone(),
        },
        cancel,
        dataset,
    )
    .await?;

    dataset.commit(&common.out)?;
    println!(
        "Done: {} enriched, {} failed, {} skipped -> {}",
        report.ok,
        report.failures.len(),
        report.skipped(),
        common.out.display()
    );
    // Failures are a warning, not a failed run; the listing data survives.
    for failure in report.failures.iter().take(10) {
        println!("  failed {}: {}", failure.id, failure.reason);
    }
    if report.failures.len() > 10 {
        println!("  ... and {} more", report.failures.len() - 10);
    }
    Ok(())
}

fn stats(out: &Path, limit: usize) -> Result<()> {
    let dataset = Dataset::load(out)?;
    if dataset.is_empty() {
        println!("No dataset at {}.", out.display());
        return Ok(());
    }
    let s = dataset.stats();
    println!("Shops:        {}", s.total);
    println!("With link:    {}", s.with_link);
    println!("Phone:        {}", s.with_phone);
    println!("Hours:        {}", s.with_hours);
    println!("Description:  {}", s.with_description);
    println!("Enriched:     {}", s.fully_enriched);
    println!("Pay methods:  {}", s.payment_method_entries);

    if limit > 0 {
        println!(
            "\n{:>3} | {:<24} | {:<10} | {:<14} | {:<8}",
            "#", "Shop", "Category", "Phone", "Detail"
        );
        println!("{}", "-".repeat(72));
        for (i, shop) in dataset.shops().iter().take(limit).enumerate() {
            let detail = if shop.fully_enriched() { "yes" } else { "-" };
            println!(
                "{:>3} | {:<24} | {:<10} | {:<14} | {:<8}",
                i + 1,
                truncate(&shop.name, 24),
                truncate(&shop.category, 10),
                shop.phone,
                detail
            );
        }
        println!("\n{} of {} shops shown", limit.min(dataset.len()), dataset.len());
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

async fn build_factory(common: &CommonOpts) -> Result<Arc<dyn RendererFactory>> {
    if common.http {
        Ok(Arc::new(HttpRendererFactory::new(common.wait_duration())?))
    } else {
        let factory = ChromeRendererFactory::launch(
            !common.headed,
            common.wait_duration(),
            common.settle_duration(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("could not launch browser: {e}"))?;
        Ok(Arc::new(factory))
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
