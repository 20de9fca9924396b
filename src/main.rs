//! fare-harvest main entry point
//!
//! This is the command-line interface for the fare-harvest crawler.

use anyhow::Context;
use clap::Parser;
use fare_harvest::config::{load_config_with_hash, validate, Config};
use fare_harvest::crawler::run_crawl;
use fare_harvest::output::{load_statistics, print_statistics, print_summary};
use fare_harvest::storage::open_ledger;
use fare_harvest::targets::{generate, TargetSpec};
use fare_harvest::url::render_target_url;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// fare-harvest: a polite, resumable fare-calendar crawler
///
/// fare-harvest walks every origin/destination/date combination of its
/// configuration, extracts prices with a selector rule and appends them to
/// a CSV file. Interrupted runs resume from the checkpoint.
#[derive(Parser, Debug)]
#[command(name = "fare-harvest")]
#[command(version)]
#[command(about = "A polite, resumable fare-calendar crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Discard the checkpoint and start a new run
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "fresh"])]
    dry_run: bool,

    /// Show run history from the ledger and exit
    #[arg(long, conflicts_with_all = ["dry_run", "fresh"])]
    stats: bool,

    /// Override the output directory
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Override the number of crawl workers
    #[arg(long, value_name = "N")]
    concurrency: Option<u32>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("invalid configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    apply_overrides(&mut config, &cli)?;

    if cli.dry_run {
        handle_dry_run(&config)?;
        Ok(ExitCode::SUCCESS)
    } else if cli.stats {
        handle_stats(&config)?;
        Ok(ExitCode::SUCCESS)
    } else {
        handle_crawl(config, &config_hash, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("fare_harvest=info,warn"),
            1 => EnvFilter::new("fare_harvest=debug,info"),
            2 => EnvFilter::new("fare_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Applies command-line overrides and revalidates
fn apply_overrides(config: &mut Config, cli: &Cli) -> anyhow::Result<()> {
    if let Some(dir) = &cli.output_dir {
        config.output.directory = dir.to_string_lossy().into_owned();
    }
    if let Some(concurrency) = cli.concurrency {
        config.crawler.concurrency = concurrency;
    }
    if cli.output_dir.is_some() || cli.concurrency.is_some() {
        validate(config).context("invalid command-line override")?;
    }
    Ok(())
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== fare-harvest Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers: {}", config.crawler.concurrency);
    println!(
        "  Max requests per domain: {}",
        config.crawler.max_domain_concurrency
    );
    println!("  Request spacing: {}ms", config.crawler.request_spacing);
    println!("  Max attempts: {}", config.crawler.max_attempts);
    println!(
        "  Flush: every {} records or {}s",
        config.crawler.flush_threshold, config.crawler.flush_interval
    );

    println!("\nRoutes:");
    println!("  Origins: {}", config.routes.origins.join(", "));
    println!("  Destinations: {}", config.routes.destinations.join(", "));
    if let Some(end) = config.routes.end_date {
        println!("  Dates: {} to {}", config.routes.start_date, end);
    }
    println!("  Granularity: {:?}", config.routes.granularity);

    println!("\nRequests:");
    println!("  Template: {}", config.request.url_template);
    println!(
        "  User agents: {}",
        config.request.user_agent_pool().len()
    );
    println!(
        "  robots.txt: {}",
        if config.request.respect_robots {
            "respected"
        } else {
            "ignored"
        }
    );

    println!("\nOutput:");
    println!("  Directory: {}", config.output.directory);
    println!("  Checkpoint: {}", config.output.state_path);
    println!("  Ledger: {}", config.output.ledger_path);

    let spec = TargetSpec::from_routes(&config.routes);
    let count = spec.target_count().unwrap_or(0);
    if let Some(first) = generate(&spec)?.next() {
        let url = render_target_url(&config.request.url_template, &first)?;
        println!("\nFirst target: {} -> {}", first, url);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would crawl {} targets", count);

    Ok(())
}

/// Handles the --stats mode: shows run history from the ledger
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Ledger: {}\n", config.output.ledger_path);

    let ledger = open_ledger(Path::new(&config.output.ledger_path))?;
    let stats = load_statistics(&ledger)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<ExitCode> {
    if fresh {
        tracing::info!("Starting fresh run (discarding checkpoint)");
    } else {
        tracing::info!("Starting crawl (will resume from checkpoint if one exists)");
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing in-flight requests");
            on_signal.cancel();
        }
    });

    let outcome = run_crawl(config, config_hash, fresh, cancel).await?;
    print_summary(&outcome.summary);

    if let Some(error) = &outcome.error {
        tracing::error!("Run {} aborted: {}", outcome.run_id, error);
    }

    Ok(ExitCode::from(outcome.exit_code()))
}
