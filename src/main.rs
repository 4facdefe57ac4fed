//! Paged-Sweep main entry point
//!
//! This is the command-line interface for running a single paginated scrape.

use clap::Parser;
use futures::StreamExt;
use paged_sweep::config::{load_config_with_hash, Config};
use paged_sweep::fetch::{FetchOptions, ServiceClient};
use paged_sweep::output::{
    print_statistics, write_record_line, write_results, write_statistics, ResultFile,
    ScrapeStatistics,
};
use paged_sweep::scrape::PageStatus;
use paged_sweep::{
    Coordinator, ExtractorRegistry, PageCaps, PageUrlBuilder, RequestDescriptor, ScrapeOutcome,
    ScrapeRequest,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Paged-Sweep: paginated concurrent scraping through a managed fetch service
///
/// Paged-Sweep fetches a seed page, reads its pagination metadata, and
/// scrapes the remaining pages concurrently, keeping records in page order.
#[derive(Parser, Debug)]
#[command(name = "paged-sweep")]
#[command(version = "1.0.0")]
#[command(about = "Paginated concurrent scraping through a managed fetch service", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// URL of the first page to scrape
    #[arg(long, value_name = "URL")]
    url: String,

    /// Target type selecting the extractor
    #[arg(long, default_value = "search_listing")]
    target: String,

    /// Maximum number of pages, seed included
    #[arg(long)]
    max_pages: Option<usize>,

    /// Maximum number of records, rounded up to whole pages
    #[arg(long)]
    max_items: Option<usize>,

    /// Page-URL policy: page, query:NAME, offset:NAME or cursor:NAME
    #[arg(long, value_name = "POLICY")]
    paging: Option<PageUrlBuilder>,

    /// Fetch option override, e.g. -o render_js=true (repeatable)
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Write the outcome as JSON to this file
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print records to stdout as JSON lines while the scrape runs
    #[arg(long)]
    stream: bool,

    /// Validate config and show what would be scraped without fetching
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let request = build_request(&cli, &config)?;

    if cli.dry_run {
        handle_dry_run(&config, &request);
        return Ok(());
    }

    let outcome = handle_scrape(&cli, &config, request).await?;

    if !cli.quiet {
        let stats = ScrapeStatistics::from_outcome(&outcome);
        if cli.stream {
            // Streamed records own stdout
            write_statistics(&mut std::io::stderr().lock(), &stats)?;
        } else {
            print_statistics(&stats);
        }
    }

    if let Some(path) = &cli.output {
        let result = ResultFile {
            seed_url: &cli.url,
            target: &cli.target,
            caps: caps(&cli),
            scraped_at: chrono::Utc::now(),
            config_hash: &config_hash,
            outcome: &outcome,
        };
        write_results(path, &result)?;
        tracing::info!("Results written to {}", path.display());
    }

    if outcome.is_fatal() {
        let cause = match outcome.failures().next().map(|page| &page.status) {
            Some(PageStatus::Failed { kind, cause }) => format!("{} ({})", kind, cause),
            _ => String::from("unknown failure"),
        };
        return Err(format!("seed page could not be scraped: {}", cause).into());
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("paged_sweep=info,warn"),
            1 => EnvFilter::new("paged_sweep=debug,info"),
            2 => EnvFilter::new("paged_sweep=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Logs go to stderr so streamed records own stdout
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn caps(cli: &Cli) -> PageCaps {
    PageCaps::new()
        .with_max_pages(cli.max_pages.unwrap_or(0))
        .with_max_items(cli.max_items.unwrap_or(0))
}

/// Builds the scrape request from the config defaults and CLI overrides
fn build_request(cli: &Cli, config: &Config) -> Result<ScrapeRequest, Box<dyn std::error::Error>> {
    let overrides = cli
        .options
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .ok_or_else(|| format!("fetch option must be KEY=VALUE, got '{}'", pair))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let options: FetchOptions = config.fetch.clone().with_overrides(overrides)?;

    let seed = RequestDescriptor::parse(&cli.url)?.with_options(options);
    let mut request = ScrapeRequest::new(seed, cli.target.clone()).with_caps(caps(cli));
    if let Some(paging) = &cli.paging {
        request = request.with_paging(paging.clone());
    }
    Ok(request)
}

/// Handles the --dry-run mode: validates input and shows what would be scraped
fn handle_dry_run(config: &Config, request: &ScrapeRequest) {
    println!("=== Paged-Sweep Dry Run ===\n");

    println!("Service:");
    println!("  Endpoint: {}", config.service.endpoint);
    let credential = match std::env::var(&config.service.key_env) {
        Ok(value) if !value.trim().is_empty() => "set",
        _ => "NOT SET",
    };
    println!("  Credential ({}): {}", config.service.key_env, credential);

    println!("\nScrape:");
    println!("  Seed: {}", request.seed.url());
    let registry = ExtractorRegistry::with_defaults();
    if registry.contains(&request.target) {
        println!("  Target: {}", request.target);
    } else {
        println!(
            "  Target: {} (UNKNOWN; registered: {})",
            request.target,
            registry.target_types().join(", ")
        );
    }
    println!("  Concurrency: {}", config.scrape.concurrency);
    println!("  Page ceiling: {}", config.scrape.page_ceiling);
    match request.caps.max_pages {
        Some(max) => println!("  Max pages: {}", max),
        None => println!("  Max pages: (none)"),
    }
    match request.caps.max_items {
        Some(max) => println!("  Max items: {}", max),
        None => println!("  Max items: (none)"),
    }
    match config.scrape.deadline_ms {
        Some(ms) => println!("  Deadline: {}ms", ms),
        None => println!("  Deadline: (none)"),
    }
    match &config.scrape.retry {
        Some(retry) => println!("  Retry: {} attempts", retry.attempts),
        None => println!("  Retry: disabled"),
    }

    println!("\nFetch options:");
    println!("  {:?}", request.seed.options());

    println!("\n✓ Configuration is valid");
}

/// Handles the main scrape operation
async fn handle_scrape(
    cli: &Cli,
    config: &Config,
    request: ScrapeRequest,
) -> Result<ScrapeOutcome, Box<dyn std::error::Error>> {
    let client = ServiceClient::from_env(&config.service)?;
    let coordinator = Coordinator::new(Arc::new(client)).with_settings(config.scrape.to_settings());

    if cli.stream {
        let mut stream = coordinator.scrape_stream(request)?;
        cancel_on_interrupt(stream.cancellation_token());

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        while let Some(record) = stream.next().await {
            write_record_line(&mut out, &record)?;
        }
        out.flush()?;
        drop(out);

        return Ok(stream.finish().await?);
    }

    let token = CancellationToken::new();
    cancel_on_interrupt(token.clone());
    Ok(coordinator.scrape_with_cancel(request, token).await?)
}

/// Cancels `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling scrape");
            token.cancel();
        }
    });
}
