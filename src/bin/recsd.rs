//! Recommendations Service Daemon
//!
//! Runs the scheduled import pipeline: on each tick the daemon races for
//! the scheduler lock, imports CSV price files, recomputes per-symbol
//! aggregates, and refreshes the cache.
//!
//! # CLI Commands
//!
//! - `start` - Start the daemon (default if no command specified)
//! - `check-config` - Validate configuration file
//! - `import` - Run a single import + aggregation pass and exit
//!
//! # Configuration
//!
//! The daemon reads configuration from:
//! 1. `RECS_CONFIG` environment variable (path to TOML file)
//! 2. `./recommendations.toml` in current directory
//! 3. Default configuration with `RECS_*` environment overrides

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{debug, info, warn};

use recommendations::aggregation::Aggregator;
use recommendations::cache::StatsCache;
use recommendations::config::Config;
use recommendations::ingestion::CsvImporter;
use recommendations::lock::{FileLockProvider, LockProvider, MemoryLockProvider};
use recommendations::metrics;
use recommendations::ratelimit::KeyedRateLimiter;
use recommendations::services::{
    ImportService, ImportServiceConfig, ServiceManager, ServiceStatus,
};
use recommendations::storage::{MemoryPriceStore, PriceStore, StatsRepository};
use recommendations::symbols::SetBasedSymbolValidator;
use recommendations::RecommendationService;

// =============================================================================
// CLI Definition
// =============================================================================

/// Crypto price recommendations service
#[derive(Parser)]
#[command(name = "recsd")]
#[command(version)]
#[command(about = "Scheduled crypto price aggregation service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (overrides RECS_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Override import directory path
    #[arg(short, long, global = true)]
    import_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (default)
    Start,

    /// Validate configuration file without starting the daemon
    CheckConfig,

    /// Run one import + aggregation pass and exit
    Import,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Load configuration from file or environment
///
/// Priority:
/// 1. RECS_CONFIG environment variable
/// 2. recommendations.toml
/// 3. Default configuration with env overrides
fn load_config(cli: &Cli) -> Result<Config, String> {
    if let Some(path) = &cli.config {
        std::env::set_var("RECS_CONFIG", path);
    }

    let mut config = if let Ok(path) = std::env::var("RECS_CONFIG") {
        Config::from_file_with_env(&path)?
    } else if std::path::Path::new("recommendations.toml").exists() {
        Config::from_file_with_env("recommendations.toml")?
    } else {
        Config::from_env()
    };

    if let Some(dir) = &cli.import_dir {
        config.import.directory = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn build_lock_provider(config: &Config) -> Arc<dyn LockProvider> {
    match config.scheduler.lock_provider.as_str() {
        "file" => Arc::new(FileLockProvider::new(config.scheduler.lock_directory.clone())),
        _ => Arc::new(MemoryLockProvider::new()),
    }
}

// =============================================================================
// Application Wiring
// =============================================================================

struct App {
    service: Arc<RecommendationService>,
    import_service: Arc<ImportService>,
    cache: Arc<StatsCache>,
}

fn build_app(config: &Config) -> App {
    let prices: Arc<dyn PriceStore> = Arc::new(MemoryPriceStore::new());
    let repo = Arc::new(StatsRepository::new());
    let cache = Arc::new(StatsCache::new(config.cache_config()));

    let validator = Arc::new(SetBasedSymbolValidator::discover_from_directory(
        &config.import.directory,
    ));
    let rate_limiter =
        KeyedRateLimiter::new_with_cleanup(config.rate_limit_config(), Duration::from_secs(60));

    let importer = Arc::new(CsvImporter::new(prices.clone(), config.import_config()));
    let aggregator = Arc::new(Aggregator::new(prices.clone(), repo.clone(), cache.clone()));

    let import_service = Arc::new(ImportService::new(
        ImportServiceConfig {
            run_interval: Duration::from_secs(config.scheduler.interval_secs),
            lock_name: config.scheduler.lock_name.clone(),
            lock_at_most_for: Duration::from_secs(config.scheduler.lock_at_most_for_secs),
            lock_at_least_for: Duration::from_secs(config.scheduler.lock_at_least_for_secs),
        },
        build_lock_provider(config),
        importer,
        aggregator,
        cache.clone(),
    ));

    let service = Arc::new(RecommendationService::new(
        prices,
        repo,
        cache.clone(),
        validator,
        rate_limiter,
    ));

    App {
        service,
        import_service,
        cache,
    }
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

/// Validate configuration and print summary
fn cmd_check_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli)?;

    println!("Configuration is valid!");
    println!();
    println!("Import Settings:");
    println!("  Directory: {:?}", config.import.directory);
    println!("  Batch size: {}", config.import.batch_size);
    println!();
    println!("Scheduler:");
    println!("  Interval: {}s", config.scheduler.interval_secs);
    println!(
        "  Lock: {} ({} provider, at most {}s, at least {}s)",
        config.scheduler.lock_name,
        config.scheduler.lock_provider,
        config.scheduler.lock_at_most_for_secs,
        config.scheduler.lock_at_least_for_secs
    );
    println!();
    println!("Rate Limiting:");
    println!("  Enabled: {}", config.rate_limit.enabled);
    if config.rate_limit.enabled {
        println!(
            "  {} tokens, refill {}/{}s",
            config.rate_limit.capacity,
            config.rate_limit.refill_tokens,
            config.rate_limit.refill_period_secs
        );
    }
    println!();
    println!("Monitoring:");
    println!("  Metrics enabled: {}", config.monitoring.metrics_enabled);
    println!("  Log level: {}", config.monitoring.log_level);

    Ok(())
}

/// Run one import + aggregation pass and print the results
async fn cmd_import(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli)?;
    init_logging(&config);

    let app = build_app(&config);
    match app.import_service.run_once().await? {
        Some(summary) => {
            println!(
                "Imported {} files: {} rows, {} inserted, {} skipped",
                summary.files, summary.total_rows, summary.inserted, summary.skipped
            );
        }
        None => {
            println!("Import skipped: scheduler lock held elsewhere");
            return Ok(());
        }
    }

    let mut ranked = app.service.sorted_by_range().await?;
    ranked.truncate(10);
    println!();
    println!("Top symbols by normalized range:");
    for stats in ranked {
        println!("  {:<8} {}", stats.symbol, stats.normalized_range);
    }

    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.monitoring.structured_logging)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Periodically push health, uptime and cache gauges.
fn spawn_health_reporter(
    manager: Arc<ServiceManager>,
    cache: Arc<StatsCache>,
) -> tokio::task::JoinHandle<()> {
    let started = std::time::Instant::now();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            metrics::record_health(manager.is_healthy(), started.elapsed().as_secs());
            metrics::record_cache_state(cache.entry_count(), cache.hit_ratio());
        }
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => {}
        Err(e) => {
            warn!(error = %e, "Failed to register Ctrl+C handler, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::CheckConfig) => return cmd_check_config(&cli),
        Some(Commands::Import) => return cmd_import(&cli).await,
        Some(Commands::Start) | None => {
            // Continue with daemon startup below
        }
    }

    let config = load_config(&cli)?;
    init_logging(&config);

    info!("Starting recommendations daemon v{}", env!("CARGO_PKG_VERSION"));
    debug!(
        "Configuration: import_dir={:?}, interval={}s, lock={}",
        config.import.directory, config.scheduler.interval_secs, config.scheduler.lock_name
    );

    if config.monitoring.metrics_enabled {
        metrics::init();
    }

    let app = build_app(&config);

    // Warm the system with an initial pass so reads have data before the
    // first scheduled tick fires.
    match app.import_service.run_once().await {
        Ok(Some(summary)) => info!(
            files = summary.files,
            inserted = summary.inserted,
            "initial import complete"
        ),
        Ok(None) => info!("initial import skipped, lock held elsewhere"),
        Err(e) => warn!(error = %e, "initial import failed, continuing with scheduler"),
    }

    let manager = Arc::new(ServiceManager::with_defaults());
    manager.register(app.import_service.clone())?;
    manager.start_all().await?;

    let reporter = if config.monitoring.metrics_enabled {
        Some(spawn_health_reporter(manager.clone(), app.cache.clone()))
    } else {
        None
    };

    info!(
        symbols = ?app.service.supported_symbols(),
        "daemon running, press Ctrl+C to stop"
    );

    shutdown_signal().await;
    info!("Shutdown signal received");

    if let Some(reporter) = reporter {
        reporter.abort();
    }
    manager.shutdown().await?;

    if config.monitoring.metrics_enabled {
        metrics::record_cache_state(app.cache.entry_count(), app.cache.hit_ratio());
        if let Ok(snapshot) = metrics::gather_metrics() {
            debug!(bytes = snapshot.len(), "final metrics snapshot rendered");
        }
    }

    if let Some(status) = manager.service_status("importer") {
        if !matches!(status, ServiceStatus::Stopped) {
            warn!(?status, "importer did not stop cleanly");
        }
    }

    Ok(())
}
