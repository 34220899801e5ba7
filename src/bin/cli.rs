//! Bucketsync CLI
//!
//! Mirrors buckets from each configured source provider to its destination.
//! Run with: bucketsync [--dry-run] [--parallel] [--pair SRC:DST] [--bucket NAME]

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bucketsync::config::{load_setup, EnvSource, FileSource, LayeredSource};
use bucketsync::report::{JsonLinesSink, ReportSink, Reporter, TracingSink};
use bucketsync::storage::StorageFactory;
use bucketsync::transfer::RcloneEngine;
use bucketsync::{BucketReconciler, PairToken, RunConfiguration, SyncOrchestrator};

/// Exit status when configuration is unusable and no pair ran
const EXIT_CONFIG: u8 = 1;

#[derive(Parser, Debug)]
#[command(name = "bucketsync")]
#[command(about = "Mirror buckets across S3-compatible providers (one-way, update-only)")]
#[command(version)]
struct Cli {
    /// Plan and report without creating buckets or transferring objects
    #[arg(long, env = "SYNC_DRY_RUN")]
    dry_run: bool,

    /// Process all pairs concurrently
    #[arg(long, env = "SYNC_PARALLEL")]
    parallel: bool,

    /// Only process this pair, overriding the configured list
    #[arg(long, value_name = "SOURCE:DEST")]
    pair: Option<String>,

    /// Only process this bucket within every pair
    #[arg(long, value_name = "NAME")]
    bucket: Option<String>,

    /// More detail, also passed to the transfer engine
    #[arg(short, long)]
    verbose: bool,

    /// TOML file with settings; its keys take precedence over the environment
    #[arg(long, env = "BUCKETSYNC_CONFIG")]
    config: Option<String>,

    /// Emit run events as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Log as JSON on stderr
    #[arg(long)]
    log_json: bool,

    /// Exit with status 2 if any bucket or pair failed
    #[arg(long, env = "SYNC_STRICT")]
    strict: bool,

    /// Per-pair time limit in seconds
    #[arg(long, value_name = "SECS")]
    pair_timeout: Option<u64>,

    /// Whole-run time limit in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Count a failed bucket creation as failed without re-checking existence
    #[arg(long)]
    no_recheck: bool,
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
        }))
        .init();
}

fn run_configuration(cli: &Cli, base: RunConfiguration) -> anyhow::Result<RunConfiguration> {
    let pair_filter = cli
        .pair
        .as_deref()
        .map(str::parse::<PairToken>)
        .transpose()
        .context("invalid --pair")?;

    Ok(RunConfiguration {
        dry_run: cli.dry_run,
        parallel: cli.parallel,
        pair_filter,
        bucket_filter: cli.bucket.clone(),
        verbose: cli.verbose,
        strict_exit: cli.strict,
        recheck_on_create_failure: !cli.no_recheck,
        pair_timeout: cli.pair_timeout.map(Duration::from_secs),
        run_timeout: cli.timeout.map(Duration::from_secs),
        ..base
    })
}

#[cfg(feature = "cloud")]
fn storage_factory() -> anyhow::Result<Arc<dyn StorageFactory>> {
    Ok(Arc::new(bucketsync::storage::S3StorageFactory))
}

#[cfg(not(feature = "cloud"))]
fn storage_factory() -> anyhow::Result<Arc<dyn StorageFactory>> {
    anyhow::bail!("bucketsync was built without the `cloud` feature")
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut source = LayeredSource::new();
    if let Some(ref path) = cli.config {
        source = source.push(FileSource::load(path)?);
    }
    let source = source.push(EnvSource);

    let config = run_configuration(&cli, RunConfiguration::from_source(&source)?)?;
    let setup = load_setup(&source, &config)?;

    let sink: Arc<dyn ReportSink> = if cli.json {
        Arc::new(JsonLinesSink::stdout())
    } else {
        Arc::new(TracingSink)
    };
    let reporter = Reporter::new(uuid::Uuid::new_v4().to_string(), sink);

    let strict = config.strict_exit;
    let reconciler = BucketReconciler::new(
        setup.registry.clone(),
        storage_factory()?,
        Arc::new(RcloneEngine::from_source(&source)),
        Arc::new(config),
        reporter,
    );

    let report = SyncOrchestrator::new(reconciler).run(&setup.pairs).await;
    Ok(report.exit_code(strict) as u8)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}
