// # dna-automanage - DNA Address List Reconciler
//
// One-shot runner: reads observed outbound traffic, reconciles the managed
// `DNA_*` address lists against it and writes a report. This binary is a
// thin integration layer; every reconciliation rule lives in dna-core and
// every workloader detail lives in dna-workloader.
//
// Each run gets its own `<DNA_RUN_ROOT>/<YYYYMMDD-HHMMSS>` directory holding
// the exports, the import payloads, `execution.log` and the report.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Naming & Grouping
// - `DNA_LIST_PREFIX`: Managed list prefix (default `DNA_`)
// - `DNA_LIST_SUFFIX`: Managed list suffix (default `-IPL`)
// - `DNA_GROUPING_RULES`: `;`-separated grouping rules
// - `DNA_REJECT_IP_STYLE`: Drop `ip-10-1-2-3` style hostnames (bool)
//
// ### Resolution
// - `DNA_ZONE_TOKENS`: Comma-separated region markers
// - `DNA_DNS_TIMEOUT_SECS`: Per-hostname timeout (fractions allowed)
// - `DNA_RESOLVER_CONCURRENCY`: Concurrent lookups
//
// ### Windows
// - `DNA_TRAFFIC_WINDOW_DAYS`: Outbound traffic window
// - `DNA_LOOKBACK_DAYS`: Lookback before removing an address
// - `DNA_STALE_DAYS`: Staleness threshold for reporting
//
// ### Workloader
// - `DNA_BIN_DIR`: Directory of the workloader wrapper scripts (default `bin`)
// - `DNA_RUN_ROOT`: Parent of the per-run directories (default `runs`)
// - `DNA_STUB_DIR`: Copy sample exports from here instead of running scripts
// - `DNA_EXCLUDED_LABEL_PREFIXES`: Comma-separated app label prefixes to skip
//
// ### Run
// - `DNA_MODE`: `live` (default) or `dry-run`
// - `DNA_LOG_LEVEL`: trace, debug, info (default), warn, error
//
// ## Example
//
// ```bash
// export DNA_BIN_DIR=/opt/workloader/bin
// export DNA_RUN_ROOT=/var/lib/dna/runs
// export DNA_ZONE_TOKENS=eu-fr-paris,eu-fr-north
// export DNA_MODE=dry-run
//
// dna-automanage
// ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dna_core::grouping::parse_rules;
use dna_core::{ReconcileConfig, ReconcileEngine, RunReport, SystemResolver};
use dna_workloader::{Workloader, WorkloaderConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run log written next to the exports and the report
const EXECUTION_LOG: &str = "execution.log";

/// Exit codes for the run outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DnaExitCode {
    /// Run completed (dry-run included)
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// The run recorded a fatal error
    RunFailed = 2,
}

impl From<DnaExitCode> for ExitCode {
    fn from(code: DnaExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug, Clone)]
struct Config {
    list_prefix: Option<String>,
    list_suffix: Option<String>,
    grouping_rules: String,
    reject_ip_style: bool,
    zone_tokens: Option<Vec<String>>,
    dns_timeout_secs: Option<f64>,
    resolver_concurrency: Option<usize>,
    traffic_window_days: Option<u32>,
    lookback_days: Option<u32>,
    stale_days: Option<u32>,
    bin_dir: PathBuf,
    run_root: PathBuf,
    stub_dir: Option<PathBuf>,
    excluded_label_prefixes: Vec<String>,
    mode: String,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a key lookup
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            list_prefix: var("DNA_LIST_PREFIX"),
            list_suffix: var("DNA_LIST_SUFFIX"),
            grouping_rules: var("DNA_GROUPING_RULES").unwrap_or_default(),
            reject_ip_style: var("DNA_REJECT_IP_STYLE").is_some_and(|v| parse_bool(&v)),
            zone_tokens: var("DNA_ZONE_TOKENS").map(|v| split_list(&v)),
            dns_timeout_secs: parse_number(var("DNA_DNS_TIMEOUT_SECS"), "DNA_DNS_TIMEOUT_SECS")?,
            resolver_concurrency: parse_number(var("DNA_RESOLVER_CONCURRENCY"), "DNA_RESOLVER_CONCURRENCY")?,
            traffic_window_days: parse_number(var("DNA_TRAFFIC_WINDOW_DAYS"), "DNA_TRAFFIC_WINDOW_DAYS")?,
            lookback_days: parse_number(var("DNA_LOOKBACK_DAYS"), "DNA_LOOKBACK_DAYS")?,
            stale_days: parse_number(var("DNA_STALE_DAYS"), "DNA_STALE_DAYS")?,
            bin_dir: var("DNA_BIN_DIR").map_or_else(|| PathBuf::from("bin"), PathBuf::from),
            run_root: var("DNA_RUN_ROOT").map_or_else(|| PathBuf::from("runs"), PathBuf::from),
            stub_dir: var("DNA_STUB_DIR").map(PathBuf::from),
            excluded_label_prefixes: var("DNA_EXCLUDED_LABEL_PREFIXES")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            mode: var("DNA_MODE").unwrap_or_else(|| "live".to_string()).to_lowercase(),
            log_level: var("DNA_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.mode.as_str() {
            "live" | "dry-run" => {}
            _ => anyhow::bail!(
                "DNA_MODE '{}' is not valid. \
                Valid modes: live, dry-run",
                self.mode
            ),
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DNA_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        if let Some(timeout) = self.dns_timeout_secs
            && !(timeout > 0.0 && timeout <= 60.0)
        {
            anyhow::bail!("DNA_DNS_TIMEOUT_SECS must be between 0 and 60 seconds. Got: {}", timeout);
        }

        if let Some(concurrency) = self.resolver_concurrency
            && !(1..=256).contains(&concurrency)
        {
            anyhow::bail!("DNA_RESOLVER_CONCURRENCY must be between 1 and 256. Got: {}", concurrency);
        }

        if let (Some(window), Some(lookback)) = (self.traffic_window_days, self.lookback_days)
            && lookback < window
        {
            anyhow::bail!(
                "DNA_LOOKBACK_DAYS ({}) must cover at least DNA_TRAFFIC_WINDOW_DAYS ({})",
                lookback,
                window
            );
        }

        match &self.stub_dir {
            Some(stub_dir) if !stub_dir.is_dir() => anyhow::bail!(
                "DNA_STUB_DIR does not exist: {}",
                stub_dir.display()
            ),
            Some(_) => {}
            None if !self.bin_dir.is_dir() => anyhow::bail!(
                "DNA_BIN_DIR does not exist: {}. \
                Set it via: export DNA_BIN_DIR=/path/to/workloader/bin, \
                or set DNA_STUB_DIR to run from sample exports",
                self.bin_dir.display()
            ),
            None => {}
        }

        // Rules are parsed again when building the engine configuration
        parse_rules(&self.grouping_rules).context("DNA_GROUPING_RULES is not valid")?;

        Ok(())
    }

    fn dry_run(&self) -> bool {
        self.mode == "dry-run"
    }

    /// Build the engine configuration
    fn reconcile_config(&self) -> Result<ReconcileConfig> {
        let mut config = ReconcileConfig::new();

        if let Some(prefix) = &self.list_prefix {
            config.naming.prefix = prefix.clone();
        }
        if let Some(suffix) = &self.list_suffix {
            config.naming.suffix = suffix.clone();
        }
        config.grouping_rules = parse_rules(&self.grouping_rules)?;
        config.filter.reject_ip_style_hostnames = self.reject_ip_style;

        if let Some(tokens) = &self.zone_tokens {
            config.zones.tokens = tokens.clone();
        }
        if let Some(timeout) = self.dns_timeout_secs {
            config.zones.dns_timeout_ms = (timeout * 1000.0).round() as u64;
        }
        if let Some(concurrency) = self.resolver_concurrency {
            config.zones.resolver_concurrency = concurrency;
        }

        if let Some(days) = self.traffic_window_days {
            config.windows.traffic_window_days = days;
        }
        if let Some(days) = self.lookback_days {
            config.windows.lookback_days = days;
        }
        if let Some(days) = self.stale_days {
            config.windows.stale_days = days;
        }

        config.engine.dry_run = self.dry_run();
        config.engine.metadata.insert("mode".to_string(), self.mode.clone());
        if let Some(stub_dir) = &self.stub_dir {
            config.engine.metadata.insert("stub_dir".to_string(), stub_dir.display().to_string());
        }

        config.validate()?;
        Ok(config)
    }

    /// Build the adapter configuration for one run directory
    fn workloader_config(&self, run_dir: &Path) -> WorkloaderConfig {
        let config = WorkloaderConfig::new(&self.bin_dir, run_dir)
            .with_excluded_label_prefixes(self.excluded_label_prefixes.clone());
        match &self.stub_dir {
            Some(stub_dir) => config.with_stub_dir(stub_dir),
            None => config,
        }
    }
}

/// `1/true/yes/y`, trimmed and case-insensitive
fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y")
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_number<T: std::str::FromStr>(raw: Option<String>, key: &str) -> Result<Option<T>> {
    raw.map(|v| {
        v.parse()
            .map_err(|_| anyhow::anyhow!("{} must be a number. Got: {}", key, v))
    })
    .transpose()
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DnaExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DnaExitCode::ConfigError.into();
    }

    let started = Utc::now();
    let run_dir = run_dir_for(&config.run_root, started);
    if let Err(e) = std::fs::create_dir_all(&run_dir) {
        eprintln!("Failed to create run directory {}: {}", run_dir.display(), e);
        return DnaExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Dropping the guard flushes execution.log, so it lives until exit
    let _log_guard = match init_logging(log_level, &run_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {:#}", e);
            return DnaExitCode::ConfigError.into();
        }
    };

    info!("Starting dna-automanage ({})", config.mode);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DnaExitCode::ConfigError.into();
        }
    };

    rt.block_on(async {
        match run(config, started, run_dir).await {
            Ok(report) if report.is_success() => DnaExitCode::Success,
            Ok(_) => DnaExitCode::RunFailed,
            Err(e) => {
                error!("Startup error: {:#}", e);
                DnaExitCode::ConfigError
            }
        }
    })
    .into()
}

/// Run one reconciliation and write its report
///
/// Errors are startup failures; a failed run is returned as a report with
/// a fatal error.
async fn run(config: Config, started: DateTime<Utc>, run_dir: PathBuf) -> Result<RunReport> {
    info!("Run directory: {}", run_dir.display());

    let reconcile = config.reconcile_config()?;
    let workloader = Workloader::new(config.workloader_config(&run_dir))
        .context("Failed to initialize the workloader adapter")?;

    let (engine, mut events) = ReconcileEngine::new(
        Arc::new(SystemResolver::new()),
        Box::new(workloader.clone()),
        Box::new(workloader.clone()),
        reconcile,
    )?;

    let listener = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!("Engine event: {:?}", event);
        }
    });

    let mut report = engine.run_at(started).await;
    drop(engine);
    if let Err(e) = listener.await {
        warn!("Event listener ended abnormally: {}", e);
    }

    merge_steps(&mut report, workloader.steps());
    write_report(&run_dir, &report).await?;

    match &report.fatal_error {
        Some(e) => error!("Run failed: {}", e),
        None => info!(
            "Run finished: {} created, {} updated, {} deletion candidate(s)",
            report.created.len(),
            report.updated.len(),
            report.deletion_candidates.len()
        ),
    }

    Ok(report)
}

/// `<run_root>/<YYYYMMDD-HHMMSS>`
fn run_dir_for(run_root: &Path, started: DateTime<Utc>) -> PathBuf {
    run_root.join(started.format("%Y%m%d-%H%M%S").to_string())
}

/// Appender writing the run log to `<run_dir>/execution.log`
fn execution_log(run_dir: &Path) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(EXECUTION_LOG)
        .build(run_dir)
        .with_context(|| format!("Failed to open {}", run_dir.join(EXECUTION_LOG).display()))
}

/// Log to the console and to the run directory
fn init_logging(level: Level, run_dir: &Path) -> Result<WorkerGuard> {
    let (file_writer, guard) = tracing_appender::non_blocking(execution_log(run_dir)?);

    tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(fmt::layer())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .context("Failed to set tracing subscriber")?;

    Ok(guard)
}

/// Interleave adapter steps with engine stages by start time
fn merge_steps(report: &mut RunReport, steps: Vec<dna_core::report::StepRecord>) {
    report.steps.extend(steps);
    report.steps.sort_by_key(|step| step.started_at);
}

async fn write_report(run_dir: &Path, report: &RunReport) -> Result<()> {
    tokio::fs::create_dir_all(run_dir).await?;

    let text = run_dir.join("report.txt");
    tokio::fs::write(&text, report.render_text())
        .await
        .with_context(|| format!("Failed to write {}", text.display()))?;

    let json = run_dir.join("report.json");
    tokio::fs::write(&json, report.to_json()?)
        .await
        .with_context(|| format!("Failed to write {}", json.display()))?;

    info!("Report written to {}", text.display());
    Ok(())
}
