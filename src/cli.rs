//! CLI definition and dispatch.

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::Timestamp;
use crate::domain::config_validation::validate_job_config;
use crate::domain::error::AnalyzerError;
use crate::domain::job::{JobConfig, JobSummary, UpdateWindow, run_job};
use crate::domain::returns::ReturnMode;
use crate::ports::config_port::ConfigPort;
use crate::ports::market_data_port::MarketDataPort;
use crate::ports::position_port::PositionPort;
use crate::ports::result_port::ResultPort;

/// Overrides `[logging] level` when set.
pub const LOG_LEVEL_ENV: &str = "ALPHAPOOL_LOG_LEVEL";

#[derive(Parser, Debug)]
#[command(
    name = "alphapool-analyzer",
    about = "Aligns model positions and attributes realized returns"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one analyzer job
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Override the wall clock (RFC 3339)
        #[arg(long)]
        now: Option<String>,
    },
    /// Validate a configuration and print the resolved job settings
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show the newest stored analyzer position
    Info {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run { config, now } => run_once(&config, now.as_deref()),
        Command::Check { config } => run_check(&config),
        Command::Info { config } => run_info(&config),
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(config: &dyn ConfigPort) {
    let fallback = config
        .get_nonempty("logging", "level")
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = if config.get_bool("logging", "json", false) {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> AnalyzerError {
    AnalyzerError::ConfigInvalid {
        section: section.into(),
        key: key.into(),
        reason: reason.into(),
    }
}

/// Reads an integer key as a duration in the unit of `to_duration`.
fn span(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
    to_duration: fn(i64) -> Option<Duration>,
) -> Result<Duration, AnalyzerError> {
    let value = config.get_int(section, key, default);
    to_duration(value).ok_or_else(|| invalid(section, key, format!("{value} is out of range")))
}

/// Starts from the preset for `[job] mode` and applies every key that is set.
pub fn build_job_config(config: &dyn ConfigPort) -> Result<JobConfig, AnalyzerError> {
    let mode_str = config
        .get_nonempty("job", "mode")
        .ok_or_else(|| AnalyzerError::ConfigMissing {
            section: "job".into(),
            key: "mode".into(),
        })?;
    let mode = ReturnMode::parse(&mode_str)
        .ok_or_else(|| invalid("job", "mode", format!("unknown mode '{mode_str}'")))?;
    let mut job = JobConfig::preset(mode);

    job.interval = span(
        config,
        "job",
        "interval",
        job.interval.num_seconds(),
        Duration::try_seconds,
    )?;
    job.inactive_after = span(
        config,
        "job",
        "inactive_days",
        job.inactive_after.num_days(),
        Duration::try_days,
    )?;
    job.resample = config.get_bool("job", "resample", job.resample);

    let resolve = config.get_bool("job", "resolve_weights", job.weight_depth > 0);
    let depth = config.get_int("job", "weight_depth", job.weight_depth.max(1) as i64);
    job.weight_depth = if resolve { depth.max(1) as usize } else { 0 };

    if !config.get_bool("job", "session_fill", !job.session_shifts.is_empty()) {
        job.session_shifts.clear();
    } else if job.session_shifts.is_empty() {
        job.session_shifts = JobConfig::preset(ReturnMode::Session).session_shifts;
    }

    if let Some(model) = config.get_string("job", "equal_weight_model") {
        let model = model.trim();
        job.equal_weight_model =
            (!model.is_empty() && !model.eq_ignore_ascii_case("none")).then(|| model.to_string());
    }

    job.execution_delay = if config.get_bool("job", "apply_delay", false) {
        Some(span(config, "job", "execution_delay", 0, Duration::try_seconds)?)
    } else {
        None
    };

    let window_kind = config
        .get_nonempty("job", "update_window")
        .map(|w| w.to_lowercase())
        .unwrap_or_else(|| match job.window {
            UpdateWindow::Incremental { .. } => "incremental".to_string(),
            UpdateWindow::Trailing { .. } => "trailing".to_string(),
        });
    let fetch_lookback = span(config, "job", "fetch_lookback_hours", 24, Duration::try_hours)?;
    job.window = match window_kind.as_str() {
        "incremental" => UpdateWindow::Incremental {
            update_lookback: span(
                config,
                "job",
                "update_lookback_hours",
                24,
                Duration::try_hours,
            )?,
            fetch_lookback,
        },
        "trailing" => UpdateWindow::Trailing {
            update_span: span(config, "job", "update_days", 56, Duration::try_days)?,
            fetch_lookback,
        },
        other => {
            return Err(invalid(
                "job",
                "update_window",
                format!("unknown update window '{other}'"),
            ));
        }
    };

    job.tournament = config.get_nonempty("job", "tournament");

    if let Some(exchange) = config.get_nonempty("market", "exchange") {
        job.market.exchange = exchange;
    }
    if let Some(suffix) = config.get_string("market", "quote_suffix") {
        job.market.quote_suffix = suffix.trim().to_string();
    }
    job.market.price_type = config.get_nonempty("market", "price_type");
    job.market.workers = config
        .get_int("market", "workers", job.market.workers as i64)
        .max(1) as usize;

    Ok(job)
}

pub fn parse_now(now: Option<&str>) -> Result<Timestamp, AnalyzerError> {
    match now {
        None => Ok(Utc::now()),
        Some(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| invalid("cli", "now", format!("expected RFC 3339: {e}"))),
    }
}

fn source(config: &dyn ConfigPort, section: &str, key: &str) -> String {
    config
        .get_nonempty(section, key)
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| "sqlite".to_string())
}

fn csv_adapter(config: &dyn ConfigPort) -> CsvAdapter {
    let dir = config
        .get_nonempty("csv", "ohlcv_dir")
        .unwrap_or_else(|| ".".to_string());
    let adapter = CsvAdapter::new(PathBuf::from(dir));
    match config.get_nonempty("positions", "path") {
        Some(path) => adapter.with_positions(PathBuf::from(path)),
        None => adapter,
    }
}

fn unsupported(section: &str, key: &str, value: &str) -> AnalyzerError {
    invalid(
        section,
        key,
        format!("'{value}' is unknown or not enabled in this build"),
    )
}

/// The ports of one run.
pub struct Ports {
    pub positions: Arc<dyn PositionPort>,
    pub market: Arc<dyn MarketDataPort>,
    pub results: Arc<dyn ResultPort>,
}

/// Opens adapters on demand. Every SQLite-backed port gets the same adapter,
/// so a run holds one pool and initialises the schema once.
struct Opener<'a> {
    config: &'a dyn ConfigPort,
    #[cfg(feature = "sqlite")]
    sqlite: Option<Arc<crate::adapters::sqlite_adapter::SqliteAdapter>>,
}

impl<'a> Opener<'a> {
    fn new(config: &'a dyn ConfigPort) -> Self {
        Opener {
            config,
            #[cfg(feature = "sqlite")]
            sqlite: None,
        }
    }

    #[cfg(feature = "sqlite")]
    fn sqlite(
        &mut self,
    ) -> Result<Arc<crate::adapters::sqlite_adapter::SqliteAdapter>, AnalyzerError> {
        if let Some(adapter) = &self.sqlite {
            return Ok(Arc::clone(adapter));
        }
        let adapter = crate::adapters::sqlite_adapter::SqliteAdapter::from_config(self.config)?;
        adapter.initialize_schema()?;
        let adapter = Arc::new(adapter);
        self.sqlite = Some(Arc::clone(&adapter));
        Ok(adapter)
    }

    fn positions(&mut self) -> Result<Arc<dyn PositionPort>, AnalyzerError> {
        match source(self.config, "positions", "source").as_str() {
            "csv" => Ok(Arc::new(csv_adapter(self.config))),
            #[cfg(feature = "sqlite")]
            "sqlite" => Ok(self.sqlite()?),
            #[cfg(feature = "postgres")]
            "postgres" => Ok(Arc::new(
                crate::adapters::postgres_adapter::PostgresAdapter::from_config(self.config)?,
            )),
            other => Err(unsupported("positions", "source", other)),
        }
    }

    fn market(&mut self) -> Result<Arc<dyn MarketDataPort>, AnalyzerError> {
        match source(self.config, "market", "source").as_str() {
            "csv" => Ok(Arc::new(csv_adapter(self.config))),
            #[cfg(feature = "sqlite")]
            "sqlite" => Ok(self.sqlite()?),
            other => Err(unsupported("market", "source", other)),
        }
    }

    fn results(&mut self) -> Result<Arc<dyn ResultPort>, AnalyzerError> {
        match source(self.config, "results", "store").as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => Ok(self.sqlite()?),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let adapter =
                    crate::adapters::postgres_adapter::PostgresAdapter::from_config(self.config)?;
                adapter.initialize_schema()?;
                Ok(Arc::new(adapter))
            }
            other => Err(unsupported("results", "store", other)),
        }
    }
}

/// Opens the position source, market data source and result store named in
/// `config`.
pub fn open_ports(config: &dyn ConfigPort) -> Result<Ports, AnalyzerError> {
    let mut opener = Opener::new(config);
    Ok(Ports {
        positions: opener.positions()?,
        market: opener.market()?,
        results: opener.results()?,
    })
}

/// Validates `config`, wires its adapters and runs one job.
pub fn execute(config: &dyn ConfigPort, now: Option<&str>) -> Result<JobSummary, AnalyzerError> {
    validate_job_config(config)?;
    let job = build_job_config(config)?;
    let now = parse_now(now)?;

    let ports = open_ports(config)?;
    run_job(&job, now, &*ports.positions, ports.market, &*ports.results)
}

fn run_once(config_path: &PathBuf, now: Option<&str>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    init_logging(&config);

    match execute(&config, now) {
        Ok(summary) => {
            println!(
                "execution_time={} models={} symbols={} position_rows={} return_rows={}",
                summary.execution_time,
                summary.models,
                summary.symbols,
                summary.position_rows,
                summary.return_rows
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "job failed");
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

fn run_check(config_path: &PathBuf) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let job = match validate_job_config(&config).and_then(|()| build_job_config(&config)) {
        Ok(j) => j,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    println!("Config OK: {}", config_path.display());
    println!("  sections:         {}", config.sections().join(", "));
    println!("  mode:             {}", job.mode);
    println!("  interval:         {}s", job.interval.num_seconds());
    println!("  inactive after:   {}d", job.inactive_after.num_days());
    println!("  resample:         {}", job.resample);
    println!("  weight depth:     {}", job.weight_depth);
    println!("  session shifts:   {}", job.session_shifts.len());
    println!(
        "  equal weight:     {}",
        job.equal_weight_model.as_deref().unwrap_or("none")
    );
    match job.execution_delay {
        Some(d) => println!("  execution delay:  {}s", d.num_seconds()),
        None => println!("  execution delay:  off"),
    }
    match &job.window {
        UpdateWindow::Incremental {
            update_lookback,
            fetch_lookback,
        } => println!(
            "  window:           incremental (-{}h update, -{}h fetch)",
            update_lookback.num_hours(),
            fetch_lookback.num_hours()
        ),
        UpdateWindow::Trailing {
            update_span,
            fetch_lookback,
        } => println!(
            "  window:           trailing {}d (-{}h fetch)",
            update_span.num_days(),
            fetch_lookback.num_hours()
        ),
    }
    println!(
        "  tournament:       {}",
        job.tournament.as_deref().unwrap_or("(all)")
    );
    println!(
        "  market:           {} *{} ({} workers)",
        job.market.exchange, job.market.quote_suffix, job.market.workers
    );
    ExitCode::SUCCESS
}

fn run_info(config_path: &PathBuf) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let tournament = config.get_nonempty("job", "tournament");

    let last = Opener::new(&config)
        .results()
        .and_then(|results| results.last_position_time(tournament.as_deref()));
    match last {
        Ok(Some(ts)) => {
            println!("last position time: {ts}");
            ExitCode::SUCCESS
        }
        Ok(None) => {
            println!("no analyzer positions stored");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}
