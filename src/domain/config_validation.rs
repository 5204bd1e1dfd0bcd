//! Configuration validation.
//!
//! Runs before any data is touched so a bad INI file fails fast with the
//! offending section and key.

use crate::domain::error::AnalyzerError;
use crate::domain::returns::ReturnMode;
use crate::ports::config_port::ConfigPort;

const MAX_INTERVAL_SECS: i64 = 7 * 86_400;
const MAX_DAYS: i64 = 3_650;
const MAX_LOOKBACK_HOURS: i64 = MAX_DAYS * 24;
const MAX_WEIGHT_DEPTH: i64 = 16;
const MAX_EXECUTION_DELAY_SECS: i64 = 86_400;
const MAX_WORKERS: i64 = 256;

pub fn validate_job_config(config: &dyn ConfigPort) -> Result<(), AnalyzerError> {
    validate_mode(config)?;
    validate_range(config, "job", "interval", 1, MAX_INTERVAL_SECS)?;
    validate_range(config, "job", "inactive_days", 1, MAX_DAYS)?;
    validate_range(config, "job", "weight_depth", 1, MAX_WEIGHT_DEPTH)?;
    validate_range(config, "job", "execution_delay", 0, MAX_EXECUTION_DELAY_SECS)?;
    validate_update_window(config)?;
    validate_market(config)?;
    validate_positions(config)?;
    validate_results(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> AnalyzerError {
    AnalyzerError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> AnalyzerError {
    AnalyzerError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn validate_mode(config: &dyn ConfigPort) -> Result<(), AnalyzerError> {
    let Some(mode) = config.get_nonempty("job", "mode") else {
        return Err(missing("job", "mode"));
    };
    if ReturnMode::parse(&mode).is_none() {
        return Err(invalid(
            "job",
            "mode",
            format!("unknown mode '{mode}', expected continuous or session"),
        ));
    }
    Ok(())
}

/// Absent keys fall back to the mode preset and pass.
fn validate_positive(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), AnalyzerError> {
    if config.get_string(section, key).is_none() {
        return Ok(());
    }
    if config.get_int(section, key, 0) <= 0 {
        return Err(invalid(section, key, format!("{key} must be a positive integer")));
    }
    Ok(())
}

/// Like [`validate_positive`], bounded to `min..=max`.
fn validate_range(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    min: i64,
    max: i64,
) -> Result<(), AnalyzerError> {
    if config.get_string(section, key).is_none() {
        return Ok(());
    }
    let value = config.get_int(section, key, min - 1);
    if !(min..=max).contains(&value) {
        return Err(invalid(
            section,
            key,
            format!("{key} must be an integer between {min} and {max}"),
        ));
    }
    Ok(())
}

fn validate_update_window(config: &dyn ConfigPort) -> Result<(), AnalyzerError> {
    if let Some(window) = config.get_nonempty("job", "update_window") {
        match window.to_lowercase().as_str() {
            "incremental" | "trailing" => {}
            other => {
                return Err(invalid(
                    "job",
                    "update_window",
                    format!("unknown update window '{other}', expected incremental or trailing"),
                ));
            }
        }
    }
    validate_range(config, "job", "update_days", 1, MAX_DAYS)?;
    validate_range(config, "job", "update_lookback_hours", 0, MAX_LOOKBACK_HOURS)?;
    validate_range(config, "job", "fetch_lookback_hours", 0, MAX_LOOKBACK_HOURS)?;
    Ok(())
}

fn validate_market(config: &dyn ConfigPort) -> Result<(), AnalyzerError> {
    let source = config
        .get_nonempty("market", "source")
        .unwrap_or_else(|| "sqlite".to_string());
    match source.as_str() {
        "sqlite" => require_sqlite(config)?,
        "csv" => {
            if config.get_nonempty("csv", "ohlcv_dir").is_none() {
                return Err(missing("csv", "ohlcv_dir"));
            }
        }
        other => {
            return Err(invalid(
                "market",
                "source",
                format!("unknown market source '{other}', expected sqlite or csv"),
            ));
        }
    }
    validate_range(config, "market", "workers", 1, MAX_WORKERS)?;
    Ok(())
}

fn validate_positions(config: &dyn ConfigPort) -> Result<(), AnalyzerError> {
    let source = config
        .get_nonempty("positions", "source")
        .unwrap_or_else(|| "sqlite".to_string());
    match source.as_str() {
        "sqlite" => require_sqlite(config),
        "csv" => match config.get_nonempty("positions", "path") {
            Some(_) => Ok(()),
            None => Err(missing("positions", "path")),
        },
        "postgres" => require_postgres(config),
        other => Err(invalid(
            "positions",
            "source",
            format!("unknown position source '{other}', expected sqlite, csv or postgres"),
        )),
    }
}

fn validate_results(config: &dyn ConfigPort) -> Result<(), AnalyzerError> {
    let store = config
        .get_nonempty("results", "store")
        .unwrap_or_else(|| "sqlite".to_string());
    match store.as_str() {
        "sqlite" => require_sqlite(config),
        "postgres" => require_postgres(config),
        other => Err(invalid(
            "results",
            "store",
            format!("unknown result store '{other}', expected sqlite or postgres"),
        )),
    }
}

fn require_sqlite(config: &dyn ConfigPort) -> Result<(), AnalyzerError> {
    if config.get_nonempty("sqlite", "path").is_none() {
        return Err(missing("sqlite", "path"));
    }
    validate_positive(config, "sqlite", "pool_size")
}

fn require_postgres(config: &dyn ConfigPort) -> Result<(), AnalyzerError> {
    if !cfg!(feature = "postgres") {
        return Err(invalid(
            "postgres",
            "connection_string",
            "built without the postgres feature",
        ));
    }
    match config.get_nonempty("postgres", "connection_string") {
        Some(_) => Ok(()),
        None => Err(missing("postgres", "connection_string")),
    }
}
