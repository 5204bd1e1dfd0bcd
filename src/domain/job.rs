//! One analyzer run: positions in, attributed returns out.
//!
//! Stages run sequentially: window selection, position fetch, preprocessing
//! and alignment, weight resolution, market data fetch, attribution, and a
//! single all-or-nothing write. Only the market data stage fans out across
//! threads.

use crate::domain::Timestamp;
use crate::domain::aggregate::{resolve_weights, with_equal_weighted};
use crate::domain::attribution::attribute_returns;
use crate::domain::error::{AnalyzerError, MarketDataError};
use crate::domain::market_data::MarketDataStore;
use crate::domain::ohlcv::OhlcvFrame;
use crate::domain::output::{build_position_rows, build_return_rows};
use crate::domain::position::{PositionFrame, PositionRecord};
use crate::domain::resample::{
    PreprocessOptions, fill_session_shifts, preprocess, shift_to_executable_time,
};
use crate::domain::returns::{ReturnFrame, ReturnMode, ReturnSeries, decompose};
use crate::ports::market_data_port::{MarketDataPort, MarketKey};
use crate::ports::position_port::PositionPort;
use crate::ports::result_port::ResultPort;
use chrono::{DateTime, Duration};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How far back each run recomputes.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateWindow {
    /// Resume from the newest stored position, minus `update_lookback`.
    /// The first run (empty store) recomputes everything.
    Incremental {
        update_lookback: Duration,
        fetch_lookback: Duration,
    },
    /// Always recompute a fixed span ending at the execution time.
    Trailing {
        update_span: Duration,
        fetch_lookback: Duration,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketSettings {
    pub exchange: String,
    /// Appended to a position symbol to form the market name (`BTC` -> `BTCUSDT`).
    pub quote_suffix: String,
    pub price_type: Option<String>,
    pub workers: usize,
}

impl MarketSettings {
    pub fn key_for(&self, symbol: &str, interval: Duration) -> MarketKey {
        MarketKey {
            exchange: self.exchange.clone(),
            market: format!("{symbol}{}", self.quote_suffix),
            interval_secs: interval.num_seconds(),
            price_type: self.price_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub mode: ReturnMode,
    pub interval: Duration,
    pub inactive_after: Duration,
    pub resample: bool,
    /// Levels of weight references to flatten; 0 disables resolution.
    pub weight_depth: usize,
    /// `(utc_hour, shift)` copy rules for session-aligned positions.
    pub session_shifts: Vec<(u32, Duration)>,
    pub equal_weight_model: Option<String>,
    /// Execution-time shift; `None` keeps reported timestamps.
    pub execution_delay: Option<Duration>,
    pub window: UpdateWindow,
    pub tournament: Option<String>,
    pub market: MarketSettings,
}

impl JobConfig {
    /// Defaults for each kind of market.
    pub fn preset(mode: ReturnMode) -> Self {
        match mode {
            ReturnMode::Continuous => JobConfig {
                mode,
                interval: Duration::seconds(300),
                inactive_after: Duration::days(1),
                resample: true,
                weight_depth: 1,
                session_shifts: Vec::new(),
                equal_weight_model: None,
                execution_delay: None,
                window: UpdateWindow::Incremental {
                    update_lookback: Duration::days(1),
                    fetch_lookback: Duration::days(1),
                },
                tournament: None,
                market: MarketSettings {
                    exchange: "binance_future".to_string(),
                    quote_suffix: "USDT".to_string(),
                    price_type: None,
                    workers: 8,
                },
            },
            ReturnMode::Session => JobConfig {
                mode,
                interval: Duration::seconds(300),
                inactive_after: Duration::days(7),
                resample: false,
                weight_depth: 0,
                session_shifts: vec![(0, Duration::minutes(150)), (2, Duration::minutes(60))],
                equal_weight_model: Some("pf-equal".to_string()),
                execution_delay: None,
                window: UpdateWindow::Trailing {
                    update_span: Duration::days(56),
                    fetch_lookback: Duration::days(1),
                },
                tournament: None,
                market: MarketSettings {
                    exchange: "jq".to_string(),
                    quote_suffix: String::new(),
                    price_type: None,
                    workers: 8,
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub execution_time: Timestamp,
    pub min_update_time: Option<Timestamp>,
    pub min_fetch_time: Option<Timestamp>,
    pub models: usize,
    pub symbols: usize,
    pub position_rows: usize,
    pub return_rows: usize,
}

/// `floor(now / interval) * interval`.
pub fn execution_time(now: Timestamp, interval: Duration) -> Result<Timestamp, AnalyzerError> {
    let step = interval.num_seconds();
    if step <= 0 {
        return Err(AnalyzerError::InvalidData {
            reason: format!("interval must be positive, got {step}s"),
        });
    }
    let floored = now.timestamp().div_euclid(step) * step;
    DateTime::from_timestamp(floored, 0).ok_or_else(|| AnalyzerError::InvalidData {
        reason: format!("execution time out of range: {floored}"),
    })
}

fn earlier(t: Timestamp, span: Duration, what: &str) -> Result<Timestamp, AnalyzerError> {
    t.checked_sub_signed(span)
        .ok_or_else(|| AnalyzerError::InvalidData {
            reason: format!("{what} of {span} reaches past the timestamp range"),
        })
}

/// Runs one complete recomputation and replaces the rolling window in `results`.
pub fn run_job(
    config: &JobConfig,
    now: Timestamp,
    positions: &dyn PositionPort,
    fetcher: Arc<dyn MarketDataPort>,
    results: &dyn ResultPort,
) -> Result<JobSummary, AnalyzerError> {
    info!("job started");
    results.vacuum()?;

    let execution_time = execution_time(now, config.interval)?;
    info!(%execution_time, mode = %config.mode, "execution time");

    let tournament = config.tournament.as_deref();
    let (records, min_update_time, min_fetch_time) = match &config.window {
        UpdateWindow::Incremental {
            update_lookback,
            fetch_lookback,
        } => match results.last_position_time(tournament)? {
            None => {
                let records = positions.get_positions(tournament, None)?;
                let earliest = records.iter().map(|r| r.timestamp).min();
                (records, earliest, earliest)
            }
            Some(last) => {
                let min_update = earlier(last, *update_lookback, "update_lookback")?;
                let min_fetch = earlier(min_update, *fetch_lookback, "fetch_lookback")?;
                let records = positions.get_positions(tournament, Some(min_fetch))?;
                (records, Some(min_update), Some(min_fetch))
            }
        },
        UpdateWindow::Trailing {
            update_span,
            fetch_lookback,
        } => {
            let min_update = earlier(execution_time, *update_span, "update_span")?;
            let min_fetch = earlier(min_update, *fetch_lookback, "fetch_lookback")?;
            let records = positions.get_positions(tournament, Some(min_fetch))?;
            (records, Some(min_update), Some(min_fetch))
        }
    };

    let empty = JobSummary {
        execution_time,
        min_update_time,
        min_fetch_time,
        models: 0,
        symbols: 0,
        position_rows: 0,
        return_rows: 0,
    };
    let (Some(min_update_time), Some(min_fetch_time)) = (min_update_time, min_fetch_time) else {
        warn!("position source returned no rows, nothing to do");
        return Ok(empty);
    };
    info!(%min_update_time, %min_fetch_time, records = records.len(), "update window");

    let frame = align_positions(config, &records, execution_time)?;
    if frame.is_empty() {
        warn!("no active models after preprocessing, nothing to do");
        return Ok(empty);
    }

    let position_rows = build_position_rows(&frame, min_update_time, tournament);
    let symbols = frame.symbols();
    debug!(symbols = ?symbols, "symbols");

    let store = MarketDataStore::new(fetcher).with_start_time(min_fetch_time);
    let returns = fetch_returns(&store, config, &symbols)?;
    let unpriced: Vec<&String> = symbols
        .iter()
        .filter(|s| !returns.symbols.contains(*s))
        .collect();
    if !unpriced.is_empty() {
        warn!(symbols = ?unpriced, "no market data, positions in these symbols are not attributed");
    }

    let model_returns = attribute_returns(&frame, &returns);
    debug!(timestamps = model_returns.rows.len(), "attributed returns");
    let return_rows = build_return_rows(&model_returns, min_update_time, tournament);

    results.replace_window(min_update_time, tournament, &position_rows, &return_rows)?;

    let summary = JobSummary {
        execution_time,
        min_update_time: Some(min_update_time),
        min_fetch_time: Some(min_fetch_time),
        models: frame.models().len(),
        symbols: returns.symbols.len(),
        position_rows: position_rows.len(),
        return_rows: return_rows.len(),
    };
    info!(
        models = summary.models,
        position_rows = summary.position_rows,
        return_rows = summary.return_rows,
        "job finished"
    );
    Ok(summary)
}

/// Records to the aligned, weight-resolved position frame.
pub fn align_positions(
    config: &JobConfig,
    records: &[PositionRecord],
    execution_time: Timestamp,
) -> Result<PositionFrame, AnalyzerError> {
    let frame = match config.execution_delay {
        Some(delay) => PositionFrame::from_records(&shift_to_executable_time(records, delay)),
        None => PositionFrame::from_records(records),
    };

    let options = PreprocessOptions {
        execution_time,
        inactive_after: config.inactive_after,
        interval: config.interval,
        resample: config.resample,
    };
    let mut frame = preprocess(&frame, &options)?;

    if !config.session_shifts.is_empty() {
        frame = fill_session_shifts(&frame, &config.session_shifts);
    }
    if config.weight_depth > 0 {
        frame = resolve_weights(&frame, config.weight_depth)?;
    }
    if let Some(model_id) = &config.equal_weight_model {
        frame = with_equal_weighted(&frame, model_id);
    }
    Ok(frame)
}

/// Fetches every symbol through `store` and decomposes the bars into returns.
///
/// Symbols are fetched concurrently, `market.workers` at a time. Symbols with
/// no bars are left out of the frame; any fetch failure aborts.
pub fn fetch_returns(
    store: &MarketDataStore,
    config: &JobConfig,
    symbols: &[String],
) -> Result<ReturnFrame, AnalyzerError> {
    let workers = config.market.workers.max(1);
    let mut fetched: Vec<(String, Result<OhlcvFrame, MarketDataError>)> =
        Vec::with_capacity(symbols.len());

    for chunk in symbols.chunks(workers) {
        std::thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|symbol| {
                    let key = config.market.key_for(symbol, config.interval);
                    (symbol.clone(), scope.spawn(move || store.get(&key, true)))
                })
                .collect();
            for (symbol, handle) in handles {
                match handle.join() {
                    Ok(result) => fetched.push((symbol, result)),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
        });
    }

    let mut series: Vec<ReturnSeries> = Vec::with_capacity(fetched.len());
    let mut seen = BTreeSet::new();
    for (symbol, result) in fetched {
        let frame = result?;
        if frame.is_empty() {
            warn!(%symbol, "empty market data, skipping");
            continue;
        }
        let s = decompose(config.mode, &symbol, &frame);
        debug!(%symbol, bars = frame.len(), legs = s.legs.len(), "decomposed returns");
        if seen.insert(symbol) {
            series.push(s);
        }
    }
    Ok(ReturnFrame::join(config.mode, &series))
}
