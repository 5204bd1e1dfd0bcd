#![allow(dead_code)]

use alphapool_analyzer::domain::Timestamp;
use alphapool_analyzer::domain::error::AnalyzerError;
pub use alphapool_analyzer::domain::ohlcv::{OhlcvBar, OhlcvFrame};
pub use alphapool_analyzer::domain::output::{AnalyzerPosition, AnalyzerReturn};
pub use alphapool_analyzer::domain::position::PositionRecord;
use alphapool_analyzer::ports::market_data_port::{FetchRequest, MarketDataPort};
use alphapool_analyzer::ports::position_port::PositionPort;
use alphapool_analyzer::ports::result_port::ResultPort;
use chrono::{TimeZone, Utc};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// 2024-01-15 at `hour:minute` UTC.
pub fn ts(hour: u32, minute: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 15, hour, minute, 0).unwrap()
}

pub fn make_bar(market: &str, timestamp: Timestamp, close: f64) -> OhlcvBar {
    OhlcvBar::new(market, timestamp, close, close)
}

pub fn make_session_bar(
    market: &str,
    timestamp: Timestamp,
    open: f64,
    midday_close: f64,
    after_hours_open: f64,
    close: f64,
) -> OhlcvBar {
    let mut bar = OhlcvBar::new(market, timestamp, open, close);
    bar.midday_close = Some(midday_close);
    bar.after_hours_open = Some(after_hours_open);
    bar
}

pub struct MockPositionPort {
    pub records: Vec<PositionRecord>,
    pub requests: RefCell<Vec<(Option<String>, Option<Timestamp>)>>,
}

impl MockPositionPort {
    pub fn new(records: Vec<PositionRecord>) -> Self {
        Self {
            records,
            requests: RefCell::new(Vec::new()),
        }
    }
}

impl PositionPort for MockPositionPort {
    fn get_positions(
        &self,
        tournament: Option<&str>,
        min_timestamp: Option<Timestamp>,
    ) -> Result<Vec<PositionRecord>, AnalyzerError> {
        self.requests
            .borrow_mut()
            .push((tournament.map(str::to_string), min_timestamp));
        Ok(self
            .records
            .iter()
            .filter(|r| tournament.is_none() || r.tournament.as_deref() == tournament)
            .filter(|r| min_timestamp.is_none_or(|min| r.timestamp >= min))
            .cloned()
            .collect())
    }
}

/// Serves fixed bars per market; markets listed in `errors` fail.
pub struct MockMarketData {
    pub data: HashMap<String, Vec<OhlcvBar>>,
    pub errors: HashSet<String>,
    pub calls: AtomicUsize,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_bars(mut self, market: &str, bars: Vec<OhlcvBar>) -> Self {
        self.data.insert(market.to_string(), bars);
        self
    }

    pub fn with_error(mut self, market: &str) -> Self {
        self.errors.insert(market.to_string());
        self
    }
}

impl MarketDataPort for MockMarketData {
    fn fetch_ohlcv(
        &self,
        request: &FetchRequest,
        _previous: Option<&OhlcvFrame>,
    ) -> Result<OhlcvFrame, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let market = &request.key.market;
        if self.errors.contains(market) {
            return Err(AnalyzerError::Database {
                reason: format!("no route to {market}"),
            });
        }
        Ok(OhlcvFrame::new(
            self.data.get(market).cloned().unwrap_or_default(),
        ))
    }
}

/// In-memory result tables with the same window-replace semantics as the
/// database adapters.
pub struct MockResultStore {
    pub positions: RefCell<Vec<AnalyzerPosition>>,
    pub returns: RefCell<Vec<AnalyzerReturn>>,
    pub writes: Cell<usize>,
    pub vacuums: Cell<usize>,
}

impl MockResultStore {
    pub fn new() -> Self {
        Self {
            positions: RefCell::new(Vec::new()),
            returns: RefCell::new(Vec::new()),
            writes: Cell::new(0),
            vacuums: Cell::new(0),
        }
    }

    pub fn with_positions(self, rows: Vec<AnalyzerPosition>) -> Self {
        *self.positions.borrow_mut() = rows;
        self
    }

    pub fn return_at(&self, timestamp: Timestamp, model_id: &str) -> Option<f64> {
        self.returns
            .borrow()
            .iter()
            .find(|r| r.timestamp == timestamp && r.model_id == model_id)
            .map(|r| r.ret)
    }

    pub fn position_at(&self, timestamp: Timestamp, model_id: &str, symbol: &str) -> Option<f64> {
        self.positions
            .borrow()
            .iter()
            .find(|p| p.timestamp == timestamp && p.model_id == model_id && p.symbol == symbol)
            .map(|p| p.position)
    }
}

impl ResultPort for MockResultStore {
    fn last_position_time(
        &self,
        tournament: Option<&str>,
    ) -> Result<Option<Timestamp>, AnalyzerError> {
        Ok(self
            .positions
            .borrow()
            .iter()
            .filter(|p| p.tournament.as_deref() == tournament)
            .map(|p| p.timestamp)
            .max())
    }

    fn replace_window(
        &self,
        min_update_time: Timestamp,
        tournament: Option<&str>,
        positions: &[AnalyzerPosition],
        returns: &[AnalyzerReturn],
    ) -> Result<(), AnalyzerError> {
        let mut stored = self.positions.borrow_mut();
        stored.retain(|p| p.timestamp < min_update_time || p.tournament.as_deref() != tournament);
        stored.extend_from_slice(positions);

        let mut stored = self.returns.borrow_mut();
        stored.retain(|r| r.timestamp < min_update_time || r.tournament.as_deref() != tournament);
        stored.extend_from_slice(returns);

        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn vacuum(&self) -> Result<(), AnalyzerError> {
        self.vacuums.set(self.vacuums.get() + 1);
        Ok(())
    }
}
