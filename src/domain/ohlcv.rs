//! OHLCV bars and frames.

use crate::domain::Timestamp;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvBar {
    pub symbol: String,
    pub timestamp: Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Close of the morning session, for instruments with a lunch break.
    pub midday_close: Option<f64>,
    /// Open of the afternoon session.
    pub after_hours_open: Option<f64>,
    /// Corporate action factor; applies to every bar before this one.
    pub adjustment_factor: f64,
}

impl OhlcvBar {
    pub fn new(symbol: &str, timestamp: Timestamp, open: f64, close: f64) -> Self {
        OhlcvBar {
            symbol: symbol.to_string(),
            timestamp,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 0.0,
            midday_close: None,
            after_hours_open: None,
            adjustment_factor: 1.0,
        }
    }
}

/// Bars for one or more symbols, as returned by a fetcher.
///
/// Not unique by `(symbol, timestamp)`: repeated fetch cycles may return the
/// same bar twice. Use [`OhlcvFrame::dedup_latest`] before computing on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OhlcvFrame {
    pub bars: Vec<OhlcvBar>,
}

impl OhlcvFrame {
    pub fn new(bars: Vec<OhlcvBar>) -> Self {
        OhlcvFrame { bars }
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.bars.iter().map(|b| b.timestamp).max()
    }

    /// Sorted by `(symbol, timestamp)`, one bar per key, the latest occurrence winning.
    pub fn dedup_latest(&self) -> OhlcvFrame {
        let mut latest: HashMap<(&str, Timestamp), usize> = HashMap::new();
        for (i, bar) in self.bars.iter().enumerate() {
            latest.insert((bar.symbol.as_str(), bar.timestamp), i);
        }
        let mut bars: Vec<OhlcvBar> = latest.into_values().map(|i| self.bars[i].clone()).collect();
        bars.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        OhlcvFrame { bars }
    }

    /// Incremental merge: keeps `self` and appends bars strictly newer than its last bar.
    pub fn append_newer(&self, fresh: OhlcvFrame) -> OhlcvFrame {
        let cutoff = self.last_timestamp();
        let mut bars = self.bars.clone();
        bars.extend(
            fresh
                .bars
                .into_iter()
                .filter(|b| cutoff.is_none_or(|c| b.timestamp > c)),
        );
        OhlcvFrame { bars }
    }
}
