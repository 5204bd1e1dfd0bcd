//! Decomposition of OHLCV bars into per-symbol return legs.
//!
//! Two shapes of instrument are supported. Continuous markets trade around
//! the clock and yield one close-to-close leg per bar. Session markets have a
//! morning session, a lunch break and an afternoon session; each daily bar
//! yields four disjoint legs, stamped at the instant the leg's information
//! becomes tradable.

use crate::domain::Timestamp;
use crate::domain::ohlcv::{OhlcvBar, OhlcvFrame};
use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnMode {
    Continuous,
    Session,
}

impl ReturnMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "continuous" | "crypto" => Some(ReturnMode::Continuous),
            "session" | "stock" | "equity" => Some(ReturnMode::Session),
            _ => None,
        }
    }
}

impl fmt::Display for ReturnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnMode::Continuous => write!(f, "continuous"),
            ReturnMode::Session => write!(f, "session"),
        }
    }
}

/// Offset of the midday-close to afternoon-open leg.
pub const LUNCH_LEG_OFFSET_MINUTES: i64 = 150;
/// Offset of the afternoon-open to close leg.
pub const AFTERNOON_LEG_OFFSET_MINUTES: i64 = 210;
/// Offset of the overnight close to next-open leg.
pub const OVERNIGHT_LEG_OFFSET_HOURS: i64 = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnLeg {
    pub symbol: String,
    pub timestamp: Timestamp,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturnSeries {
    pub symbol: String,
    pub legs: Vec<ReturnLeg>,
}

impl ReturnSeries {
    fn push(&mut self, timestamp: Timestamp, value: Option<f64>) {
        if let Some(value) = value.filter(|v| v.is_finite()) {
            self.legs.push(ReturnLeg {
                symbol: self.symbol.clone(),
                timestamp,
                value,
            });
        }
    }
}

/// Close prices adjusted for corporate actions.
///
/// The factor on bar `t` applies to every earlier bar, so bar `t` is scaled by
/// the product of all factors strictly after it. Expects time-sorted bars of a
/// single symbol.
pub fn adjusted_closes(bars: &[OhlcvBar]) -> Vec<f64> {
    let mut adjusted = vec![0.0; bars.len()];
    let mut cumulative = 1.0;
    for i in (0..bars.len()).rev() {
        adjusted[i] = bars[i].close * cumulative;
        cumulative *= bars[i].adjustment_factor;
    }
    adjusted
}

/// One leg per bar: `close[t+1] / close[t] - 1`, stamped at `t`.
pub fn continuous_returns(symbol: &str, bars: &[OhlcvBar]) -> ReturnSeries {
    let closes = adjusted_closes(bars);
    let mut series = ReturnSeries {
        symbol: symbol.to_string(),
        legs: Vec::with_capacity(bars.len().saturating_sub(1)),
    };
    for i in 0..bars.len().saturating_sub(1) {
        series.push(bars[i].timestamp, ratio(closes[i + 1], closes[i]));
    }
    series
}

/// Four legs per daily bar, concatenated in leg order:
///
/// 1. open to midday close, at the bar timestamp
/// 2. midday close to afternoon open, +150 minutes
/// 3. afternoon open to close, +210 minutes
/// 4. adjusted close to next adjusted open, +6 hours
///
/// A leg whose inputs are missing is dropped on its own.
pub fn session_returns(symbol: &str, bars: &[OhlcvBar]) -> ReturnSeries {
    let adj_closes = adjusted_closes(bars);
    let adj_opens: Vec<Option<f64>> = bars
        .iter()
        .zip(&adj_closes)
        .map(|(bar, adj_close)| {
            let adj_open = bar.open * adj_close / bar.close;
            adj_open.is_finite().then_some(adj_open)
        })
        .collect();

    let mut series = ReturnSeries {
        symbol: symbol.to_string(),
        legs: Vec::with_capacity(bars.len() * 4),
    };

    for bar in bars {
        series.push(bar.timestamp, bar.midday_close.and_then(|mc| ratio(mc, bar.open)));
    }
    for bar in bars {
        series.push(
            bar.timestamp + Duration::minutes(LUNCH_LEG_OFFSET_MINUTES),
            match (bar.after_hours_open, bar.midday_close) {
                (Some(ao), Some(mc)) => ratio(ao, mc),
                _ => None,
            },
        );
    }
    for bar in bars {
        series.push(
            bar.timestamp + Duration::minutes(AFTERNOON_LEG_OFFSET_MINUTES),
            bar.after_hours_open.and_then(|ao| ratio(bar.close, ao)),
        );
    }
    for i in 0..bars.len().saturating_sub(1) {
        series.push(
            bars[i].timestamp + Duration::hours(OVERNIGHT_LEG_OFFSET_HOURS),
            adj_opens[i + 1].and_then(|next_open| ratio(next_open, adj_closes[i])),
        );
    }
    series
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    let r = numerator / denominator - 1.0;
    if r.is_finite() { Some(r) } else { None }
}

/// Per-symbol returns joined on timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnFrame {
    pub mode: ReturnMode,
    pub symbols: BTreeSet<String>,
    pub rows: BTreeMap<Timestamp, BTreeMap<String, f64>>,
}

impl ReturnFrame {
    /// Outer-joins the series on timestamp. Session frames fill gaps with zero
    /// (no contribution); continuous frames drop any timestamp not covered by
    /// every symbol.
    pub fn join(mode: ReturnMode, series: &[ReturnSeries]) -> ReturnFrame {
        let symbols: BTreeSet<String> = series.iter().map(|s| s.symbol.clone()).collect();
        let mut rows: BTreeMap<Timestamp, BTreeMap<String, f64>> = BTreeMap::new();
        for s in series {
            for leg in &s.legs {
                rows.entry(leg.timestamp)
                    .or_default()
                    .insert(leg.symbol.clone(), leg.value);
            }
        }
        match mode {
            ReturnMode::Session => {
                for row in rows.values_mut() {
                    for symbol in &symbols {
                        row.entry(symbol.clone()).or_insert(0.0);
                    }
                }
            }
            ReturnMode::Continuous => {
                rows.retain(|_, row| symbols.iter().all(|s| row.contains_key(s)));
            }
        }
        ReturnFrame {
            mode,
            symbols,
            rows,
        }
    }

    pub fn get(&self, timestamp: Timestamp) -> Option<&BTreeMap<String, f64>> {
        self.rows.get(&timestamp)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Decomposes one symbol's bars according to `mode`.
pub fn decompose(mode: ReturnMode, symbol: &str, frame: &OhlcvFrame) -> ReturnSeries {
    let bars: Vec<OhlcvBar> = frame.dedup_latest().bars;
    match mode {
        ReturnMode::Continuous => continuous_returns(symbol, &bars),
        ReturnMode::Session => session_returns(symbol, &bars),
    }
}
