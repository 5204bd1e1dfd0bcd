//! Position preprocessing and fixed-frequency grid alignment.
//!
//! Raw model rows arrive at irregular instants. Preprocessing filters dead
//! columns and models, then each model is forward-filled onto a shared grid
//! of `interval`-spaced instants ending at the execution time.

use crate::domain::Timestamp;
use crate::domain::error::AnalyzerError;
use crate::domain::position::{Column, PositionFrame, PositionRecord, Row};
use chrono::{Duration, Timelike};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Model ids with this prefix are aggregation artifacts, not real models.
pub const PORTFOLIO_MODEL_PREFIX: &str = "portfolio:";

#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessOptions {
    pub execution_time: Timestamp,
    pub inactive_after: Duration,
    pub interval: Duration,
    /// When false the frame keeps its raw timestamps.
    pub resample: bool,
}

/// Runs the full preprocessing chain on a freshly built frame.
pub fn preprocess(
    frame: &PositionFrame,
    options: &PreprocessOptions,
) -> Result<PositionFrame, AnalyzerError> {
    let mut frame = frame.clone();
    drop_inactive_columns(&mut frame);
    remove_portfolio_models(&mut frame);
    let active_since = options
        .execution_time
        .checked_sub_signed(options.inactive_after)
        .ok_or_else(|| AnalyzerError::InvalidData {
            reason: format!(
                "inactivity window of {} days is out of range",
                options.inactive_after.num_days()
            ),
        })?;
    remove_inactive_models(&mut frame, active_since);
    debug!(
        models = frame.models().len(),
        rows = frame.row_count(),
        columns = frame.columns().len(),
        "preprocessed positions"
    );
    if options.resample {
        resample(&frame, options.interval, options.execution_time)
    } else {
        Ok(frame)
    }
}

/// Drops columns that are zero in every row.
pub fn drop_inactive_columns(frame: &mut PositionFrame) {
    let dead: Vec<Column> = frame
        .columns()
        .iter()
        .filter(|c| frame.column_abs_sum(c) == 0.0)
        .cloned()
        .collect();
    for column in &dead {
        frame.drop_column(column);
    }
}

pub fn remove_portfolio_models(frame: &mut PositionFrame) {
    frame.retain_models(|model_id, _| !model_id.starts_with(PORTFOLIO_MODEL_PREFIX));
}

/// Removes every model whose latest row is older than `min_timestamp`.
pub fn remove_inactive_models(frame: &mut PositionFrame, min_timestamp: Timestamp) {
    frame.retain_models(|_, rows| {
        rows.keys()
            .next_back()
            .is_some_and(|latest| *latest >= min_timestamp)
    });
}

/// Forward-fills every model onto the grid `anchor + k * interval`, `k >= 0`,
/// truncated at `execution_time`.
///
/// The anchor is one interval before the earliest timestamp in the frame, and
/// each model gets an all-zero baseline row there, so no model shows a
/// position before its first observation. A frame whose earliest rows are
/// already all-zero baselines keeps its anchor, which makes resampling an
/// already aligned frame a no-op. A missing-value sentinel one interval past
/// the execution time bounds the fill.
pub fn resample(
    frame: &PositionFrame,
    interval: Duration,
    execution_time: Timestamp,
) -> Result<PositionFrame, AnalyzerError> {
    if interval <= Duration::zero() {
        return Err(AnalyzerError::InvalidData {
            reason: format!("resample interval must be positive, got {interval}"),
        });
    }
    let Some(earliest) = frame.min_timestamp() else {
        return Ok(frame.clone());
    };
    let out_of_range = || AnalyzerError::InvalidData {
        reason: format!("resample interval {interval} is out of range"),
    };
    let anchor = if already_gridded(frame, earliest, interval) {
        earliest
    } else {
        earliest.checked_sub_signed(interval).ok_or_else(out_of_range)?
    };
    let horizon = execution_time
        .checked_add_signed(interval)
        .ok_or_else(out_of_range)?;

    let zero_row: Row = frame.columns().iter().map(|c| (c.clone(), 0.0)).collect();
    let mut out = PositionFrame::new();

    for (model_id, rows) in frame.models() {
        let mut points: BTreeMap<Timestamp, Option<&Row>> = BTreeMap::new();
        points.insert(anchor, Some(&zero_row));
        for (ts, row) in rows.range(anchor..horizon) {
            points.insert(*ts, Some(row));
        }
        points.insert(horizon, None);

        let mut grid: BTreeMap<Timestamp, Row> = BTreeMap::new();
        let mut source = points.iter().peekable();
        let mut current: Option<&Row> = None;
        let mut slot = anchor;
        while slot <= execution_time {
            while let Some((ts, row)) = source.peek() {
                if **ts > slot {
                    break;
                }
                current = **row;
                source.next();
            }
            if let Some(row) = current {
                grid.insert(slot, row.clone());
            }
            slot += interval;
        }

        if grid.is_empty() {
            continue;
        }
        for (ts, row) in grid {
            out.insert_row(model_id, ts, row);
        }
    }

    debug!(
        models = out.models().len(),
        rows = out.row_count(),
        %anchor,
        %execution_time,
        "resampled positions"
    );
    Ok(out)
}

/// Every model starts with an all-zero row at `earliest` and steps by exactly
/// `interval` from there.
fn already_gridded(frame: &PositionFrame, earliest: Timestamp, interval: Duration) -> bool {
    frame.models().values().all(|rows| {
        rows.keys().next() == Some(&earliest)
            && rows
                .get(&earliest)
                .is_some_and(|row| row.values().all(|v| *v == 0.0))
            && rows
                .keys()
                .zip(rows.keys().skip(1))
                .all(|(a, b)| *b - *a == interval)
    })
}

/// Copies each row whose UTC hour matches a rule to `timestamp + shift`,
/// unless the model already has a row there. Rules apply in order, so a copy
/// produced by one rule is visible to the next.
pub fn fill_session_shifts(frame: &PositionFrame, rules: &[(u32, Duration)]) -> PositionFrame {
    let mut out = frame.clone();
    for (hour, shift) in rules {
        let copies: Vec<(String, Timestamp, Row)> = out
            .iter()
            .filter(|(_, ts, _)| ts.hour() == *hour)
            .filter_map(|(model_id, ts, row)| {
                let dest = ts.checked_add_signed(*shift)?;
                if out.get(model_id, dest).is_some() {
                    None
                } else {
                    Some((model_id.to_string(), dest, row.clone()))
                }
            })
            .collect();
        for (model_id, ts, row) in copies {
            out.insert_row(&model_id, ts, row);
        }
    }
    out
}

/// Moves each record to the instant it could actually be traded on:
/// `max(timestamp + delay + execution_delay, timestamp)`.
///
/// A record whose delay is not finite or pushes it out of the timestamp range
/// keeps its reported timestamp.
pub fn shift_to_executable_time(
    records: &[PositionRecord],
    execution_delay: Duration,
) -> Vec<PositionRecord> {
    records
        .iter()
        .map(|record| PositionRecord {
            timestamp: executable_time(record, execution_delay),
            ..record.clone()
        })
        .collect()
}

fn executable_time(record: &PositionRecord, execution_delay: Duration) -> Timestamp {
    let shifted = Some(record.delay)
        .filter(|d| d.is_finite())
        .and_then(|d| Duration::try_milliseconds((d * 1000.0).round() as i64))
        .and_then(|delay| delay.checked_add(&execution_delay))
        .and_then(|total| record.timestamp.checked_add_signed(total));
    match shifted {
        Some(t) => t.max(record.timestamp),
        None => {
            warn!(
                model_id = %record.model_id,
                timestamp = %record.timestamp,
                delay = record.delay,
                "unusable delay, keeping reported timestamp"
            );
            record.timestamp
        }
    }
}
