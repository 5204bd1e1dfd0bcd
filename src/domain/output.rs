//! Row shapes written to the `analyzer_positions` and `analyzer_rets` tables.

use crate::domain::Timestamp;
use crate::domain::attribution::ModelReturns;
use crate::domain::position::PositionFrame;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerPosition {
    pub timestamp: Timestamp,
    pub model_id: String,
    /// Symbol for position columns, target model id for weight columns.
    pub symbol: String,
    pub position: f64,
    pub position_diff: f64,
    pub tournament: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerReturn {
    pub timestamp: Timestamp,
    pub model_id: String,
    pub ret: f64,
    pub tournament: Option<String>,
}

/// One row per `(model, timestamp, column)` for every column that is nonzero
/// somewhere in the frame. `position_diff` is taken against the same model's
/// previous row (the first row diffs to zero) before rows older than
/// `min_update_time` are filtered out.
pub fn build_position_rows(
    frame: &PositionFrame,
    min_update_time: Timestamp,
    tournament: Option<&str>,
) -> Vec<AnalyzerPosition> {
    let mut out = Vec::new();
    for column in frame.columns() {
        if frame.column_abs_sum(column) == 0.0 {
            continue;
        }
        for (model_id, rows) in frame.models() {
            let mut previous: Option<f64> = None;
            for (ts, row) in rows {
                let position = row.get(column).copied().unwrap_or(0.0);
                let position_diff = previous.map_or(0.0, |p| position - p);
                previous = Some(position);
                if *ts < min_update_time {
                    continue;
                }
                out.push(AnalyzerPosition {
                    timestamp: *ts,
                    model_id: model_id.clone(),
                    symbol: column.key().to_string(),
                    position,
                    position_diff,
                    tournament: tournament.map(str::to_string),
                });
            }
        }
    }
    out
}

pub fn build_return_rows(
    returns: &ModelReturns,
    min_update_time: Timestamp,
    tournament: Option<&str>,
) -> Vec<AnalyzerReturn> {
    returns
        .rows
        .range(min_update_time..)
        .flat_map(|(ts, by_model)| {
            by_model.iter().map(move |(model_id, ret)| AnalyzerReturn {
                timestamp: *ts,
                model_id: model_id.clone(),
                ret: *ret,
                tournament: tournament.map(str::to_string),
            })
        })
        .collect()
}
