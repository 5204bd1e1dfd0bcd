//! CSV file adapter for market data and model positions.
//!
//! Market data lives in one file per market, `<dir>/<market>_<exchange>.csv`,
//! with a header row naming at least `timestamp,open,close`. Positions come
//! from a single long-format file, one cell per line:
//! `model_id,timestamp,kind,key,value,delay[,tournament]` where `kind` is `p`
//! (symbol position) or `w` (weight on another model).

use crate::domain::Timestamp;
use crate::domain::error::AnalyzerError;
use crate::domain::ohlcv::{OhlcvBar, OhlcvFrame};
use crate::domain::position::PositionRecord;
use crate::ports::market_data_port::{FetchRequest, MarketDataPort};
use crate::ports::position_port::PositionPort;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::StringRecord;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use tracing::debug;

pub struct CsvAdapter {
    ohlcv_dir: PathBuf,
    positions_path: Option<PathBuf>,
}

impl CsvAdapter {
    pub fn new(ohlcv_dir: PathBuf) -> Self {
        Self {
            ohlcv_dir,
            positions_path: None,
        }
    }

    pub fn with_positions(mut self, path: PathBuf) -> Self {
        self.positions_path = Some(path);
        self
    }

    fn csv_path(&self, market: &str, exchange: &str) -> PathBuf {
        self.ohlcv_dir.join(format!("{}_{}.csv", market, exchange))
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare date (UTC midnight).
pub fn parse_timestamp(value: &str) -> Result<Timestamp, AnalyzerError> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(ts.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
        .ok_or_else(|| AnalyzerError::InvalidData {
            reason: format!("invalid timestamp '{value}'"),
        })
}

fn column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name))
}

fn required_column(headers: &StringRecord, name: &str, file: &str) -> Result<usize, AnalyzerError> {
    column(headers, name).ok_or_else(|| AnalyzerError::InvalidData {
        reason: format!("{file}: missing {name} column"),
    })
}

fn field<'r>(record: &'r StringRecord, index: usize, name: &str) -> Result<&'r str, AnalyzerError> {
    record.get(index).ok_or_else(|| AnalyzerError::InvalidData {
        reason: format!("missing {name} value"),
    })
}

fn number(record: &StringRecord, index: usize, name: &str) -> Result<f64, AnalyzerError> {
    let raw = field(record, index, name)?.trim();
    raw.parse().map_err(|e| AnalyzerError::InvalidData {
        reason: format!("invalid {name} value '{raw}': {e}"),
    })
}

/// Blank cells read as `None`.
fn optional_number(
    record: &StringRecord,
    index: Option<usize>,
    name: &str,
) -> Result<Option<f64>, AnalyzerError> {
    match index {
        Some(i) if record.get(i).is_some_and(|v| !v.trim().is_empty()) => {
            number(record, i, name).map(Some)
        }
        _ => Ok(None),
    }
}

fn csv_error(path: &std::path::Path, e: csv::Error) -> AnalyzerError {
    AnalyzerError::InvalidData {
        reason: format!("CSV parse error in {}: {}", path.display(), e),
    }
}

impl MarketDataPort for CsvAdapter {
    /// A missing file yields an empty frame. With `previous`, only rows newer
    /// than its last bar are read and appended to it.
    fn fetch_ohlcv(
        &self,
        request: &FetchRequest,
        previous: Option<&OhlcvFrame>,
    ) -> Result<OhlcvFrame, AnalyzerError> {
        let key = &request.key;
        let path = self.csv_path(&key.market, &key.exchange);
        if !path.exists() {
            debug!(path = %path.display(), "no market data file");
            return Ok(previous.cloned().unwrap_or_default());
        }

        let file_name = path.display().to_string();
        let mut rdr = csv::Reader::from_path(&path).map_err(|e| csv_error(&path, e))?;
        let headers = rdr.headers().map_err(|e| csv_error(&path, e))?.clone();

        let ts_col = required_column(&headers, "timestamp", &file_name)?;
        let open_col = required_column(&headers, "open", &file_name)?;
        let close_col = required_column(&headers, "close", &file_name)?;
        let high_col = column(&headers, "high");
        let low_col = column(&headers, "low");
        let volume_col = column(&headers, "volume");
        let midday_col = column(&headers, "midday_close");
        let after_hours_col = column(&headers, "after_hours_open");
        let factor_col = column(&headers, "adjustment_factor");

        let after = previous.and_then(OhlcvFrame::last_timestamp);
        let mut bars = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| csv_error(&path, e))?;
            let timestamp = parse_timestamp(field(&record, ts_col, "timestamp")?)?;

            if request.start_time.is_some_and(|start| timestamp < start) {
                continue;
            }
            if after.is_some_and(|last| timestamp <= last) {
                continue;
            }

            let open = number(&record, open_col, "open")?;
            let close = number(&record, close_col, "close")?;
            bars.push(OhlcvBar {
                symbol: key.market.clone(),
                timestamp,
                open,
                high: optional_number(&record, high_col, "high")?.unwrap_or(open.max(close)),
                low: optional_number(&record, low_col, "low")?.unwrap_or(open.min(close)),
                close,
                volume: optional_number(&record, volume_col, "volume")?.unwrap_or(0.0),
                midday_close: optional_number(&record, midday_col, "midday_close")?,
                after_hours_open: optional_number(&record, after_hours_col, "after_hours_open")?,
                adjustment_factor: optional_number(&record, factor_col, "adjustment_factor")?
                    .unwrap_or(1.0),
            });
        }

        debug!(%key, new_bars = bars.len(), "read market data file");
        let fresh = OhlcvFrame::new(bars);
        Ok(match previous {
            Some(prev) => prev.append_newer(fresh),
            None => fresh.dedup_latest(),
        })
    }
}

impl PositionPort for CsvAdapter {
    fn get_positions(
        &self,
        tournament: Option<&str>,
        min_timestamp: Option<Timestamp>,
    ) -> Result<Vec<PositionRecord>, AnalyzerError> {
        let path = self
            .positions_path
            .as_ref()
            .ok_or_else(|| AnalyzerError::PositionSource {
                reason: "no positions file configured".into(),
            })?;
        let file = File::open(path).map_err(|e| AnalyzerError::PositionSource {
            reason: format!("failed to open {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let mut records: BTreeMap<(String, Timestamp), PositionRecord> = BTreeMap::new();

        for result in rdr.records() {
            let row = result.map_err(|e| AnalyzerError::PositionSource {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;

            let row_tournament = row.get(6).map(str::trim).filter(|t| !t.is_empty());
            if tournament.is_some() && row_tournament != tournament {
                continue;
            }

            let model_id = field(&row, 0, "model_id")?.trim().to_string();
            let timestamp = parse_timestamp(field(&row, 1, "timestamp")?)?;
            if min_timestamp.is_some_and(|min| timestamp < min) {
                continue;
            }
            let kind = field(&row, 2, "kind")?.trim();
            let key = field(&row, 3, "key")?.trim();
            let value = number(&row, 4, "value")?;
            let delay = optional_number(&row, Some(5), "delay")?.unwrap_or(0.0);

            let record = records
                .entry((model_id.clone(), timestamp))
                .or_insert_with(|| PositionRecord::new(&model_id, timestamp));
            record.delay = delay;
            record.tournament = row_tournament.map(str::to_string);
            match kind {
                "p" => {
                    record.positions.insert(key.to_string(), value);
                }
                "w" => {
                    record.weights.insert(key.to_string(), value);
                }
                other => {
                    return Err(AnalyzerError::PositionSource {
                        reason: format!("unknown position kind '{other}' for model {model_id}"),
                    });
                }
            }
        }

        Ok(records.into_values().collect())
    }
}
