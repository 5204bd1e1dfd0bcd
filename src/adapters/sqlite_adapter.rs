//! SQLite storage adapter.
//!
//! One database holds the raw inputs (`ohlcv`, long-format `positions`) and
//! the analyzer outputs (`analyzer_positions`, `analyzer_rets`). Timestamps
//! are stored as second-precision RFC 3339 text so lexical order is time
//! order. A missing tournament is stored as the empty string.

use crate::domain::Timestamp;
use crate::domain::error::AnalyzerError;
use crate::domain::ohlcv::{OhlcvBar, OhlcvFrame};
use crate::domain::output::{AnalyzerPosition, AnalyzerReturn};
use crate::domain::position::PositionRecord;
use crate::ports::config_port::ConfigPort;
use crate::ports::market_data_port::{FetchRequest, MarketDataPort, MarketKey};
use crate::ports::position_port::PositionPort;
use crate::ports::result_port::ResultPort;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn ts_text(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(text: &str) -> rusqlite::Result<Timestamp> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                text.len(),
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn tournament_text(tournament: Option<&str>) -> &str {
    tournament.unwrap_or("")
}

fn tournament_opt(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

fn query_err(e: rusqlite::Error) -> AnalyzerError {
    AnalyzerError::DatabaseQuery {
        reason: e.to_string(),
    }
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, AnalyzerError> {
        let db_path =
            config
                .get_nonempty("sqlite", "path")
                .ok_or_else(|| AnalyzerError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool =
            Pool::builder()
                .max_size(pool_size)
                .build(manager)
                .map_err(|e: r2d2::Error| AnalyzerError::Database {
                    reason: e.to_string(),
                })?;

        debug!(path = %db_path, pool_size, "opened sqlite database");
        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, AnalyzerError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| AnalyzerError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, AnalyzerError> {
        self.pool.get().map_err(|e: r2d2::Error| AnalyzerError::Database {
            reason: e.to_string(),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), AnalyzerError> {
        let conn = self.connection()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ohlcv (
                exchange TEXT NOT NULL,
                market TEXT NOT NULL,
                interval INTEGER NOT NULL,
                price_type TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                midday_close REAL,
                after_hours_open REAL,
                adjustment_factor REAL NOT NULL DEFAULT 1.0,
                PRIMARY KEY (exchange, market, interval, price_type, timestamp)
            );
            CREATE TABLE IF NOT EXISTS positions (
                model_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('p', 'w')),
                key TEXT NOT NULL,
                value REAL NOT NULL,
                delay REAL NOT NULL DEFAULT 0,
                tournament TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (tournament, model_id, timestamp, kind, key)
            );
            CREATE INDEX IF NOT EXISTS idx_positions_timestamp ON positions(timestamp);
            CREATE TABLE IF NOT EXISTS analyzer_positions (
                timestamp TEXT NOT NULL,
                model_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                position REAL NOT NULL,
                position_diff REAL NOT NULL,
                tournament TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (tournament, model_id, symbol, timestamp)
            );
            CREATE INDEX IF NOT EXISTS idx_analyzer_positions_timestamp_model_id
                ON analyzer_positions(timestamp, model_id);
            CREATE TABLE IF NOT EXISTS analyzer_rets (
                timestamp TEXT NOT NULL,
                model_id TEXT NOT NULL,
                ret REAL NOT NULL,
                tournament TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (tournament, model_id, timestamp)
            );
            CREATE INDEX IF NOT EXISTS idx_analyzer_rets_timestamp_model_id
                ON analyzer_rets(timestamp, model_id);",
        )
        .map_err(query_err)?;

        Ok(())
    }

    /// Upserts bars under `key`; each bar's own symbol is ignored in favor of `key.market`.
    pub fn insert_bars(&self, key: &MarketKey, bars: &[OhlcvBar]) -> Result<(), AnalyzerError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(query_err)?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO ohlcv (exchange, market, interval, price_type, timestamp,
                        open, high, low, close, volume, midday_close, after_hours_open, adjustment_factor)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                )
                .map_err(query_err)?;
            for bar in bars {
                stmt.execute(params![
                    key.exchange,
                    key.market,
                    key.interval_secs,
                    key.price_type.as_deref().unwrap_or(""),
                    ts_text(bar.timestamp),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.midday_close,
                    bar.after_hours_open,
                    bar.adjustment_factor
                ])
                .map_err(query_err)?;
            }
        }

        tx.commit().map_err(query_err)?;
        Ok(())
    }

    /// Stores records in long format, one row per cell.
    pub fn insert_positions(&self, records: &[PositionRecord]) -> Result<(), AnalyzerError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(query_err)?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO positions (model_id, timestamp, kind, key, value, delay, tournament)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(query_err)?;
            for record in records {
                let ts = ts_text(record.timestamp);
                let tournament = tournament_text(record.tournament.as_deref());
                let cells = record
                    .positions
                    .iter()
                    .map(|(k, v)| ("p", k, v))
                    .chain(record.weights.iter().map(|(k, v)| ("w", k, v)));
                for (kind, key, value) in cells {
                    stmt.execute(params![
                        record.model_id,
                        ts,
                        kind,
                        key,
                        value,
                        record.delay,
                        tournament
                    ])
                    .map_err(query_err)?;
                }
            }
        }

        tx.commit().map_err(query_err)?;
        Ok(())
    }

    /// Stored analyzer position rows for one tournament, ordered by time.
    pub fn analyzer_positions(
        &self,
        tournament: Option<&str>,
    ) -> Result<Vec<AnalyzerPosition>, AnalyzerError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, model_id, symbol, position, position_diff, tournament
                 FROM analyzer_positions WHERE tournament = ?1
                 ORDER BY timestamp, model_id, symbol",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![tournament_text(tournament)], |row| {
                let ts: String = row.get(0)?;
                Ok(AnalyzerPosition {
                    timestamp: parse_ts(&ts)?,
                    model_id: row.get(1)?,
                    symbol: row.get(2)?,
                    position: row.get(3)?,
                    position_diff: row.get(4)?,
                    tournament: tournament_opt(row.get(5)?),
                })
            })
            .map_err(query_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    pub fn analyzer_returns(
        &self,
        tournament: Option<&str>,
    ) -> Result<Vec<AnalyzerReturn>, AnalyzerError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, model_id, ret, tournament
                 FROM analyzer_rets WHERE tournament = ?1
                 ORDER BY timestamp, model_id",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![tournament_text(tournament)], |row| {
                let ts: String = row.get(0)?;
                Ok(AnalyzerReturn {
                    timestamp: parse_ts(&ts)?,
                    model_id: row.get(1)?,
                    ret: row.get(2)?,
                    tournament: tournament_opt(row.get(3)?),
                })
            })
            .map_err(query_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }
}

impl MarketDataPort for SqliteAdapter {
    fn fetch_ohlcv(
        &self,
        request: &FetchRequest,
        previous: Option<&OhlcvFrame>,
    ) -> Result<OhlcvFrame, AnalyzerError> {
        let key = &request.key;
        let conn = self.connection()?;

        let after = previous.and_then(OhlcvFrame::last_timestamp);
        let (op, bound) = match (after, request.start_time) {
            (Some(last), _) => (">", Some(last)),
            (None, start) => (">=", start),
        };
        let query = format!(
            "SELECT timestamp, open, high, low, close, volume, midday_close, after_hours_open, adjustment_factor
             FROM ohlcv
             WHERE exchange = ?1 AND market = ?2 AND interval = ?3 AND price_type = ?4
               AND (?5 IS NULL OR timestamp {op} ?5)
             ORDER BY timestamp ASC"
        );

        let mut stmt = conn.prepare(&query).map_err(query_err)?;
        let rows = stmt
            .query_map(
                params![
                    key.exchange,
                    key.market,
                    key.interval_secs,
                    key.price_type.as_deref().unwrap_or(""),
                    bound.map(ts_text)
                ],
                |row| {
                    let ts: String = row.get(0)?;
                    Ok(OhlcvBar {
                        symbol: key.market.clone(),
                        timestamp: parse_ts(&ts)?,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        volume: row.get(5)?,
                        midday_close: row.get(6)?,
                        after_hours_open: row.get(7)?,
                        adjustment_factor: row.get(8)?,
                    })
                },
            )
            .map_err(query_err)?;

        let bars = rows.collect::<Result<Vec<_>, _>>().map_err(query_err)?;
        debug!(%key, new_bars = bars.len(), "read ohlcv rows");

        let fresh = OhlcvFrame::new(bars);
        Ok(match previous {
            Some(prev) => prev.append_newer(fresh),
            None => fresh,
        })
    }
}

impl PositionPort for SqliteAdapter {
    fn get_positions(
        &self,
        tournament: Option<&str>,
        min_timestamp: Option<Timestamp>,
    ) -> Result<Vec<PositionRecord>, AnalyzerError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT model_id, timestamp, kind, key, value, delay, tournament
                 FROM positions
                 WHERE (?1 IS NULL OR tournament = ?1) AND (?2 IS NULL OR timestamp >= ?2)
                 ORDER BY model_id, timestamp",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![tournament, min_timestamp.map(ts_text)], |row| {
                let ts: String = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    parse_ts(&ts)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(query_err)?;

        let mut records: BTreeMap<(String, Timestamp), PositionRecord> = BTreeMap::new();
        for row in rows {
            let (model_id, timestamp, kind, key, value, delay, row_tournament) =
                row.map_err(query_err)?;
            let record = records
                .entry((model_id.clone(), timestamp))
                .or_insert_with(|| PositionRecord::new(&model_id, timestamp));
            record.delay = delay;
            record.tournament = tournament_opt(row_tournament);
            if kind == "w" {
                record.weights.insert(key, value);
            } else {
                record.positions.insert(key, value);
            }
        }

        Ok(records.into_values().collect())
    }
}

impl ResultPort for SqliteAdapter {
    fn last_position_time(
        &self,
        tournament: Option<&str>,
    ) -> Result<Option<Timestamp>, AnalyzerError> {
        let conn = self.connection()?;
        let last: Option<String> = conn
            .query_row(
                "SELECT MAX(timestamp) FROM analyzer_positions WHERE tournament = ?1",
                params![tournament_text(tournament)],
                |row| row.get(0),
            )
            .map_err(query_err)?;

        last.as_deref().map(parse_ts).transpose().map_err(query_err)
    }

    fn replace_window(
        &self,
        min_update_time: Timestamp,
        tournament: Option<&str>,
        positions: &[AnalyzerPosition],
        returns: &[AnalyzerReturn],
    ) -> Result<(), AnalyzerError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(query_err)?;
        let cutoff = ts_text(min_update_time);
        let scope = tournament_text(tournament);

        let deleted_positions = tx
            .execute(
                "DELETE FROM analyzer_positions WHERE timestamp >= ?1 AND tournament = ?2",
                params![cutoff, scope],
            )
            .map_err(query_err)?;
        let deleted_returns = tx
            .execute(
                "DELETE FROM analyzer_rets WHERE timestamp >= ?1 AND tournament = ?2",
                params![cutoff, scope],
            )
            .map_err(query_err)?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO analyzer_positions (timestamp, model_id, symbol, position, position_diff, tournament)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(query_err)?;
            for row in positions {
                stmt.execute(params![
                    ts_text(row.timestamp),
                    row.model_id,
                    row.symbol,
                    row.position,
                    row.position_diff,
                    tournament_text(row.tournament.as_deref())
                ])
                .map_err(query_err)?;
            }

            let mut stmt = tx
                .prepare(
                    "INSERT INTO analyzer_rets (timestamp, model_id, ret, tournament)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(query_err)?;
            for row in returns {
                stmt.execute(params![
                    ts_text(row.timestamp),
                    row.model_id,
                    row.ret,
                    tournament_text(row.tournament.as_deref())
                ])
                .map_err(query_err)?;
            }
        }

        tx.commit().map_err(query_err)?;
        info!(
            deleted_positions,
            deleted_returns,
            inserted_positions = positions.len(),
            inserted_returns = returns.len(),
            "replaced result window"
        );
        Ok(())
    }

    fn vacuum(&self) -> Result<(), AnalyzerError> {
        let conn = self.connection()?;
        conn.execute_batch("VACUUM").map_err(query_err)
    }
}
