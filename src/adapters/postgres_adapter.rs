//! PostgreSQL position source and result store.
//!
//! Reads long-format `public.positions` and writes `public.analyzer_positions`
//! and `public.analyzer_rets`, with the same layout as the SQLite adapter but
//! native `timestamptz` columns.

use crate::domain::Timestamp;
use crate::domain::error::AnalyzerError;
use crate::domain::output::{AnalyzerPosition, AnalyzerReturn};
use crate::domain::position::PositionRecord;
use crate::ports::config_port::ConfigPort;
use crate::ports::position_port::PositionPort;
use crate::ports::result_port::ResultPort;
use chrono::{DateTime, Utc};
use postgres::types::ToSql;
use postgres::{Client, NoTls};
use std::cell::RefCell;
use std::collections::BTreeMap;
use tracing::info;

pub struct PostgresAdapter {
    client: RefCell<Client>,
}

fn query_err(e: postgres::Error) -> AnalyzerError {
    AnalyzerError::DatabaseQuery {
        reason: e.to_string(),
    }
}

impl PostgresAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, AnalyzerError> {
        let connection_string = config
            .get_nonempty("postgres", "connection_string")
            .ok_or_else(|| AnalyzerError::ConfigMissing {
                section: "postgres".into(),
                key: "connection_string".into(),
            })?;

        let client =
            Client::connect(&connection_string, NoTls).map_err(|e| AnalyzerError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client: RefCell::new(client),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), AnalyzerError> {
        self.client
            .borrow_mut()
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS public.analyzer_positions (
                    timestamp timestamptz NOT NULL,
                    model_id text NOT NULL,
                    symbol text NOT NULL,
                    position double precision NOT NULL,
                    position_diff double precision NOT NULL,
                    tournament text NOT NULL DEFAULT '',
                    PRIMARY KEY (tournament, model_id, symbol, timestamp)
                );
                CREATE INDEX IF NOT EXISTS idx_analyzer_positions_timestamp_model_id
                    ON public.analyzer_positions(timestamp, model_id);
                CREATE TABLE IF NOT EXISTS public.analyzer_rets (
                    timestamp timestamptz NOT NULL,
                    model_id text NOT NULL,
                    ret double precision NOT NULL,
                    tournament text NOT NULL DEFAULT '',
                    PRIMARY KEY (tournament, model_id, timestamp)
                );
                CREATE INDEX IF NOT EXISTS idx_analyzer_rets_timestamp_model_id
                    ON public.analyzer_rets(timestamp, model_id);",
            )
            .map_err(query_err)
    }
}

impl PositionPort for PostgresAdapter {
    fn get_positions(
        &self,
        tournament: Option<&str>,
        min_timestamp: Option<Timestamp>,
    ) -> Result<Vec<PositionRecord>, AnalyzerError> {
        let query = "SELECT model_id, timestamp, kind, key, \
                            value::double precision, delay::double precision, tournament \
                     FROM public.positions \
                     WHERE ($1::text IS NULL OR tournament = $1) \
                       AND ($2::timestamptz IS NULL OR timestamp >= $2) \
                     ORDER BY model_id, timestamp";

        let params: &[&(dyn ToSql + Sync)] = &[&tournament, &min_timestamp];
        let rows = self
            .client
            .borrow_mut()
            .query(query, params)
            .map_err(|e| AnalyzerError::PositionSource {
                reason: e.to_string(),
            })?;

        let mut records: BTreeMap<(String, Timestamp), PositionRecord> = BTreeMap::new();
        for row in rows {
            let model_id: String = row.get(0);
            let timestamp: DateTime<Utc> = row.get(1);
            let kind: String = row.get(2);
            let key: String = row.get(3);
            let value: f64 = row.get(4);
            let row_tournament: String = row.get(6);

            let record = records
                .entry((model_id.clone(), timestamp))
                .or_insert_with(|| PositionRecord::new(&model_id, timestamp));
            record.delay = row.get(5);
            record.tournament = (!row_tournament.is_empty()).then_some(row_tournament);
            if kind == "w" {
                record.weights.insert(key, value);
            } else {
                record.positions.insert(key, value);
            }
        }

        Ok(records.into_values().collect())
    }
}

impl ResultPort for PostgresAdapter {
    fn last_position_time(
        &self,
        tournament: Option<&str>,
    ) -> Result<Option<Timestamp>, AnalyzerError> {
        let row = self
            .client
            .borrow_mut()
            .query_one(
                "SELECT MAX(timestamp) FROM public.analyzer_positions WHERE tournament = $1",
                &[&tournament.unwrap_or("")],
            )
            .map_err(query_err)?;
        Ok(row.get(0))
    }

    fn replace_window(
        &self,
        min_update_time: Timestamp,
        tournament: Option<&str>,
        positions: &[AnalyzerPosition],
        returns: &[AnalyzerReturn],
    ) -> Result<(), AnalyzerError> {
        let scope = tournament.unwrap_or("");
        let mut client = self.client.borrow_mut();
        let mut tx = client.transaction().map_err(query_err)?;

        let deleted_positions = tx
            .execute(
                "DELETE FROM public.analyzer_positions WHERE timestamp >= $1 AND tournament = $2",
                &[&min_update_time, &scope],
            )
            .map_err(query_err)?;
        let deleted_returns = tx
            .execute(
                "DELETE FROM public.analyzer_rets WHERE timestamp >= $1 AND tournament = $2",
                &[&min_update_time, &scope],
            )
            .map_err(query_err)?;

        let insert_position = tx
            .prepare(
                "INSERT INTO public.analyzer_positions \
                 (timestamp, model_id, symbol, position, position_diff, tournament) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .map_err(query_err)?;
        for row in positions {
            tx.execute(
                &insert_position,
                &[
                    &row.timestamp,
                    &row.model_id,
                    &row.symbol,
                    &row.position,
                    &row.position_diff,
                    &row.tournament.as_deref().unwrap_or(""),
                ],
            )
            .map_err(query_err)?;
        }

        let insert_return = tx
            .prepare(
                "INSERT INTO public.analyzer_rets (timestamp, model_id, ret, tournament) \
                 VALUES ($1, $2, $3, $4)",
            )
            .map_err(query_err)?;
        for row in returns {
            tx.execute(
                &insert_return,
                &[
                    &row.timestamp,
                    &row.model_id,
                    &row.ret,
                    &row.tournament.as_deref().unwrap_or(""),
                ],
            )
            .map_err(query_err)?;
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
        self.client
            .borrow_mut()
            .batch_execute("VACUUM public.analyzer_positions; VACUUM public.analyzer_rets;")
            .map_err(query_err)
    }
}
