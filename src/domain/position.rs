//! Position/weight records and the wide position frame.

use crate::domain::Timestamp;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Column identity within a model row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    /// Position size in a tradable symbol.
    Symbol(String),
    /// Weight on another model's book.
    Weight(String),
}

impl Column {
    /// Symbol for position columns, target model id for weight columns.
    pub fn key(&self) -> &str {
        match self {
            Column::Symbol(s) | Column::Weight(s) => s,
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Column::Symbol(_))
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::Symbol(s) => write!(f, "p.{s}"),
            Column::Weight(m) => write!(f, "w.{m}"),
        }
    }
}

/// A single cell of a model row.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionValue {
    Symbol { symbol: String, amount: f64 },
    WeightRef { target: String, weight: f64 },
}

impl PositionValue {
    pub fn from_cell(column: &Column, value: f64) -> Self {
        match column {
            Column::Symbol(symbol) => PositionValue::Symbol {
                symbol: symbol.clone(),
                amount: value,
            },
            Column::Weight(target) => PositionValue::WeightRef {
                target: target.clone(),
                weight: value,
            },
        }
    }
}

/// The cells of a row as tagged values, in column order.
pub fn cells(row: &Row) -> impl Iterator<Item = PositionValue> + '_ {
    row.iter()
        .map(|(column, value)| PositionValue::from_cell(column, *value))
}

/// One upstream row as delivered by the position source.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
    pub model_id: String,
    pub timestamp: Timestamp,
    pub positions: BTreeMap<String, f64>,
    pub weights: BTreeMap<String, f64>,
    /// Reporting latency in seconds.
    pub delay: f64,
    pub tournament: Option<String>,
}

impl PositionRecord {
    pub fn new(model_id: &str, timestamp: Timestamp) -> Self {
        PositionRecord {
            model_id: model_id.to_string(),
            timestamp,
            positions: BTreeMap::new(),
            weights: BTreeMap::new(),
            delay: 0.0,
            tournament: None,
        }
    }

    pub fn with_position(mut self, symbol: &str, amount: f64) -> Self {
        self.positions.insert(symbol.to_string(), amount);
        self
    }

    pub fn with_weight(mut self, target: &str, weight: f64) -> Self {
        self.weights.insert(target.to_string(), weight);
        self
    }
}

pub type Row = BTreeMap<Column, f64>;

/// Wide frame indexed by `(model_id, timestamp)`.
///
/// Every row carries every column in `columns`; cells a model never reported
/// are `0.0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionFrame {
    columns: BTreeSet<Column>,
    models: BTreeMap<String, BTreeMap<Timestamp, Row>>,
}

impl PositionFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the frame from upstream records. A later record for the same
    /// `(model_id, timestamp)` replaces an earlier one.
    pub fn from_records(records: &[PositionRecord]) -> Self {
        let mut frame = PositionFrame::new();
        for record in records {
            let mut row = Row::new();
            for (symbol, amount) in &record.positions {
                row.insert(Column::Symbol(symbol.clone()), finite_or_zero(*amount));
            }
            for (target, weight) in &record.weights {
                row.insert(Column::Weight(target.clone()), finite_or_zero(*weight));
            }
            frame.insert_row(&record.model_id, record.timestamp, row);
        }
        frame
    }

    /// Inserts or replaces a row, widening the column set as needed.
    pub fn insert_row(&mut self, model_id: &str, timestamp: Timestamp, row: Row) {
        let new_columns: Vec<Column> = row
            .keys()
            .filter(|c| !self.columns.contains(*c))
            .cloned()
            .collect();
        for column in new_columns {
            for rows in self.models.values_mut() {
                for existing in rows.values_mut() {
                    existing.entry(column.clone()).or_insert(0.0);
                }
            }
            self.columns.insert(column);
        }
        let mut full = row;
        for column in &self.columns {
            full.entry(column.clone()).or_insert(0.0);
        }
        self.models
            .entry(model_id.to_string())
            .or_default()
            .insert(timestamp, full);
    }

    pub fn columns(&self) -> &BTreeSet<Column> {
        &self.columns
    }

    pub fn symbols(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter_map(|c| match c {
                Column::Symbol(s) => Some(s.clone()),
                Column::Weight(_) => None,
            })
            .collect()
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn model_rows(&self, model_id: &str) -> Option<&BTreeMap<Timestamp, Row>> {
        self.models.get(model_id)
    }

    pub fn models(&self) -> &BTreeMap<String, BTreeMap<Timestamp, Row>> {
        &self.models
    }

    pub fn get(&self, model_id: &str, timestamp: Timestamp) -> Option<&Row> {
        self.models.get(model_id).and_then(|rows| rows.get(&timestamp))
    }

    pub fn value(&self, model_id: &str, timestamp: Timestamp, column: &Column) -> Option<f64> {
        self.get(model_id, timestamp)
            .and_then(|row| row.get(column))
            .copied()
    }

    pub fn row_count(&self) -> usize {
        self.models.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn min_timestamp(&self) -> Option<Timestamp> {
        self.models
            .values()
            .filter_map(|rows| rows.keys().next().copied())
            .min()
    }

    /// All `(model_id, timestamp, row)` triples in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Timestamp, &Row)> {
        self.models.iter().flat_map(|(model_id, rows)| {
            rows.iter()
                .map(move |(ts, row)| (model_id.as_str(), *ts, row))
        })
    }

    pub(crate) fn retain_models<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &BTreeMap<Timestamp, Row>) -> bool,
    {
        self.models.retain(|model_id, rows| keep(model_id, rows));
    }

    pub(crate) fn drop_column(&mut self, column: &Column) {
        self.columns.remove(column);
        for rows in self.models.values_mut() {
            for row in rows.values_mut() {
                row.remove(column);
            }
        }
    }

    /// Sum of absolute values of a column across every row.
    pub fn column_abs_sum(&self, column: &Column) -> f64 {
        self.iter()
            .filter_map(|(_, _, row)| row.get(column))
            .map(|v| v.abs())
            .sum()
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
