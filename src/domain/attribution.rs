//! Per-model realized return attribution.

use crate::domain::Timestamp;
use crate::domain::position::{PositionFrame, PositionValue, cells};
use crate::domain::returns::{ReturnFrame, ReturnMode};
use std::collections::{BTreeMap, BTreeSet};

/// Attributed returns, pivoted to timestamp -> model_id -> return.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReturns {
    pub models: BTreeSet<String>,
    pub rows: BTreeMap<Timestamp, BTreeMap<String, f64>>,
}

impl ModelReturns {
    pub fn get(&self, timestamp: Timestamp, model_id: &str) -> Option<f64> {
        self.rows.get(&timestamp).and_then(|r| r.get(model_id)).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// `sum(position[symbol] * return[symbol])` for each model row that has a
/// return row at the same timestamp.
///
/// Position rows without a matching return row are excluded. After pivoting,
/// continuous frames drop timestamps at which any model is missing, session
/// frames fill those gaps with zero.
pub fn attribute_returns(frame: &PositionFrame, returns: &ReturnFrame) -> ModelReturns {
    let mut models = BTreeSet::new();
    let mut rows: BTreeMap<Timestamp, BTreeMap<String, f64>> = BTreeMap::new();

    for (model_id, ts, row) in frame.iter() {
        let Some(ret_row) = returns.get(ts) else {
            continue;
        };
        let total: f64 = cells(row)
            .filter_map(|cell| match cell {
                PositionValue::Symbol { symbol, amount } => {
                    ret_row.get(&symbol).map(|ret| amount * ret)
                }
                PositionValue::WeightRef { .. } => None,
            })
            .sum();
        models.insert(model_id.to_string());
        rows.entry(ts).or_default().insert(model_id.to_string(), total);
    }

    match returns.mode {
        ReturnMode::Continuous => {
            rows.retain(|_, by_model| by_model.len() == models.len());
        }
        ReturnMode::Session => {
            for by_model in rows.values_mut() {
                for model_id in &models {
                    by_model.entry(model_id.clone()).or_insert(0.0);
                }
            }
        }
    }

    ModelReturns { models, rows }
}
