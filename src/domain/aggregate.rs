//! Fund-of-funds weight resolution and synthetic portfolio models.

use crate::domain::Timestamp;
use crate::domain::error::AnalyzerError;
use crate::domain::position::{Column, PositionFrame, PositionValue, Row, cells};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Flattens weight references into symbol exposures.
///
/// For each `Weight(target)` cell of a model row, `weight * target's symbol
/// positions` at the same timestamp is added to the row's symbol columns.
/// Timestamps where the target has no row contribute nothing. Weight columns
/// are left untouched.
///
/// `depth` bounds how many levels are composed: `1` reads only the targets'
/// own positions. Deeper resolution requires an acyclic reference graph.
pub fn resolve_weights(frame: &PositionFrame, depth: usize) -> Result<PositionFrame, AnalyzerError> {
    if depth == 0 {
        return Ok(frame.clone());
    }
    if depth > 1 {
        check_acyclic(frame)?;
    }

    let symbols: Vec<Column> = frame
        .columns()
        .iter()
        .filter(|c| c.is_symbol())
        .cloned()
        .collect();
    let weights: Vec<Column> = frame
        .columns()
        .iter()
        .filter(|c| !c.is_symbol())
        .cloned()
        .collect();

    let base: HashMap<(&str, Timestamp), Vec<f64>> = frame
        .iter()
        .map(|(model_id, ts, row)| ((model_id, ts), exposure(row, &symbols)))
        .collect();

    let mut level = base.clone();
    for _ in 0..depth {
        let mut next = HashMap::with_capacity(base.len());
        for (model_id, ts, row) in frame.iter() {
            let mut exposures = base[&(model_id, ts)].clone();
            for column in &weights {
                let weight = row.get(column).copied().unwrap_or(0.0);
                if weight == 0.0 {
                    continue;
                }
                if let Some(target) = level.get(&(column.key(), ts)) {
                    for (acc, v) in exposures.iter_mut().zip(target) {
                        *acc += weight * v;
                    }
                }
            }
            next.insert((model_id, ts), exposures);
        }
        level = next;
    }

    let mut out = PositionFrame::new();
    for (model_id, ts, row) in frame.iter() {
        let mut resolved = row.clone();
        for (column, value) in symbols.iter().zip(&level[&(model_id, ts)]) {
            resolved.insert(column.clone(), *value);
        }
        out.insert_row(model_id, ts, resolved);
    }
    debug!(depth, weight_columns = weights.len(), "resolved weight references");
    Ok(out)
}

fn exposure(row: &Row, symbols: &[Column]) -> Vec<f64> {
    symbols
        .iter()
        .map(|c| row.get(c).copied().unwrap_or(0.0))
        .collect()
}

/// Edges `model -> target` for every nonzero weight pointing at a model in the frame.
pub fn weight_graph(frame: &PositionFrame) -> BTreeMap<String, BTreeSet<String>> {
    let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (model_id, _, row) in frame.iter() {
        for cell in cells(row) {
            if let PositionValue::WeightRef { target, weight } = cell {
                if weight != 0.0 && frame.model_rows(&target).is_some() {
                    graph.entry(model_id.to_string()).or_default().insert(target);
                }
            }
        }
    }
    graph
}

fn check_acyclic(frame: &PositionFrame) -> Result<(), AnalyzerError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        node: &str,
        graph: &BTreeMap<String, BTreeSet<String>>,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Result<(), AnalyzerError> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|m| m == node).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(node.to_string());
                return Err(AnalyzerError::WeightCycle { path: cycle });
            }
            None => {}
        }
        marks.insert(node.to_string(), Mark::Visiting);
        path.push(node.to_string());
        if let Some(targets) = graph.get(node) {
            for target in targets {
                visit(target, graph, marks, path)?;
            }
        }
        path.pop();
        marks.insert(node.to_string(), Mark::Done);
        Ok(())
    }

    let graph = weight_graph(frame);
    let mut marks = HashMap::new();
    for node in graph.keys() {
        visit(node, &graph, &mut marks, &mut Vec::new())?;
    }
    Ok(())
}

/// Adds a synthetic model whose symbol positions are, at every timestamp, the
/// mean over all models reporting at that timestamp. Its weight cells are zero.
pub fn with_equal_weighted(frame: &PositionFrame, model_id: &str) -> PositionFrame {
    let mut sums: BTreeMap<Timestamp, (Row, usize)> = BTreeMap::new();
    for (source_id, ts, row) in frame.iter() {
        if source_id == model_id {
            continue;
        }
        let (acc, count) = sums.entry(ts).or_insert_with(|| (Row::new(), 0));
        for (column, value) in row {
            let cell = acc.entry(column.clone()).or_insert(0.0);
            if column.is_symbol() {
                *cell += value;
            }
        }
        *count += 1;
    }

    let rows: BTreeMap<Timestamp, Row> = sums
        .into_iter()
        .map(|(ts, (acc, count))| {
            let row = acc
                .into_iter()
                .map(|(column, sum)| {
                    let mean = if column.is_symbol() { sum / count as f64 } else { 0.0 };
                    (column, mean)
                })
                .collect();
            (ts, row)
        })
        .collect();

    let mut out = frame.clone();
    out.retain_models(|id, _| id != model_id);
    for (ts, row) in rows {
        out.insert_row(model_id, ts, row);
    }
    out
}
