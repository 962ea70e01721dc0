//! Topological scheduling (Kahn's algorithm with name-ordered ties).

use std::collections::BTreeSet;

use crate::error::WorkflowError;

use super::builder::DependencyGraph;
use super::validator;

/// Total execution order as table indices.
///
/// Among tables whose dependencies are all scheduled, the one with the
/// smallest name goes first. Fails with the offending cycle when the graph
/// is not a DAG.
pub fn schedule(graph: &DependencyGraph) -> Result<Vec<usize>, WorkflowError> {
    let mut in_degree: Vec<usize> = (0..graph.len())
        .map(|idx| graph.dependencies(idx).len())
        .collect();

    let mut ready: BTreeSet<(&str, usize)> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(idx, _)| (graph.table(idx).name.as_str(), idx))
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(entry) = ready.pop_first() {
        let (_, idx) = entry;
        order.push(idx);
        for &next in graph.dependents(idx) {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert((graph.table(next).name.as_str(), next));
            }
        }
    }

    if order.len() != graph.len() {
        validator::validate(graph)?;
        // Unreachable for a well-formed graph; report every unscheduled table.
        let cycle = (0..graph.len())
            .filter(|idx| in_degree[*idx] > 0)
            .map(|idx| graph.table(idx).name.clone())
            .collect();
        return Err(WorkflowError::CyclicDependency { cycle });
    }

    Ok(order)
}

/// Group an order into levels: every table sits one level below its
/// deepest dependency. Tables within a level are independent.
pub fn levels(graph: &DependencyGraph, order: &[usize]) -> Vec<Vec<usize>> {
    let mut depth = vec![0usize; graph.len()];
    let mut levels: Vec<Vec<usize>> = Vec::new();

    for &idx in order {
        let level = graph
            .dependencies(idx)
            .iter()
            .map(|dep| depth[*dep] + 1)
            .max()
            .unwrap_or(0);
        depth[idx] = level;
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(idx);
    }

    levels
}
