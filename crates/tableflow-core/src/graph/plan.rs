//! Validated, scheduled view of a workflow's tables.

use serde::Serialize;

use crate::error::WorkflowError;
use crate::model::{Table, TableId};

use super::builder::{DependencyGraph, UnresolvedReference};
use super::{scheduler, validator};

/// A dependency graph that is known to be acyclic, with its execution
/// order and parallel levels precomputed.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    graph: DependencyGraph,
    order: Vec<usize>,
    levels: Vec<Vec<usize>>,
}

impl ExecutionPlan {
    pub fn build(tables: &[Table]) -> Result<Self, WorkflowError> {
        let graph = DependencyGraph::build(tables)?;
        validator::validate(&graph)?;
        let order = scheduler::schedule(&graph)?;
        let levels = scheduler::levels(&graph, &order);
        Ok(Self {
            graph,
            order,
            levels,
        })
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn table(&self, index: usize) -> &Table {
        self.graph.table(index)
    }

    /// Execution order as graph indices.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn order_ids(&self) -> Vec<TableId> {
        self.order
            .iter()
            .map(|idx| self.graph.table(*idx).id.clone())
            .collect()
    }

    pub fn order_names(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|idx| self.graph.table(*idx).name.as_str())
            .collect()
    }

    pub fn levels(&self) -> &[Vec<usize>] {
        &self.levels
    }

    /// Edges as `(source, target)` table id pairs.
    pub fn edges(&self) -> Vec<(TableId, TableId)> {
        self.graph
            .edges()
            .iter()
            .map(|&(s, t)| {
                (
                    self.graph.table(s).id.clone(),
                    self.graph.table(t).id.clone(),
                )
            })
            .collect()
    }

    pub fn unresolved(&self) -> &[UnresolvedReference] {
        self.graph.unresolved()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let name = |idx: &usize| self.graph.table(*idx).name.clone();
        GraphSnapshot {
            order: self.order.iter().map(name).collect(),
            levels: self
                .levels
                .iter()
                .map(|level| level.iter().map(name).collect())
                .collect(),
            edges: self
                .graph
                .edges()
                .iter()
                .map(|(s, t)| EdgeSnapshot {
                    source: name(s),
                    target: name(t),
                })
                .collect(),
            unresolved: self.graph.unresolved().to_vec(),
        }
    }
}

/// Serializable summary of a plan, keyed by table name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    pub order: Vec<String>,
    pub levels: Vec<Vec<String>>,
    pub edges: Vec<EdgeSnapshot>,
    pub unresolved: Vec<UnresolvedReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeSnapshot {
    pub source: String,
    pub target: String,
}
