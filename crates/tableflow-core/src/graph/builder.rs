//! Dependency graph construction.
//!
//! The graph is an arena of table snapshots addressed by index, with edges
//! stored as `(source, target)` index pairs. An edge means the target's
//! definition references the source by name.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WorkflowError;
use crate::model::{Table, TableId};

use super::extractor;

/// A relation name that matches no table in the workflow.
///
/// Treated as an external source; informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub table_id: TableId,
    pub table_name: String,
    pub reference: String,
}

/// Directed dependency graph over immutable table snapshots.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    tables: Vec<Table>,
    by_id: HashMap<TableId, usize>,
    edges: Vec<(usize, usize)>,
    /// source -> targets, sorted by target name
    dependents: Vec<Vec<usize>>,
    /// target -> sources, sorted by source name
    dependencies: Vec<Vec<usize>>,
    unresolved: Vec<UnresolvedReference>,
}

impl DependencyGraph {
    /// Build the graph for a set of tables.
    pub fn build(tables: &[Table]) -> Result<Self, WorkflowError> {
        let mut by_id = HashMap::with_capacity(tables.len());
        let mut by_name: HashMap<String, usize> = HashMap::with_capacity(tables.len());

        for (idx, table) in tables.iter().enumerate() {
            if by_id.insert(table.id.clone(), idx).is_some() {
                return Err(WorkflowError::DuplicateTableId {
                    id: table.id.clone(),
                });
            }
            if by_name.insert(table.name_key(), idx).is_some() {
                return Err(WorkflowError::DuplicateTableName {
                    name: table.name.clone(),
                });
            }
        }

        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        let mut edges = Vec::new();
        let mut unresolved = Vec::new();

        for (target, table) in tables.iter().enumerate() {
            for name in extractor::references_for(table, names.iter().copied()) {
                if let Some(&source) = by_name.get(&name.to_lowercase()) {
                    edges.push((source, target));
                }
            }

            let own = table.name_key();
            for reference in extractor::relation_names(&table.definition) {
                let key = reference.to_lowercase();
                let last_segment = key.rsplit('.').next().unwrap_or(&key);
                if key == own || by_name.contains_key(&key) || by_name.contains_key(last_segment) {
                    continue;
                }
                debug!(
                    table = %table.name,
                    reference = %reference,
                    "Unresolved reference treated as external source"
                );
                unresolved.push(UnresolvedReference {
                    table_id: table.id.clone(),
                    table_name: table.name.clone(),
                    reference,
                });
            }
        }

        edges.sort_unstable();
        edges.dedup();

        let mut dependents = vec![Vec::new(); tables.len()];
        let mut dependencies = vec![Vec::new(); tables.len()];
        for &(source, target) in &edges {
            dependents[source].push(target);
            dependencies[target].push(source);
        }
        for list in dependents.iter_mut().chain(dependencies.iter_mut()) {
            list.sort_by(|a, b| tables[*a].name.cmp(&tables[*b].name));
        }

        Ok(Self {
            tables: tables.to_vec(),
            by_id,
            edges,
            dependents,
            dependencies,
            unresolved,
        })
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, index: usize) -> &Table {
        &self.tables[index]
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn index_of(&self, id: &TableId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// Edges as `(source, target)` index pairs.
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Tables that read from `index`.
    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    /// Tables that `index` reads from.
    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    pub fn unresolved(&self) -> &[UnresolvedReference] {
        &self.unresolved
    }

    /// Every table reachable downstream of `index`.
    pub fn descendants(&self, index: usize) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut stack = vec![index];
        while let Some(node) = stack.pop() {
            for &next in self.dependents(node) {
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        seen
    }

    /// Indices in ascending name order.
    pub(crate) fn indices_by_name(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.tables.len()).collect();
        indices.sort_by(|a, b| self.tables[*a].name.cmp(&self.tables[*b].name));
        indices
    }
}
