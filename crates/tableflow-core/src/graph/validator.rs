//! Cycle detection over the dependency graph.

use crate::error::WorkflowError;

use super::builder::DependencyGraph;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// Find one cycle, if any, as table names in edge order.
///
/// Roots and children are visited in name order and the reported cycle is
/// rotated to start at its smallest name, so the result is stable for a
/// given set of tables.
pub fn find_cycle(graph: &DependencyGraph) -> Option<Vec<String>> {
    let mut marks = vec![Mark::White; graph.len()];

    for root in graph.indices_by_name() {
        if marks[root] != Mark::White {
            continue;
        }

        // (node, next child position)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::Gray;

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let children = graph.dependents(node);
            if frame.1 >= children.len() {
                marks[node] = Mark::Black;
                stack.pop();
                continue;
            }

            let child = children[frame.1];
            frame.1 += 1;

            match marks[child] {
                Mark::White => {
                    marks[child] = Mark::Gray;
                    stack.push((child, 0));
                }
                Mark::Gray => {
                    let from = stack
                        .iter()
                        .position(|&(n, _)| n == child)
                        .unwrap_or_default();
                    let cycle: Vec<usize> = stack[from..].iter().map(|&(n, _)| n).collect();
                    return Some(rotate_to_smallest(graph, cycle));
                }
                Mark::Black => {}
            }
        }
    }

    None
}

fn rotate_to_smallest(graph: &DependencyGraph, mut cycle: Vec<usize>) -> Vec<String> {
    let pivot = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| graph.table(*a.1).name.cmp(&graph.table(*b.1).name))
        .map(|(i, _)| i)
        .unwrap_or_default();
    cycle.rotate_left(pivot);
    cycle
        .into_iter()
        .map(|idx| graph.table(idx).name.clone())
        .collect()
}

/// Reject graphs containing a cycle.
pub fn validate(graph: &DependencyGraph) -> Result<(), WorkflowError> {
    match find_cycle(graph) {
        Some(cycle) => Err(WorkflowError::CyclicDependency { cycle }),
        None => Ok(()),
    }
}
