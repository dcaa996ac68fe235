use std::{cmp::Reverse, collections::BinaryHeap};

use log::trace;
use petgraph::Direction;

use crate::EntryId;

use super::DependencyPetgraph;

/// Orders the nodes of an acyclic graph so that every entry comes after all
/// of its dependencies. Among entries that are ready at the same time, the
/// one declared first in the document goes first.
pub(super) fn order(graph: &DependencyPetgraph) -> Vec<EntryId> {
    // Number of dependencies of each node that have not been scheduled yet.
    let mut pending = graph
        .node_indices()
        .map(|idx| graph.neighbors_directed(idx, Direction::Outgoing).count())
        .collect::<Vec<_>>();

    let mut ready = graph
        .node_indices()
        .filter(|idx| pending[idx.index()] == 0)
        .map(Reverse)
        .collect::<BinaryHeap<_>>();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse(idx)) = ready.pop() {
        trace!("Scheduling '{}'", graph[idx].id);
        order.push(graph[idx].id.clone());

        for dependent in graph.neighbors_directed(idx, Direction::Incoming) {
            pending[dependent.index()] -= 1;
            if pending[dependent.index()] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    debug_assert_eq!(
        order.len(),
        graph.node_count(),
        "dependency graph contains a cycle"
    );

    order
}
