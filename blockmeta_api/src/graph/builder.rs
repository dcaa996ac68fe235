//! # Dependency graph builder
//!
//! Builds the dependency graph of a storage configuration:
//! - One node per entry, in document order.
//! - One edge from every entry to each entry named in its reference fields.
//! - One edge from every mount to the closest mount whose path contains its
//!   own path.
//!
//! Edges point from the dependent entry to its dependency. The finished
//! graph is checked for cycles with a depth-first coloring walk.

use std::collections::BTreeMap;

use log::{debug, trace};
use petgraph::visit::{EdgeRef, IntoNodeReferences};

use crate::{config::StorageEntry, EntryId};

use super::{
    error::{CycleError, GraphError},
    DependencyGraph, DependencyPetgraph, EdgeKind, GraphNode, NodeIndex,
};

pub(super) fn build(entries: &[StorageEntry]) -> Result<DependencyGraph, GraphError> {
    debug!("Building dependency graph");
    let (mut graph, index) = populate_graph_nodes(entries)?;

    trace!("Populating reference edges");
    populate_reference_edges(&mut graph, &index, entries)?;

    trace!("Populating mount nesting edges");
    populate_mount_edges(&mut graph, &index, entries);

    // Shadow the graph to make it immutable after it's been fully built.
    let graph = graph;

    trace!("Built dependency graph structure:\n{}", describe_graph(&graph));

    trace!("Checking for cycles");
    if let Some(cycle) = find_cycle(&graph) {
        return Err(CycleError {
            cycle: cycle.into_iter().map(|idx| graph[idx].id.clone()).collect(),
        }
        .into());
    }

    debug!(
        "Dependency graph built successfully with {} nodes and {} edges",
        graph.node_count(),
        graph.edge_count()
    );

    Ok(DependencyGraph { inner: graph, index })
}

/// Adds one node per entry. Node indices follow document order.
fn populate_graph_nodes(
    entries: &[StorageEntry],
) -> Result<(DependencyPetgraph, BTreeMap<EntryId, NodeIndex>), GraphError> {
    let mut graph = DependencyPetgraph::with_capacity(entries.len(), entries.len());
    let mut index: BTreeMap<EntryId, NodeIndex> = BTreeMap::new();

    for entry in entries {
        if index.contains_key(entry.id()) {
            return Err(GraphError::DuplicateId(entry.id().clone()));
        }

        trace!("Adding node: {}", entry.describe());
        let idx = graph.add_node(GraphNode {
            id: entry.id().clone(),
            kind: entry.kind(),
        });
        index.insert(entry.id().clone(), idx);
    }

    Ok((graph, index))
}

fn populate_reference_edges(
    graph: &mut DependencyPetgraph,
    index: &BTreeMap<EntryId, NodeIndex>,
    entries: &[StorageEntry],
) -> Result<(), GraphError> {
    for entry in entries {
        let Some(&source) = index.get(entry.id()) else {
            continue;
        };

        for reference in entry.references() {
            let target = *index.get(reference.target).ok_or_else(|| {
                GraphError::NonExistentReference {
                    id: entry.id().clone(),
                    field: reference.field,
                    target: reference.target.clone(),
                }
            })?;

            if graph.find_edge(source, target).is_some() {
                continue;
            }

            trace!(
                "Adding edge from '{}' to '{}' with kind [{}]",
                entry.id(),
                reference.target,
                reference.field
            );
            graph.add_edge(source, target, EdgeKind::Reference(reference.field));
        }
    }

    Ok(())
}

/// Makes every mount depend on the closest mount above it.
fn populate_mount_edges(
    graph: &mut DependencyPetgraph,
    index: &BTreeMap<EntryId, NodeIndex>,
    entries: &[StorageEntry],
) {
    let mounts = entries
        .iter()
        .filter_map(|entry| match entry {
            StorageEntry::Mount(mount) => mount
                .path
                .as_ref()
                .and_then(|path| Some((*index.get(&mount.id)?, path))),
            _ => None,
        })
        .collect::<Vec<_>>();

    for (source, path) in mounts.iter() {
        let parent = mounts
            .iter()
            .filter(|(_, other)| path.starts_with(other) && path != other)
            .max_by_key(|(_, other)| other.components().count());

        let Some((target, parent_path)) = parent else {
            continue;
        };

        if graph.find_edge(*source, *target).is_some() {
            continue;
        }

        trace!(
            "Adding mount nesting edge from '{}' to '{}'",
            path.display(),
            parent_path.display()
        );
        graph.add_edge(*source, *target, EdgeKind::MountNesting);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

struct Frame {
    node: NodeIndex,
    neighbors: Vec<NodeIndex>,
    next: usize,
}

impl Frame {
    fn new(graph: &DependencyPetgraph, node: NodeIndex) -> Self {
        let mut neighbors = graph.neighbors(node).collect::<Vec<_>>();
        neighbors.sort();
        Self {
            node,
            neighbors,
            next: 0,
        }
    }
}

/// Finds a cycle with an iterative depth-first coloring walk. Returns the
/// nodes on the cycle in dependency order, starting with the first node of
/// the cycle that was reached.
fn find_cycle(graph: &DependencyPetgraph) -> Option<Vec<NodeIndex>> {
    let mut color = vec![Color::White; graph.node_count()];

    for start in graph.node_indices() {
        if color[start.index()] != Color::White {
            continue;
        }

        color[start.index()] = Color::Gray;
        let mut stack = vec![Frame::new(graph, start)];

        while let Some(frame) = stack.last_mut() {
            let node = frame.node;
            let next = frame.neighbors.get(frame.next).copied();
            frame.next += 1;

            let Some(next) = next else {
                color[node.index()] = Color::Black;
                stack.pop();
                continue;
            };

            match color[next.index()] {
                Color::White => {
                    color[next.index()] = Color::Gray;
                    stack.push(Frame::new(graph, next));
                }
                Color::Gray => {
                    let begin = stack
                        .iter()
                        .position(|frame| frame.node == next)
                        .unwrap_or_default();
                    return Some(stack[begin..].iter().map(|frame| frame.node).collect());
                }
                Color::Black => {}
            }
        }
    }

    None
}

/// Returns a user-friendly description of the graph structure.
pub(super) fn describe_graph(graph: &DependencyPetgraph) -> String {
    let mut buf: Vec<String> = Vec::new();
    for (node_idx, node) in graph.node_references() {
        buf.push(format!("[{}] {} '{}'", node_idx.index(), node.kind, node.id));
        for edge in graph.edges(node_idx) {
            let target = &graph[edge.target()];
            buf.push(format!(
                "  -> [{}] {} '{}' ({})",
                edge.target().index(),
                target.kind,
                target.id,
                edge.weight()
            ));
        }
    }

    buf.join("\n")
}
