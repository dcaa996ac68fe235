//! Dependency graph of a storage configuration.
//!
//! Nodes are entries, edges go from an entry to each entry it depends on.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use petgraph::{
    csr::DefaultIx,
    graph::NodeIndex as PetgraphNodeIndex,
    visit::{Dfs, EdgeRef, Walker},
    Directed, Direction, Graph,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::{EntryKind, ReferenceField, StorageEntry},
    EntryId,
};

mod builder;
mod error;
mod schedule;

pub use error::{CycleError, GraphError};

/// The type of the node index used in the dependency graph.
pub(crate) type NodeIndex = PetgraphNodeIndex<DefaultIx>;

/// The type of the graph used to store entries and their dependencies.
pub(crate) type DependencyPetgraph = Graph<GraphNode, EdgeKind, Directed, DefaultIx>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: EntryId,
    pub kind: EntryKind,
}

/// Why one entry depends on another.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    /// The dependent names the dependency in one of its reference fields.
    Reference(ReferenceField),

    /// The dependent is a mount below the dependency's mount point.
    MountNesting,
}

impl Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference(field) => write!(f, "{field}"),
            Self::MountNesting => f.write_str("mount nesting"),
        }
    }
}

/// An acyclic dependency graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    inner: DependencyPetgraph,
    index: BTreeMap<EntryId, NodeIndex>,
}

impl DependencyGraph {
    /// Builds the graph for `entries`, failing if any reference is dangling
    /// or if the dependencies form a cycle.
    pub fn build(entries: &[StorageEntry]) -> Result<Self, GraphError> {
        builder::build(entries)
    }

    pub fn len(&self) -> usize {
        self.inner.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|idx| &self.inner[*idx])
    }

    /// Nodes in document order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.inner.node_weights()
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&EntryId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };

        let mut neighbors = self
            .inner
            .neighbors_directed(idx, direction)
            .collect::<Vec<_>>();
        neighbors.sort();
        neighbors
            .into_iter()
            .map(|idx| &self.inner[idx].id)
            .collect()
    }

    /// Entries that `id` depends on directly, in document order.
    pub fn dependencies(&self, id: &str) -> Vec<&EntryId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Entries that depend directly on `id`, in document order.
    pub fn dependents(&self, id: &str) -> Vec<&EntryId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Every entry that `id` depends on, directly or not.
    pub fn transitive_dependencies(&self, id: &str) -> BTreeSet<&EntryId> {
        let Some(&start) = self.index.get(id) else {
            return BTreeSet::new();
        };

        Dfs::new(&self.inner, start)
            .iter(&self.inner)
            .filter(|idx| *idx != start)
            .map(|idx| &self.inner[idx].id)
            .collect()
    }

    /// All edges as `(dependent, dependency, kind)`.
    pub fn edges(&self) -> Vec<(&EntryId, &EntryId, EdgeKind)> {
        self.inner
            .edge_references()
            .map(|edge| {
                (
                    &self.inner[edge.source()].id,
                    &self.inner[edge.target()].id,
                    *edge.weight(),
                )
            })
            .collect()
    }

    /// Execution order of the entries: every entry comes after all of its
    /// dependencies, ties are broken by document order.
    pub fn order(&self) -> Vec<EntryId> {
        schedule::order(&self.inner)
    }

    /// Multi-line description of the graph, for logs.
    pub fn describe(&self) -> String {
        builder::describe_graph(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::config::{parse, StorageConfig};

    use super::*;

    fn graph(document: &str) -> DependencyGraph {
        DependencyGraph::build(&parse(document).unwrap()).unwrap()
    }

    fn unvalidated(document: &str) -> Vec<StorageEntry> {
        StorageConfig::from_yaml_str(document).unwrap().config
    }

    #[test]
    fn test_build_edges() {
        let graph = graph(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: gpt}
              - {type: partition, id: sda-part1, device: sda, size: 3G}
              - {type: format, id: sda-part1_format, volume: sda-part1, fstype: ext4}
              - {type: mount, id: sda-part1_mount, device: sda-part1_format, path: /}
        "#});

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.edges().len(), 3);
        assert_eq!(graph.dependencies("sda-part1"), ["sda"]);
        assert_eq!(graph.dependents("sda"), ["sda-part1"]);
        assert!(graph.dependencies("sda").is_empty());
        assert_eq!(
            graph
                .transitive_dependencies("sda-part1_mount")
                .into_iter()
                .map(String::as_str)
                .collect::<Vec<_>>(),
            ["sda", "sda-part1", "sda-part1_format"]
        );
        assert_eq!(graph.node("sda").unwrap().kind, EntryKind::Disk);
        assert!(graph.contains("sda-part1_mount"));
        assert!(!graph.contains("sdb"));
        assert!(graph.describe().contains("-> [0] disk 'sda' (device)"));
    }

    #[test]
    fn test_order_follows_dependencies() {
        // Mount and format come before the partition they depend on in the
        // document.
        let graph = graph(indoc! {r#"
            version: 1
            config:
              - {type: mount, id: root_mount, device: root_fs, path: /}
              - {type: format, id: root_fs, volume: sda1, fstype: ext4}
              - {type: disk, id: sda, path: /dev/sda, ptable: gpt}
              - {type: partition, id: sda1, device: sda, size: 1G}
        "#});

        assert_eq!(graph.order(), ["sda", "sda1", "root_fs", "root_mount"]);
    }

    #[test]
    fn test_order_tie_break_is_document_order() {
        let graph = graph(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sdc, path: /dev/sdc}
              - {type: disk, id: sda, path: /dev/sda}
              - {type: disk, id: sdb, path: /dev/sdb}
              - {type: raid, id: md0, name: md0, raidlevel: 1, devices: [sdb, sda]}
              - {type: format, id: fs_c, volume: sdc, fstype: xfs}
        "#});

        let order = graph.order();
        assert_eq!(order, ["sdc", "sda", "sdb", "md0", "fs_c"]);
        // Identical input, identical order.
        assert_eq!(order, graph.order());
    }

    #[test]
    fn test_mount_nesting() {
        let graph = graph(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: gpt}
              - {type: partition, id: sda1, device: sda, size: 1G}
              - {type: partition, id: sda2, device: sda, size: 1G}
              - {type: partition, id: sda3, device: sda, grow: true}
              - {type: format, id: efi_fs, volume: sda1, fstype: vfat}
              - {type: format, id: boot_fs, volume: sda2, fstype: ext4}
              - {type: format, id: root_fs, volume: sda3, fstype: ext4}
              - {type: mount, id: efi_mount, device: efi_fs, path: /boot/efi}
              - {type: mount, id: boot_mount, device: boot_fs, path: /boot}
              - {type: mount, id: root_mount, device: root_fs, path: /}
        "#});

        assert_eq!(graph.dependencies("efi_mount"), ["efi_fs", "boot_mount"]);
        assert_eq!(graph.dependencies("boot_mount"), ["boot_fs", "root_mount"]);
        assert_eq!(graph.dependencies("root_mount"), ["root_fs"]);
        assert!(graph
            .edges()
            .contains(&(&"efi_mount".to_string(), &"boot_mount".to_string(), EdgeKind::MountNesting)));

        let order = graph.order();
        let position = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(position("root_mount") < position("boot_mount"));
        assert!(position("boot_mount") < position("efi_mount"));
    }

    #[test]
    fn test_cycle() {
        let entries = unvalidated(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sdb, path: /dev/sdb}
              - {type: raid, id: md0, name: md0, raidlevel: 1, devices: [crypt0, sdb]}
              - {type: dm_crypt, id: crypt0, volume: md0, key: secret}
        "#});

        let err = DependencyGraph::build(&entries).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle(CycleError {
                cycle: vec!["md0".into(), "crypt0".into()]
            })
        );
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected: md0 -> crypt0 -> md0"
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let entries = unvalidated(indoc! {r#"
            version: 1
            config:
              - {type: dm_crypt, id: crypt0, volume: crypt0, key: secret}
        "#});

        assert_eq!(
            DependencyGraph::build(&entries).unwrap_err(),
            GraphError::Cycle(CycleError {
                cycle: vec!["crypt0".into()]
            })
        );
    }

    #[test]
    fn test_build_errors() {
        let entries = unvalidated(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda}
              - {type: format, id: fs, volume: sdb, fstype: ext4}
        "#});
        assert_eq!(
            DependencyGraph::build(&entries).unwrap_err(),
            GraphError::NonExistentReference {
                id: "fs".into(),
                field: ReferenceField::Volume,
                target: "sdb".into(),
            }
        );

        let entries = unvalidated(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda}
              - {type: disk, id: sda, path: /dev/sdb}
        "#});
        assert_eq!(
            DependencyGraph::build(&entries).unwrap_err(),
            GraphError::DuplicateId("sda".into())
        );
    }
}
