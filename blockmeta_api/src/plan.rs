use std::collections::BTreeMap;

use log::debug;

use crate::{
    config::{self, PartitionLayout, StorageEntry},
    error::{EngineError, ErrorKind},
    graph::DependencyGraph,
    EntryId,
};

/// A validated storage configuration together with its dependency graph and
/// execution order. Building a plan never touches the system.
#[derive(Debug, Clone)]
pub struct StoragePlan {
    entries: BTreeMap<EntryId, StorageEntry>,
    layout: PartitionLayout,
    graph: DependencyGraph,
    order: Vec<EntryId>,
}

impl StoragePlan {
    /// Parses, validates and schedules a configuration document.
    #[track_caller]
    pub fn new(document: &str) -> Result<Self, EngineError> {
        let entries = config::parse(document).map_err(EngineError::new)?;
        Self::from_entries(entries)
    }

    /// Schedules entries that were already validated.
    #[track_caller]
    pub fn from_entries(entries: Vec<StorageEntry>) -> Result<Self, EngineError> {
        Self::build(entries).map_err(EngineError::new)
    }

    fn build(entries: Vec<StorageEntry>) -> Result<Self, ErrorKind> {
        let layout = PartitionLayout::compute(&entries)?;
        let graph = DependencyGraph::build(&entries)?;
        let order = graph.order();
        debug!("Execution order: {}", order.join(", "));

        Ok(Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.id().clone(), entry))
                .collect(),
            layout,
            graph,
            order,
        })
    }

    pub fn entry(&self, id: &str) -> Option<&StorageEntry> {
        self.entries.get(id)
    }

    /// Entries in execution order.
    pub fn ordered_entries(&self) -> impl Iterator<Item = &StorageEntry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn order(&self) -> &[EntryId] {
        &self.order
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Partitions declared on the given parent device, by partition number.
    pub fn partitions_of(&self, device: &str) -> Vec<&config::Partition> {
        let mut partitions = self
            .entries
            .values()
            .filter_map(|entry| match entry {
                StorageEntry::Partition(partition) if partition.device == device => {
                    Some(partition)
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        partitions.sort_by_key(|p| self.layout.get(&p.id).map(|g| g.number));
        partitions
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::{config::ConfigError, graph::GraphError};

    use super::*;

    #[test]
    fn test_plan() {
        let plan = StoragePlan::new(indoc! {r#"
            version: 1
            config:
              - {type: mount, id: root_mount, device: root_fs, path: /}
              - {type: format, id: root_fs, volume: sda2, fstype: ext4}
              - {type: disk, id: sda, path: /dev/sda, ptable: gpt}
              - {type: partition, id: sda2, device: sda, number: 2, size: 1G}
              - {type: partition, id: sda1, device: sda, number: 1, size: 1M, offset: 4G}
        "#})
        .unwrap();

        assert_eq!(plan.len(), 5);
        assert_eq!(
            plan.order(),
            ["sda", "sda2", "root_fs", "root_mount", "sda1"]
        );
        assert_eq!(
            plan.ordered_entries().map(|e| e.id().as_str()).collect::<Vec<_>>(),
            plan.order()
        );
        assert_eq!(
            plan.partitions_of("sda")
                .iter()
                .map(|p| p.id.as_str())
                .collect::<Vec<_>>(),
            ["sda1", "sda2"]
        );
        assert_eq!(plan.layout().get("sda2").unwrap().number, 2);
        assert!(plan.entry("root_fs").is_some());
    }

    #[test]
    fn test_plan_errors() {
        let error = StoragePlan::new(indoc! {r#"
            version: 1
            config:
              - {type: format, id: fs, volume: missing, fstype: ext4}
        "#})
        .unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::InvalidConfig(ConfigError::DanglingReference { .. })
        ));

        let error = StoragePlan::new(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sdb, path: /dev/sdb}
              - {type: raid, id: md0, name: md0, raidlevel: 1, devices: [crypt0, sdb]}
              - {type: dm_crypt, id: crypt0, volume: md0, key: secret}
        "#})
        .unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::Graph(GraphError::Cycle(_))
        ));
    }
}
