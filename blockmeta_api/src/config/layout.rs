//! Partition geometry.
//!
//! Every declared partition gets a number, a role and a start sector at
//! validation time, so that invalid layouts are rejected before any device
//! is touched and handlers never have to guess.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        FIRST_LOGICAL_PARTITION_NUMBER, FIRST_PARTITION_SECTOR, GPT_MAX_PARTITIONS,
        MSDOS_MAX_PRIMARY_PARTITIONS, PARTITION_ALIGNMENT_SECTORS, SECTOR_SIZE,
    },
    EntryId,
};

use super::{ConfigError, Partition, PartitionFlag, PartitionTableType, StorageEntry};

/// Role of a partition in its partition table.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionRole {
    Primary,
    Extended,
    Logical,
}

impl PartitionRole {
    fn of(partition: &Partition) -> Self {
        match partition.flag {
            Some(PartitionFlag::Extended) => Self::Extended,
            Some(PartitionFlag::Logical) => Self::Logical,
            _ => Self::Primary,
        }
    }
}

/// Computed placement of a single partition, in 512-byte sectors.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionGeometry {
    pub number: u32,

    pub role: PartitionRole,

    pub start_sector: u64,

    /// Length of the partition. `None` when the partition grows to the end
    /// of the free space.
    pub size_sectors: Option<u64>,
}

impl PartitionGeometry {
    /// Last sector of the partition, inclusive.
    pub fn end_sector(&self) -> Option<u64> {
        self.size_sectors.map(|size| self.start_sector + size - 1)
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size_sectors.map(|size| size * SECTOR_SIZE)
    }

    pub fn start_bytes(&self) -> u64 {
        self.start_sector * SECTOR_SIZE
    }
}

/// Geometries of every partition in a configuration, keyed by entry id.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionLayout {
    geometries: BTreeMap<EntryId, PartitionGeometry>,
}

fn align_up(sector: u64) -> u64 {
    (sector + PARTITION_ALIGNMENT_SECTORS - 1) / PARTITION_ALIGNMENT_SECTORS
        * PARTITION_ALIGNMENT_SECTORS
}

/// Extended partition of an msdos table.
struct ExtendedSlot {
    id: EntryId,
    start: u64,
    /// First sector after the extended partition, if it does not grow.
    end: Option<u64>,
}

/// Tracks allocation state while walking the partitions of one device.
struct DeviceCursor {
    ptable: Option<PartitionTableType>,
    next_free: u64,
    next_primary: u32,
    next_logical: u32,
    used_numbers: BTreeSet<u32>,
    grown: Option<EntryId>,
    extended: Option<ExtendedSlot>,
    logical_next_free: u64,
    logical_grown: Option<EntryId>,
}

impl DeviceCursor {
    fn new(ptable: Option<PartitionTableType>) -> Self {
        Self {
            ptable,
            next_free: FIRST_PARTITION_SECTOR,
            next_primary: 1,
            next_logical: FIRST_LOGICAL_PARTITION_NUMBER,
            used_numbers: BTreeSet::new(),
            grown: None,
            extended: None,
            logical_next_free: 0,
            logical_grown: None,
        }
    }

    fn place(&mut self, partition: &Partition) -> Result<PartitionGeometry, String> {
        let role = PartitionRole::of(partition);
        let size = partition.size.map(|s| s.bytes() / SECTOR_SIZE);
        let offset = partition.offset.map(|o| o.bytes() / SECTOR_SIZE);

        match role {
            PartitionRole::Primary | PartitionRole::Extended => {
                if let Some(grown) = &self.grown {
                    return Err(format!("follows partition '{grown}' which uses all remaining space"));
                }

                let number = partition.number.unwrap_or(self.next_primary);
                let max = match self.ptable {
                    Some(PartitionTableType::Msdos) => MSDOS_MAX_PRIMARY_PARTITIONS,
                    _ => GPT_MAX_PARTITIONS,
                };
                if number > max {
                    return Err(format!(
                        "partition number {number} exceeds the maximum of {max}"
                    ));
                }
                self.claim_number(number)?;
                self.next_primary = self.next_primary.max(number + 1);

                let start = match offset {
                    Some(offset) if offset < self.next_free => {
                        return Err(format!(
                            "offset at sector {offset} overlaps space used up to sector {}",
                            self.next_free
                        ))
                    }
                    Some(offset) => offset,
                    None => align_up(self.next_free),
                };

                match size {
                    Some(size) => self.next_free = start + size,
                    None => self.grown = Some(partition.id.clone()),
                }

                if role == PartitionRole::Extended {
                    if let Some(extended) = &self.extended {
                        return Err(format!(
                            "'{}' is already the extended partition",
                            extended.id
                        ));
                    }
                    self.extended = Some(ExtendedSlot {
                        id: partition.id.clone(),
                        start,
                        end: size.map(|size| start + size),
                    });
                    self.logical_next_free = start + PARTITION_ALIGNMENT_SECTORS;
                }

                Ok(PartitionGeometry {
                    number,
                    role,
                    start_sector: start,
                    size_sectors: size,
                })
            }
            PartitionRole::Logical => {
                let Some(extended) = &self.extended else {
                    return Err("logical partitions require a preceding extended partition".into());
                };
                let extended_end = extended.end;
                if let Some(grown) = &self.logical_grown {
                    return Err(format!("follows partition '{grown}' which uses all remaining space"));
                }

                let number = partition.number.unwrap_or(self.next_logical);
                if number < FIRST_LOGICAL_PARTITION_NUMBER {
                    return Err(format!(
                        "logical partitions are numbered from {FIRST_LOGICAL_PARTITION_NUMBER}, got {number}"
                    ));
                }
                self.claim_number(number)?;
                self.next_logical = self.next_logical.max(number + 1);

                let start = match offset {
                    Some(offset) if offset < self.logical_next_free => {
                        return Err(format!(
                            "offset at sector {offset} overlaps space used up to sector {}",
                            self.logical_next_free
                        ))
                    }
                    Some(offset) => offset,
                    None => self.logical_next_free,
                };

                let size = match (size, extended_end) {
                    (Some(size), Some(end)) if start + size > end => {
                        return Err("does not fit inside the extended partition".into())
                    }
                    (None, Some(end)) if start >= end => {
                        return Err("does not fit inside the extended partition".into())
                    }
                    (None, Some(end)) => Some(end - start),
                    (size, _) => size,
                };

                match partition.size {
                    Some(_) => {
                        // Leave room for the next extended boot record.
                        self.logical_next_free = size.map_or(start, |size| align_up(start + size + 1));
                    }
                    None => self.logical_grown = Some(partition.id.clone()),
                }

                Ok(PartitionGeometry {
                    number,
                    role,
                    start_sector: start,
                    size_sectors: size,
                })
            }
        }
    }

    fn claim_number(&mut self, number: u32) -> Result<(), String> {
        if number == 0 {
            return Err("partition numbers start at 1".into());
        }
        if !self.used_numbers.insert(number) {
            return Err(format!("partition number {number} is used more than once"));
        }
        Ok(())
    }
}

impl PartitionLayout {
    /// Computes the geometry of every partition in `entries`. Partitions are
    /// placed in document order on their parent device.
    pub fn compute(entries: &[StorageEntry]) -> Result<Self, ConfigError> {
        let ptables: BTreeMap<&EntryId, Option<PartitionTableType>> = entries
            .iter()
            .map(|entry| (entry.id(), entry.ptable()))
            .collect();

        let mut cursors: BTreeMap<&EntryId, DeviceCursor> = BTreeMap::new();
        let mut geometries = BTreeMap::new();

        for entry in entries {
            let StorageEntry::Partition(partition) = entry else {
                continue;
            };

            let cursor = cursors.entry(&partition.device).or_insert_with(|| {
                DeviceCursor::new(ptables.get(&partition.device).copied().flatten())
            });

            let geometry = cursor
                .place(partition)
                .map_err(|reason| ConfigError::InvalidLayout {
                    id: partition.id.clone(),
                    device: partition.device.clone(),
                    reason,
                })?;
            geometries.insert(partition.id.clone(), geometry);
        }

        Ok(Self { geometries })
    }

    pub fn get(&self, id: &str) -> Option<&PartitionGeometry> {
        self.geometries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntryId, &PartitionGeometry)> {
        self.geometries.iter()
    }

    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::super::{parse, StorageConfig};
    use super::*;

    fn layout(document: &str) -> PartitionLayout {
        PartitionLayout::compute(&parse(document).unwrap()).unwrap()
    }

    fn layout_err(document: &str) -> String {
        let config = StorageConfig::from_yaml_str(document).unwrap();
        match PartitionLayout::compute(&config.config).unwrap_err() {
            ConfigError::InvalidLayout { reason, .. } => reason,
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_single_partition() {
        let layout = layout(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: gpt}
              - {type: partition, id: sda-part1, device: sda, size: 3G}
        "#});

        let geometry = layout.get("sda-part1").unwrap();
        assert_eq!(geometry.number, 1);
        assert_eq!(geometry.role, PartitionRole::Primary);
        assert_eq!(geometry.start_sector, 2048);
        assert_eq!(geometry.end_sector(), Some(6293503));
        assert_eq!(geometry.size_bytes(), Some(3 << 30));
        assert_eq!(geometry.start_bytes(), 1 << 20);
    }

    #[test]
    fn test_sequential_partitions() {
        let layout = layout(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: gpt}
              - {type: disk, id: sdb, path: /dev/sdb, ptable: gpt}
              - {type: partition, id: sda1, device: sda, size: 1G}
              - {type: partition, id: sdb1, device: sdb, size: 1M}
              - {type: partition, id: sda2, device: sda, size: 512B}
              - {type: partition, id: sda3, device: sda, grow: true}
        "#});

        assert_eq!(layout.len(), 4);
        let sda2 = layout.get("sda2").unwrap();
        assert_eq!((sda2.number, sda2.start_sector), (2, 2099200));
        assert_eq!(sda2.size_sectors, Some(1));

        // The next partition starts at the following 1 MiB boundary.
        let sda3 = layout.get("sda3").unwrap();
        assert_eq!((sda3.number, sda3.start_sector), (3, 2101248));
        assert_eq!(sda3.size_sectors, None);
        assert_eq!(sda3.end_sector(), None);

        let sdb1 = layout.get("sdb1").unwrap();
        assert_eq!((sdb1.number, sdb1.start_sector), (1, 2048));
    }

    #[test]
    fn test_explicit_number_and_offset() {
        let layout = layout(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: gpt}
              - {type: partition, id: p3, device: sda, number: 3, size: 1M, offset: 4M}
              - {type: partition, id: p4, device: sda, size: 1M}
        "#});

        let p3 = layout.get("p3").unwrap();
        assert_eq!((p3.number, p3.start_sector), (3, 8192));
        let p4 = layout.get("p4").unwrap();
        assert_eq!((p4.number, p4.start_sector), (4, 10240));
    }

    #[test]
    fn test_msdos_logical_partitions() {
        let layout = layout(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: msdos}
              - {type: partition, id: boot, device: sda, size: 1G, flag: boot}
              - {type: partition, id: ext, device: sda, size: 8G, flag: extended}
              - {type: partition, id: l1, device: sda, size: 2G, flag: logical}
              - {type: partition, id: l2, device: sda, grow: true, flag: logical}
        "#});

        let ext = layout.get("ext").unwrap();
        assert_eq!(ext.role, PartitionRole::Extended);
        assert_eq!((ext.number, ext.start_sector), (2, 2099200));

        let l1 = layout.get("l1").unwrap();
        assert_eq!((l1.number, l1.start_sector), (5, 2101248));

        let l2 = layout.get("l2").unwrap();
        assert_eq!(l2.number, 6);
        assert_eq!(l2.start_sector, 2101248 + 4194304 + 2048);
        // Grows to the end of the extended partition.
        assert_eq!(
            l2.end_sector(),
            Some(ext.end_sector().unwrap())
        );
    }

    #[test]
    fn test_invalid_layouts() {
        let reason = layout_err(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: gpt}
              - {type: partition, id: p1, device: sda, grow: true}
              - {type: partition, id: p2, device: sda, size: 1G}
        "#});
        assert!(reason.contains("'p1'"), "{reason}");

        let reason = layout_err(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: gpt}
              - {type: partition, id: p1, device: sda, size: 1G}
              - {type: partition, id: p2, device: sda, size: 1G, offset: 512M}
        "#});
        assert!(reason.contains("overlaps"), "{reason}");

        let reason = layout_err(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: gpt}
              - {type: partition, id: p1, device: sda, number: 1, size: 1G}
              - {type: partition, id: p2, device: sda, number: 1, size: 1G}
        "#});
        assert!(reason.contains("more than once"), "{reason}");

        let reason = layout_err(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: msdos}
              - {type: partition, id: p1, device: sda, number: 5, size: 1G}
        "#});
        assert!(reason.contains("maximum of 4"), "{reason}");

        let reason = layout_err(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: msdos}
              - {type: partition, id: l1, device: sda, size: 1G, flag: logical}
        "#});
        assert!(reason.contains("extended"), "{reason}");

        let reason = layout_err(indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: msdos}
              - {type: partition, id: ext, device: sda, size: 1G, flag: extended}
              - {type: partition, id: l1, device: sda, size: 2G, flag: logical}
        "#});
        assert!(reason.contains("does not fit"), "{reason}");
    }
}
