use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A block device as seen by lsblk.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProbedDevice {
    pub path: PathBuf,

    /// lsblk device type: disk, part, raid1, lvm, crypt, ...
    pub device_type: String,

    /// Size in bytes.
    pub size: u64,

    pub serial: Option<String>,

    /// Partition table type, `gpt` or `dos`.
    pub ptable: Option<String>,

    /// Devices this device is built on.
    pub parents: Vec<PathBuf>,

    pub partition_number: Option<u32>,

    pub start_sector: Option<u64>,

    /// Filesystem or container signature, e.g. `ext4`, `linux_raid_member`.
    pub fstype: Option<String>,

    pub fs_uuid: Option<String>,

    pub label: Option<String>,
}

impl ProbedDevice {
    pub fn is_partition(&self) -> bool {
        self.device_type == "part"
    }

    pub fn is_raid(&self) -> bool {
        self.device_type.starts_with("raid")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProbedRaid {
    pub path: PathBuf,
    pub name: Option<String>,
    /// mdadm level name, e.g. `raid1`.
    pub level: String,
    pub uuid: String,
    pub devices: Vec<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProbedVolumeGroup {
    pub name: String,
    pub physical_volumes: Vec<PathBuf>,
    /// Extent size in bytes, zero when unknown.
    pub extent_size: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProbedLogicalVolume {
    pub name: String,
    pub volume_group: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProbedZpool {
    pub name: String,
    pub vdevs: Vec<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProbedMount {
    pub target: PathBuf,
    pub source: Option<PathBuf>,
    pub fstype: String,
}

/// Snapshot of the storage objects present on the system.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Inventory {
    pub block_devices: Vec<ProbedDevice>,
    pub raid_arrays: Vec<ProbedRaid>,
    pub volume_groups: Vec<ProbedVolumeGroup>,
    pub logical_volumes: Vec<ProbedLogicalVolume>,
    pub zpools: Vec<ProbedZpool>,
    pub zfs_datasets: Vec<String>,
    pub mounts: Vec<ProbedMount>,
}

impl Inventory {
    pub fn device(&self, path: &Path) -> Option<&ProbedDevice> {
        self.block_devices.iter().find(|d| d.path == path)
    }

    pub fn disk_by_serial(&self, serial: &str) -> Option<&ProbedDevice> {
        self.block_devices
            .iter()
            .find(|d| d.device_type == "disk" && d.serial.as_deref() == Some(serial))
    }

    /// Partitions of `parent`, by partition number.
    pub fn partitions_of(&self, parent: &Path) -> Vec<&ProbedDevice> {
        let mut partitions = self
            .block_devices
            .iter()
            .filter(|d| d.is_partition() && d.parents.iter().any(|p| p == parent))
            .collect::<Vec<_>>();
        partitions.sort_by_key(|d| d.partition_number);
        partitions
    }

    pub fn partition(&self, parent: &Path, number: u32) -> Option<&ProbedDevice> {
        self.partitions_of(parent)
            .into_iter()
            .find(|d| d.partition_number == Some(number))
    }

    /// Devices built directly on `path`.
    pub fn holders(&self, path: &Path) -> Vec<&ProbedDevice> {
        self.block_devices
            .iter()
            .filter(|d| !d.is_partition() && d.parents.iter().any(|p| p == path))
            .collect()
    }

    /// Array at `path`, or assembled under `name` at another path.
    pub fn raid(&self, path: &Path, name: &str) -> Option<&ProbedRaid> {
        self.raid_arrays
            .iter()
            .find(|r| r.path == path)
            .or_else(|| {
                self.raid_arrays
                    .iter()
                    .find(|r| r.name.as_deref() == Some(name))
            })
    }

    pub fn volume_group(&self, name: &str) -> Option<&ProbedVolumeGroup> {
        self.volume_groups.iter().find(|vg| vg.name == name)
    }

    /// Volume group holding the logical volume at `path`.
    pub fn volume_group_of(&self, path: &Path) -> Option<&str> {
        self.logical_volumes
            .iter()
            .find(|lv| lv.path == path)
            .map(|lv| lv.volume_group.as_str())
    }

    pub fn logical_volume(&self, volume_group: &str, name: &str) -> Option<&ProbedLogicalVolume> {
        self.logical_volumes
            .iter()
            .find(|lv| lv.volume_group == volume_group && lv.name == name)
    }

    pub fn zpool(&self, name: &str) -> Option<&ProbedZpool> {
        self.zpools.iter().find(|pool| pool.name == name)
    }

    pub fn has_dataset(&self, name: &str) -> bool {
        self.zfs_datasets.iter().any(|d| d == name)
    }

    pub fn mount_at(&self, target: &Path) -> Option<&ProbedMount> {
        self.mounts.iter().find(|m| m.target == target)
    }

    /// The bcache device whose backing device is `backing`.
    pub fn bcache_on(&self, backing: &Path) -> Option<&ProbedDevice> {
        self.holders(backing)
            .into_iter()
            .find(|d| d.path.to_string_lossy().starts_with("/dev/bcache"))
    }
}
