use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};
use uuid::Uuid;

/// Filesystem types that can be created by a `format` entry.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FileSystemType {
    Ext2,
    Ext3,
    Ext4,
    Btrfs,
    Xfs,
    Vfat,
    Fat,
    Fat12,
    Fat16,
    Fat32,
    Ntfs,
    Swap,
}

/// Groups of filesystem types that share tooling conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemFamily {
    Ext,
    Btrfs,
    Xfs,
    Fat,
    Ntfs,
    Swap,
}

impl FileSystemType {
    pub fn family(&self) -> FileSystemFamily {
        match self {
            Self::Ext2 | Self::Ext3 | Self::Ext4 => FileSystemFamily::Ext,
            Self::Btrfs => FileSystemFamily::Btrfs,
            Self::Xfs => FileSystemFamily::Xfs,
            Self::Vfat | Self::Fat | Self::Fat12 | Self::Fat16 | Self::Fat32 => {
                FileSystemFamily::Fat
            }
            Self::Ntfs => FileSystemFamily::Ntfs,
            Self::Swap => FileSystemFamily::Swap,
        }
    }

    /// Name used by the kernel, `mount` and fstab for this type.
    pub fn mount_name(&self) -> &'static str {
        match self.family() {
            FileSystemFamily::Fat => "vfat",
            _ => self.into(),
        }
    }

    /// Explicit FAT size, if the type pins one.
    pub fn fat_size(&self) -> Option<u8> {
        match self {
            Self::Fat12 => Some(12),
            Self::Fat16 => Some(16),
            Self::Fat32 => Some(32),
            _ => None,
        }
    }

    /// Maximum label length accepted by the formatting tool.
    pub fn max_label_length(&self) -> usize {
        match self.family() {
            FileSystemFamily::Ext => 16,
            FileSystemFamily::Btrfs => 256,
            FileSystemFamily::Xfs => 12,
            FileSystemFamily::Fat => 11,
            FileSystemFamily::Ntfs => 32,
            FileSystemFamily::Swap => 15,
        }
    }

    /// Checks that `uuid` is a volume identifier this filesystem type can be
    /// created with.
    pub fn check_uuid(&self, uuid: &str) -> Result<(), String> {
        match self.family() {
            FileSystemFamily::Ext
            | FileSystemFamily::Btrfs
            | FileSystemFamily::Xfs
            | FileSystemFamily::Swap => Uuid::parse_str(uuid)
                .map(|_| ())
                .map_err(|e| format!("'{uuid}' is not a valid UUID for '{self}': {e}")),
            FileSystemFamily::Fat => {
                let hex = uuid.replace('-', "");
                if hex.len() == 8 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    Ok(())
                } else {
                    Err(format!(
                        "'{uuid}' is not a valid volume id for '{self}', expected 8 hex digits"
                    ))
                }
            }
            FileSystemFamily::Ntfs => Err(format!("filesystem type '{self}' does not support UUIDs")),
        }
    }

    /// Returns true if a filesystem reported by the system with type
    /// `observed` (as printed by blkid/lsblk) satisfies this type.
    pub fn matches_observed(&self, observed: &str) -> bool {
        match self.family() {
            FileSystemFamily::Fat => observed == "vfat" || observed.starts_with("fat"),
            _ => observed == self.mount_name(),
        }
    }
}
