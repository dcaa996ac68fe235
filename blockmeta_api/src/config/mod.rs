//! Storage configuration model.
//!
//! A storage configuration document declares a flat list of entries, each
//! with a unique `id` and a `type`. Entries refer to each other by id through
//! their reference fields (`device`, `devices`, `volume`, ...). Parsing
//! produces the typed entries in document order; validation checks every
//! rule that can be checked without looking at the live system.

use std::slice;

use serde::{Deserialize, Serialize};

use crate::{
    constants::{STORAGE_DOCUMENT_KEY, SUPPORTED_CONFIG_VERSION},
    EntryId,
};

mod entries;
mod error;
mod filesystem;
mod kinds;
mod layout;
mod size;
mod validation;

pub use entries::{
    Bcache, CacheMode, Disk, DmCrypt, Format, LvmPartition, LvmVolgroup, Mount, Partition,
    PartitionFlag, PartitionTableType, Properties, PropertyValue, Raid, RaidLevel, WipeMode,
    ZfsFs, ZfsPool,
};
pub use error::ConfigError;
pub use filesystem::{FileSystemFamily, FileSystemType};
pub use kinds::{EntryKind, EntryKindFlag, Reference, ReferenceField};
pub use layout::{PartitionGeometry, PartitionLayout, PartitionRole};
pub use size::{ByteSize, SizeError};

/// A single declared storage entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageEntry {
    Disk(Disk),
    Partition(Partition),
    Raid(Raid),
    LvmVolgroup(LvmVolgroup),
    LvmPartition(LvmPartition),
    Bcache(Bcache),
    #[serde(alias = "zpool")]
    ZfsPool(ZfsPool),
    #[serde(alias = "zfs")]
    ZfsFs(ZfsFs),
    Format(Format),
    Mount(Mount),
    DmCrypt(DmCrypt),
}

impl StorageEntry {
    pub fn id(&self) -> &EntryId {
        match self {
            Self::Disk(e) => &e.id,
            Self::Partition(e) => &e.id,
            Self::Raid(e) => &e.id,
            Self::LvmVolgroup(e) => &e.id,
            Self::LvmPartition(e) => &e.id,
            Self::Bcache(e) => &e.id,
            Self::ZfsPool(e) => &e.id,
            Self::ZfsFs(e) => &e.id,
            Self::Format(e) => &e.id,
            Self::Mount(e) => &e.id,
            Self::DmCrypt(e) => &e.id,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Disk(_) => EntryKind::Disk,
            Self::Partition(_) => EntryKind::Partition,
            Self::Raid(_) => EntryKind::Raid,
            Self::LvmVolgroup(_) => EntryKind::LvmVolgroup,
            Self::LvmPartition(_) => EntryKind::LvmPartition,
            Self::Bcache(_) => EntryKind::Bcache,
            Self::ZfsPool(_) => EntryKind::ZfsPool,
            Self::ZfsFs(_) => EntryKind::ZfsFs,
            Self::Format(_) => EntryKind::Format,
            Self::Mount(_) => EntryKind::Mount,
            Self::DmCrypt(_) => EntryKind::DmCrypt,
        }
    }

    /// Returns every reference made by this entry, in field declaration
    /// order and, within list fields, in list order.
    pub fn references(&self) -> Vec<Reference<'_>> {
        let referrer = self.kind();
        let to = |field, targets| references_to(referrer, field, targets);

        match self {
            Self::Disk(_) => Vec::new(),
            Self::Partition(e) => to(ReferenceField::Device, slice::from_ref(&e.device)),
            Self::Raid(e) => {
                let mut refs = to(ReferenceField::Devices, &e.devices);
                refs.extend(to(ReferenceField::SpareDevices, &e.spare_devices));
                refs
            }
            Self::LvmVolgroup(e) => to(ReferenceField::Devices, &e.devices),
            Self::LvmPartition(e) => to(ReferenceField::Volgroup, slice::from_ref(&e.volgroup)),
            Self::Bcache(e) => {
                let mut refs = to(
                    ReferenceField::BackingDevice,
                    slice::from_ref(&e.backing_device),
                );
                refs.extend(to(
                    ReferenceField::CacheDevice,
                    slice::from_ref(&e.cache_device),
                ));
                refs
            }
            Self::ZfsPool(e) => to(ReferenceField::Vdevs, &e.vdevs),
            Self::ZfsFs(e) => to(ReferenceField::Pool, slice::from_ref(&e.pool)),
            Self::Format(e) => to(ReferenceField::Volume, slice::from_ref(&e.volume)),
            Self::Mount(e) => to(ReferenceField::Device, slice::from_ref(&e.device)),
            Self::DmCrypt(e) => to(ReferenceField::Volume, slice::from_ref(&e.volume)),
        }
    }

    /// Whether the entry must already exist and may never be modified.
    pub fn preserve(&self) -> bool {
        match self {
            Self::Disk(e) => e.preserve,
            Self::Partition(e) => e.preserve,
            Self::Raid(e) => e.preserve,
            Self::LvmVolgroup(e) => e.preserve,
            Self::LvmPartition(e) => e.preserve,
            Self::Format(e) => e.preserve,
            Self::DmCrypt(e) => e.preserve,
            Self::Bcache(_) | Self::ZfsPool(_) | Self::ZfsFs(_) | Self::Mount(_) => false,
        }
    }

    /// Declared wipe directive, if any.
    pub fn wipe(&self) -> Option<WipeMode> {
        match self {
            Self::Disk(e) => e.wipe,
            Self::Partition(e) => e.wipe,
            _ => None,
        }
    }

    /// Partition table declared on the device, for kinds that can hold one.
    pub fn ptable(&self) -> Option<PartitionTableType> {
        match self {
            Self::Disk(e) => e.ptable,
            Self::Raid(e) => e.ptable,
            Self::Bcache(e) => e.ptable,
            _ => None,
        }
    }

    /// Short human readable description, e.g. `partition 'sda-part1'`.
    pub fn describe(&self) -> String {
        format!("{} '{}'", self.kind(), self.id())
    }
}

fn references_to(
    referrer: EntryKind,
    field: ReferenceField,
    targets: &[EntryId],
) -> Vec<Reference<'_>> {
    targets
        .iter()
        .map(|target| Reference {
            referrer,
            field,
            target,
        })
        .collect()
}

/// A complete storage configuration document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub version: u32,

    pub config: Vec<StorageEntry>,
}

impl StorageConfig {
    /// Deserializes a YAML (or JSON) document. The document may be nested
    /// under a top-level `storage` key.
    pub fn from_yaml_str(document: &str) -> Result<Self, ConfigError> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    /// Deserializes an already parsed document.
    pub fn from_value(value: serde_yaml::Value) -> Result<Self, ConfigError> {
        let value = match value {
            serde_yaml::Value::Mapping(mut mapping)
                if mapping.len() == 1 && mapping.contains_key(STORAGE_DOCUMENT_KEY) =>
            {
                mapping
                    .remove(STORAGE_DOCUMENT_KEY)
                    .unwrap_or(serde_yaml::Value::Null)
            }
            other => other,
        };

        // Report the version before anything else so that documents written
        // for another version fail with a clear message.
        if let Some(version) = value.get("version") {
            match version.as_u64() {
                Some(v) if v == u64::from(SUPPORTED_CONFIG_VERSION) => {}
                Some(v) => return Err(ConfigError::UnsupportedVersion(v)),
                None => {
                    return Err(ConfigError::Parse(
                        "'version' must be an unsigned integer".into(),
                    ))
                }
            }
        }

        serde_yaml::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Checks every rule that does not need the live system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self)
    }

    pub fn entry(&self, id: &str) -> Option<&StorageEntry> {
        self.config.iter().find(|entry| entry.id() == id)
    }
}

/// Parses and validates a storage configuration document, returning its
/// entries in document order.
pub fn parse(document: &str) -> Result<Vec<StorageEntry>, ConfigError> {
    let config = StorageConfig::from_yaml_str(document)?;
    config.validate()?;
    Ok(config.config)
}

/// Same as [`parse`], for a document that was already deserialized by the
/// caller.
pub fn parse_value(value: serde_yaml::Value) -> Result<Vec<StorageEntry>, ConfigError> {
    let config = StorageConfig::from_value(value)?;
    config.validate()?;
    Ok(config.config)
}
