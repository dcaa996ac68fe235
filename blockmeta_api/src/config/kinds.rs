//! Basic types describing entry kinds and the references between entries.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::EntryId;

/// Enum for supported storage entry kinds.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::Display,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryKind {
    Disk,
    Partition,
    Raid,
    LvmVolgroup,
    LvmPartition,
    Bcache,
    ZfsPool,
    ZfsFs,
    Format,
    Mount,
    DmCrypt,
}

bitflags::bitflags! {
    /// Bitflags for supported entry kinds.
    ///
    /// MUST MATCH THE CONTENTS OF EntryKind
    #[derive(Serialize, Deserialize, Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub struct EntryKindFlag: u32 {
        const Disk = 1;
        const Partition = 1 << 1;
        const Raid = 1 << 2;
        const LvmVolgroup = 1 << 3;
        const LvmPartition = 1 << 4;
        const Bcache = 1 << 5;
        const ZfsPool = 1 << 6;
        const ZfsFs = 1 << 7;
        const Format = 1 << 8;
        const Mount = 1 << 9;
        const DmCrypt = 1 << 10;
    }
}

impl EntryKind {
    pub const ALL: [EntryKind; 11] = [
        EntryKind::Disk,
        EntryKind::Partition,
        EntryKind::Raid,
        EntryKind::LvmVolgroup,
        EntryKind::LvmPartition,
        EntryKind::Bcache,
        EntryKind::ZfsPool,
        EntryKind::ZfsFs,
        EntryKind::Format,
        EntryKind::Mount,
        EntryKind::DmCrypt,
    ];

    pub fn as_flag(&self) -> EntryKindFlag {
        match self {
            Self::Disk => EntryKindFlag::Disk,
            Self::Partition => EntryKindFlag::Partition,
            Self::Raid => EntryKindFlag::Raid,
            Self::LvmVolgroup => EntryKindFlag::LvmVolgroup,
            Self::LvmPartition => EntryKindFlag::LvmPartition,
            Self::Bcache => EntryKindFlag::Bcache,
            Self::ZfsPool => EntryKindFlag::ZfsPool,
            Self::ZfsFs => EntryKindFlag::ZfsFs,
            Self::Format => EntryKindFlag::Format,
            Self::Mount => EntryKindFlag::Mount,
            Self::DmCrypt => EntryKindFlag::DmCrypt,
        }
    }

    /// Kinds of entries that an entry of this kind may reference.
    pub fn compatible_kinds(&self) -> EntryKindFlag {
        // Anything that ends up as a plain block device node.
        let volumes = EntryKindFlag::Disk
            | EntryKindFlag::Partition
            | EntryKindFlag::Raid
            | EntryKindFlag::Bcache
            | EntryKindFlag::DmCrypt
            | EntryKindFlag::LvmPartition;

        match self {
            Self::Disk => EntryKindFlag::empty(),
            Self::Partition => EntryKindFlag::Disk | EntryKindFlag::Raid | EntryKindFlag::Bcache,
            Self::Raid | Self::Bcache | Self::DmCrypt | Self::Format => volumes,
            Self::LvmVolgroup => volumes - EntryKindFlag::LvmPartition,
            Self::LvmPartition => EntryKindFlag::LvmVolgroup,
            Self::ZfsPool => EntryKindFlag::Disk | EntryKindFlag::Partition,
            Self::ZfsFs => EntryKindFlag::ZfsPool,
            Self::Mount => EntryKindFlag::Format,
        }
    }

    /// Whether entries of this kind can carry a partition table.
    pub fn can_hold_partitions(&self) -> bool {
        matches!(self, Self::Disk | Self::Raid | Self::Bcache)
    }
}

impl Display for EntryKindFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds = EntryKind::ALL
            .iter()
            .filter(|kind| self.contains(kind.as_flag()))
            .map(|kind| format!("'{kind}'"))
            .collect::<Vec<_>>();

        if kinds.is_empty() {
            f.write_str("(none)")
        } else {
            f.write_str(&kinds.join(", "))
        }
    }
}

/// Names of the fields through which an entry references other entries.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::Display,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReferenceField {
    Device,
    Devices,
    SpareDevices,
    Volgroup,
    BackingDevice,
    CacheDevice,
    Volume,
    Vdevs,
    Pool,
}

/// A single reference from one entry to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'a> {
    /// Kind of the entry holding the reference.
    pub referrer: EntryKind,
    pub field: ReferenceField,
    pub target: &'a EntryId,
}

impl Reference<'_> {
    /// Whether the referrer takes exclusive ownership of the target.
    ///
    /// Partitions share their parent and logical volumes share their volume
    /// group; every other reference consumes the target.
    pub fn is_exclusive(&self) -> bool {
        !matches!(
            (self.referrer, self.field),
            (EntryKind::Partition, ReferenceField::Device)
                | (EntryKind::LvmPartition, ReferenceField::Volgroup)
                | (EntryKind::ZfsFs, ReferenceField::Pool)
        )
    }
}
