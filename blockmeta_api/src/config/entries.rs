use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

use crate::{constants::DEV_MD_DIR, EntryId};

use super::{filesystem::FileSystemType, size::ByteSize};

fn is_false(b: &bool) -> bool {
    !b
}

/// Partition table types.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PartitionTableType {
    Gpt,
    #[serde(alias = "dos")]
    Msdos,
}

impl PartitionTableType {
    /// Returns true if a table type reported by the system (`lsblk` PTTYPE)
    /// is this type.
    pub fn matches_observed(&self, observed: &str) -> bool {
        match self {
            Self::Gpt => observed == "gpt",
            Self::Msdos => observed == "dos" || observed == "msdos",
        }
    }
}

/// Ways of erasing a device before it is reused.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WipeMode {
    /// Remove every filesystem, RAID, LVM and partition table signature.
    #[serde(alias = "superblock-recursive")]
    Superblock,
    /// Overwrite the whole device with zeros.
    Zero,
    /// Overwrite the whole device with random data.
    Random,
    /// Remove an LVM physical volume label.
    Pvremove,
}

/// Partition flags. Besides marking the partition type, `extended` and
/// `logical` select the msdos partition role.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PartitionFlag {
    Boot,
    BiosGrub,
    Esp,
    Lvm,
    Raid,
    Prep,
    Swap,
    Home,
    Linux,
    Msftres,
    Primary,
    Extended,
    Logical,
}

impl PartitionFlag {
    /// GPT type code understood by sgdisk.
    pub fn gpt_typecode(flag: Option<PartitionFlag>) -> &'static str {
        match flag {
            Some(Self::Boot) | Some(Self::Esp) => "ef00",
            Some(Self::BiosGrub) => "ef02",
            Some(Self::Lvm) => "8e00",
            Some(Self::Raid) => "fd00",
            Some(Self::Prep) => "4100",
            Some(Self::Swap) => "8200",
            Some(Self::Home) => "8302",
            Some(Self::Msftres) => "0c01",
            Some(Self::Linux)
            | Some(Self::Primary)
            | Some(Self::Extended)
            | Some(Self::Logical)
            | None => "8300",
        }
    }

    /// Flag name passed to `parted set` on msdos tables, if any.
    pub fn parted_flag(&self) -> Option<&'static str> {
        match self {
            Self::Boot | Self::Esp => Some("boot"),
            Self::Lvm => Some("lvm"),
            Self::Raid => Some("raid"),
            Self::Prep => Some("prep"),
            Self::Swap => Some("swap"),
            _ => None,
        }
    }

    /// Whether this flag can be used on a table of the given type.
    pub fn supported_on(&self, ptable: PartitionTableType) -> bool {
        match ptable {
            PartitionTableType::Gpt => !matches!(self, Self::Extended | Self::Logical),
            PartitionTableType::Msdos => {
                !matches!(self, Self::BiosGrub | Self::Home | Self::Msftres)
            }
        }
    }
}

/// Software RAID levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum RaidLevel {
    Raid0,
    Raid1,
    Raid4,
    Raid5,
    Raid6,
    Raid10,
}

impl RaidLevel {
    /// Minimum number of active members for an array of this level.
    pub fn min_devices(&self) -> usize {
        match self {
            Self::Raid0 | Self::Raid1 | Self::Raid10 => 2,
            Self::Raid4 | Self::Raid5 => 3,
            Self::Raid6 => 4,
        }
    }

    /// Whether arrays of this level can hold spare devices.
    pub fn supports_spares(&self) -> bool {
        !matches!(self, Self::Raid0)
    }

    fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        Some(match value.strip_prefix("raid").unwrap_or(&value) {
            "0" | "stripe" => Self::Raid0,
            "1" | "mirror" => Self::Raid1,
            "4" => Self::Raid4,
            "5" => Self::Raid5,
            "6" => Self::Raid6,
            "10" => Self::Raid10,
            _ => return None,
        })
    }
}

impl<'de> Deserialize<'de> for RaidLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // The level may be written as a bare number (1) or a name (raid1).
        let value = serde_yaml::Value::deserialize(deserializer)?;
        let text = match value {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            _ => return Err(serde::de::Error::custom("invalid RAID level")),
        };

        RaidLevel::parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("unsupported RAID level '{text}'")))
    }
}

impl Serialize for RaidLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.into())
    }
}

/// Caching modes of a bcache device.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CacheMode {
    Writethrough,
    Writeback,
}

/// A ZFS property value. YAML scalars of any type are accepted and kept as
/// the string passed to the zfs tools.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PropertyValue(pub String);

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match serde_yaml::Value::deserialize(deserializer)? {
            serde_yaml::Value::String(s) => Ok(PropertyValue(s)),
            serde_yaml::Value::Number(n) => Ok(PropertyValue(n.to_string())),
            serde_yaml::Value::Bool(b) => Ok(PropertyValue(if b { "on" } else { "off" }.into())),
            _ => Err(serde::de::Error::custom(
                "invalid property value, expected a scalar",
            )),
        }
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

/// A physical disk, identified by serial number and/or device path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Disk {
    pub id: EntryId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptable: Option<PartitionTableType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wipe: Option<WipeMode>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub preserve: bool,
}

/// A partition on a disk, RAID array or bcache device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Partition {
    pub id: EntryId,

    /// Device holding the partition table.
    pub device: EntryId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<ByteSize>,

    /// Use all the remaining space after the partition's start.
    #[serde(default, skip_serializing_if = "is_false")]
    pub grow: bool,

    /// Start of the partition from the beginning of the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<ByteSize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<PartitionFlag>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wipe: Option<WipeMode>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub preserve: bool,
}

/// A software RAID array.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Raid {
    pub id: EntryId,

    /// Array name, e.g. `md0` or `data`.
    pub name: String,

    pub raidlevel: RaidLevel,

    /// Active members, in the order they are passed to mdadm.
    pub devices: Vec<EntryId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spare_devices: Vec<EntryId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptable: Option<PartitionTableType>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub preserve: bool,
}

impl Raid {
    /// Device node of the array. Names of the form `mdN` map to `/dev/mdN`;
    /// anything else is created under `/dev/md/`.
    pub fn device_path(&self) -> PathBuf {
        let is_kernel_name = self
            .name
            .strip_prefix("md")
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));

        if is_kernel_name {
            PathBuf::from("/dev").join(&self.name)
        } else {
            PathBuf::from(DEV_MD_DIR).join(&self.name)
        }
    }
}

/// An LVM volume group.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LvmVolgroup {
    pub id: EntryId,

    pub name: String,

    /// Physical volumes.
    pub devices: Vec<EntryId>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub preserve: bool,
}

/// An LVM logical volume.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LvmPartition {
    pub id: EntryId,

    pub name: String,

    pub volgroup: EntryId,

    /// Size of the volume. All free space in the group is used if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<ByteSize>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub preserve: bool,
}

/// A bcache device made of a backing device and a cache device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Bcache {
    pub id: EntryId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub backing_device: EntryId,

    pub cache_device: EntryId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_mode: Option<CacheMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptable: Option<PartitionTableType>,
}

/// A LUKS encrypted volume.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DmCrypt {
    pub id: EntryId,

    pub volume: EntryId,

    /// Name of the opened mapping. Defaults to the entry id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm_name: Option<String>,

    /// Passphrase. Never serialized back.
    #[serde(default, skip_serializing)]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyfile: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keysize: Option<u32>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub preserve: bool,
}

impl DmCrypt {
    pub fn mapping_name(&self) -> &str {
        self.dm_name.as_deref().unwrap_or(&self.id)
    }
}

impl std::fmt::Debug for DmCrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmCrypt")
            .field("id", &self.id)
            .field("volume", &self.volume)
            .field("dm_name", &self.dm_name)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("keyfile", &self.keyfile)
            .field("cipher", &self.cipher)
            .field("keysize", &self.keysize)
            .field("preserve", &self.preserve)
            .finish()
    }
}

/// A ZFS pool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ZfsPool {
    pub id: EntryId,

    /// Pool name.
    pub pool: String,

    pub vdevs: Vec<EntryId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<PathBuf>,

    /// Pool properties (`zpool create -o`), merged over the defaults.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pool_properties: Properties,

    /// Root dataset properties (`zpool create -O`), merged over the defaults.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fs_properties: Properties,
}

/// A ZFS dataset inside a pool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ZfsFs {
    pub id: EntryId,

    /// Entry id of the pool.
    pub pool: EntryId,

    /// Dataset name relative to the pool.
    pub volume: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

/// A filesystem created on a volume.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Format {
    pub id: EntryId,

    pub volume: EntryId,

    pub fstype: FileSystemType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub preserve: bool,
}

/// A mount of a formatted volume in the target system.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Mount {
    pub id: EntryId,

    /// Entry id of the format to mount.
    pub device: EntryId,

    /// Mount point inside the target system. Not used for swap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raid_level() {
        assert_eq!(serde_yaml::from_str::<RaidLevel>("1").unwrap(), RaidLevel::Raid1);
        assert_eq!(
            serde_yaml::from_str::<RaidLevel>("raid10").unwrap(),
            RaidLevel::Raid10
        );
        assert_eq!(
            serde_yaml::from_str::<RaidLevel>("mirror").unwrap(),
            RaidLevel::Raid1
        );
        serde_yaml::from_str::<RaidLevel>("3").unwrap_err();
        assert_eq!(RaidLevel::Raid5.to_string(), "raid5");
        assert_eq!(serde_yaml::to_string(&RaidLevel::Raid6).unwrap(), "raid6\n");
    }

    #[test]
    fn test_raid_device_path() {
        let mut raid = Raid {
            id: "md0".into(),
            name: "md0".into(),
            raidlevel: RaidLevel::Raid1,
            devices: vec![],
            spare_devices: vec![],
            ptable: None,
            preserve: false,
        };
        assert_eq!(raid.device_path(), PathBuf::from("/dev/md0"));

        raid.name = "data".into();
        assert_eq!(raid.device_path(), PathBuf::from("/dev/md/data"));

        raid.name = "md".into();
        assert_eq!(raid.device_path(), PathBuf::from("/dev/md/md"));
    }

    #[test]
    fn test_partition_flags() {
        assert_eq!(PartitionFlag::gpt_typecode(Some(PartitionFlag::Boot)), "ef00");
        assert_eq!(PartitionFlag::gpt_typecode(Some(PartitionFlag::Raid)), "fd00");
        assert_eq!(PartitionFlag::gpt_typecode(None), "8300");
        assert!(!PartitionFlag::Logical.supported_on(PartitionTableType::Gpt));
        assert!(PartitionFlag::Logical.supported_on(PartitionTableType::Msdos));
        assert!(!PartitionFlag::BiosGrub.supported_on(PartitionTableType::Msdos));
        assert_eq!(PartitionFlag::Lvm.parted_flag(), Some("lvm"));
    }

    #[test]
    fn test_property_values() {
        let properties: Properties = serde_yaml::from_str(indoc::indoc! {r#"
            ashift: 12
            compression: lz4
            atime: false
        "#})
        .unwrap();
        assert_eq!(properties["ashift"], PropertyValue("12".into()));
        assert_eq!(properties["compression"], PropertyValue("lz4".into()));
        assert_eq!(properties["atime"], PropertyValue("off".into()));
    }

    #[test]
    fn test_dm_crypt_debug_redacts_key() {
        let crypt = DmCrypt {
            id: "crypt0".into(),
            volume: "sda1".into(),
            dm_name: None,
            key: Some("hunter2".into()),
            keyfile: None,
            cipher: None,
            keysize: None,
            preserve: false,
        };
        assert!(!format!("{crypt:?}").contains("hunter2"));
        assert_eq!(crypt.mapping_name(), "crypt0");
    }
}
