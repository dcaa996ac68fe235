//! Document-level validation of a storage configuration.
//!
//! Checks are performed in the following order:
//! - Version and emptiness of the document.
//! - Uniqueness of entry ids.
//! - Per-entry field checks (required and mutually exclusive fields, name
//!   syntax, sizes, labels and UUIDs).
//! - References: no self references, no dangling references, compatible
//!   target kinds and no repeated targets within one entry.
//! - Exclusive use of block devices.
//! - Uniqueness of names and mount points.
//! - Partition tables and flags.
//! - Partition geometry.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Component, Path, PathBuf},
};

use log::trace;

use crate::{
    constants::{SECTOR_SIZE, SUPPORTED_CONFIG_VERSION},
    EntryId,
};

use super::{
    entries::Partition, ConfigError, EntryKind, FileSystemType, PartitionLayout, StorageConfig,
    StorageEntry, WipeMode,
};

pub(super) fn validate(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(config.version.into()));
    }

    let entries = &config.config;
    if entries.is_empty() {
        return Err(ConfigError::Empty);
    }

    trace!("Checking entry ids");
    let mut index: BTreeMap<&EntryId, &StorageEntry> = BTreeMap::new();
    for entry in entries {
        if index.insert(entry.id(), entry).is_some() {
            return Err(ConfigError::DuplicateId(entry.id().clone()));
        }
    }

    trace!("Checking entries");
    for entry in entries {
        check_entry(entry).map_err(|reason| ConfigError::InvalidEntry {
            id: entry.id().clone(),
            kind: entry.kind(),
            reason,
        })?;
    }

    trace!("Checking references");
    check_references(entries, &index)?;

    trace!("Checking exclusive use");
    check_exclusive_use(entries)?;

    trace!("Checking unique fields");
    check_unique_fields(entries, &index)?;

    trace!("Checking mounts");
    check_mounts(entries, &index)?;

    trace!("Checking partitions");
    check_partitions(entries, &index)?;

    PartitionLayout::compute(entries)?;

    Ok(())
}

/// Checks the fields of a single entry in isolation.
fn check_entry(entry: &StorageEntry) -> Result<(), String> {
    check_name("id", entry.id())?;

    if entry.preserve() && entry.wipe().is_some() {
        return Err("'preserve' and 'wipe' are mutually exclusive".into());
    }

    match entry {
        StorageEntry::Disk(disk) => {
            if disk.serial.is_none() && disk.path.is_none() {
                return Err("one of 'serial' or 'path' is required".into());
            }
            if let Some(path) = &disk.path {
                check_absolute("path", path)?;
            }
        }
        StorageEntry::Partition(partition) => check_partition_fields(partition)?,
        StorageEntry::Raid(raid) => {
            check_name("name", &raid.name)?;
            if raid.devices.len() < raid.raidlevel.min_devices() {
                return Err(format!(
                    "{} requires at least {} devices, {} given",
                    raid.raidlevel,
                    raid.raidlevel.min_devices(),
                    raid.devices.len()
                ));
            }
            if !raid.spare_devices.is_empty() && !raid.raidlevel.supports_spares() {
                return Err(format!("{} cannot have spare devices", raid.raidlevel));
            }
        }
        StorageEntry::LvmVolgroup(vg) => {
            check_name("name", &vg.name)?;
            if vg.devices.is_empty() {
                return Err("at least one device is required".into());
            }
        }
        StorageEntry::LvmPartition(lv) => {
            check_name("name", &lv.name)?;
            if lv.size.is_some_and(|size| size.bytes() == 0) {
                return Err("'size' must be greater than zero".into());
            }
        }
        StorageEntry::Bcache(bcache) => {
            if let Some(name) = &bcache.name {
                check_name("name", name)?;
            }
        }
        StorageEntry::ZfsPool(pool) => {
            check_name("pool", &pool.pool)?;
            if pool.vdevs.is_empty() {
                return Err("at least one vdev is required".into());
            }
            if let Some(mountpoint) = &pool.mountpoint {
                check_absolute("mountpoint", mountpoint)?;
            }
        }
        StorageEntry::ZfsFs(fs) => {
            // Relative to the pool; a single leading slash is accepted.
            let relative = fs.volume.strip_prefix('/').unwrap_or(&fs.volume);
            if relative.is_empty()
                || relative.contains(char::is_whitespace)
                || relative
                    .split('/')
                    .any(|part| part.is_empty() || part == "." || part == "..")
            {
                return Err(format!("'{}' is not a valid dataset name", fs.volume));
            }
        }
        StorageEntry::Format(format) => {
            if let Some(label) = &format.label {
                let max = format.fstype.max_label_length();
                if label.len() > max {
                    return Err(format!(
                        "label '{label}' is longer than the {max} characters supported by '{}'",
                        format.fstype
                    ));
                }
            }
            if let Some(uuid) = &format.uuid {
                format.fstype.check_uuid(uuid)?;
            }
        }
        StorageEntry::Mount(mount) => {
            if let Some(path) = &mount.path {
                check_absolute("path", path)?;
            }
            if mount.options.as_ref().is_some_and(|o| o.trim().is_empty()) {
                return Err("'options' must not be empty".into());
            }
        }
        StorageEntry::DmCrypt(crypt) => {
            match (&crypt.key, &crypt.keyfile) {
                (None, None) => return Err("one of 'key' or 'keyfile' is required".into()),
                (Some(_), Some(_)) => {
                    return Err("'key' and 'keyfile' are mutually exclusive".into())
                }
                (Some(key), None) if key.is_empty() => {
                    return Err("'key' must not be empty".into())
                }
                _ => {}
            }
            check_name("dm_name", crypt.mapping_name())?;
            if crypt.keysize == Some(0) {
                return Err("'keysize' must be greater than zero".into());
            }
        }
    }

    Ok(())
}

fn check_partition_fields(partition: &Partition) -> Result<(), String> {
    match (partition.size, partition.grow) {
        (None, false) => return Err("one of 'size' or 'grow' is required".into()),
        (Some(_), true) => return Err("'size' and 'grow' are mutually exclusive".into()),
        _ => {}
    }

    if let Some(size) = partition.size {
        if size.bytes() == 0 {
            return Err("'size' must be greater than zero".into());
        }
        if size.in_units_of(SECTOR_SIZE).is_none() {
            return Err(format!(
                "'size' {} is not a multiple of {SECTOR_SIZE} bytes",
                size.bytes()
            ));
        }
    }

    if let Some(offset) = partition.offset {
        if offset.in_units_of(SECTOR_SIZE).is_none() {
            return Err(format!(
                "'offset' {} is not a multiple of {SECTOR_SIZE} bytes",
                offset.bytes()
            ));
        }
    }

    if partition.number == Some(0) {
        return Err("partition numbers start at 1".into());
    }

    if partition.wipe == Some(WipeMode::Pvremove) {
        return Err("wipe mode 'pvremove' only applies to whole disks".into());
    }

    Ok(())
}

fn check_name(field: &str, name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("'{field}' must not be empty"));
    }
    if name.contains('/') || name.contains(char::is_whitespace) {
        return Err(format!(
            "'{field}' value '{name}' must not contain slashes or whitespace"
        ));
    }
    Ok(())
}

fn check_absolute(field: &str, path: &Path) -> Result<(), String> {
    if !path.is_absolute() {
        return Err(format!(
            "'{field}' value '{}' must be an absolute path",
            path.display()
        ));
    }
    Ok(())
}

fn check_references(
    entries: &[StorageEntry],
    index: &BTreeMap<&EntryId, &StorageEntry>,
) -> Result<(), ConfigError> {
    for entry in entries {
        let mut seen = BTreeSet::new();
        for reference in entry.references() {
            if reference.target == entry.id() {
                return Err(ConfigError::SelfReference {
                    id: entry.id().clone(),
                    kind: entry.kind(),
                    field: reference.field,
                });
            }

            let target = index.get(reference.target).ok_or_else(|| {
                ConfigError::DanglingReference {
                    id: entry.id().clone(),
                    kind: entry.kind(),
                    field: reference.field,
                    target: reference.target.clone(),
                }
            })?;

            let valid_kinds = entry.kind().compatible_kinds();
            if !valid_kinds.contains(target.kind().as_flag()) {
                return Err(ConfigError::IncompatibleReference {
                    id: entry.id().clone(),
                    kind: entry.kind(),
                    field: reference.field,
                    target: reference.target.clone(),
                    target_kind: target.kind(),
                    valid_kinds,
                });
            }

            if !seen.insert(reference.target) {
                return Err(ConfigError::DuplicateReference {
                    id: entry.id().clone(),
                    kind: entry.kind(),
                    target: reference.target.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Checks that every block device is used by at most one other entry, and
/// that devices holding partitions are not used directly.
fn check_exclusive_use(entries: &[StorageEntry]) -> Result<(), ConfigError> {
    let mut users: BTreeMap<&EntryId, &EntryId> = BTreeMap::new();

    // Partition parents count as used by their first partition.
    for entry in entries {
        if let StorageEntry::Partition(partition) = entry {
            users.entry(&partition.device).or_insert(&partition.id);
        }
    }

    for entry in entries {
        for reference in entry.references() {
            if !reference.is_exclusive() {
                continue;
            }

            if let Some(first) = users.insert(reference.target, entry.id()) {
                return Err(ConfigError::MultipleConsumers {
                    target: reference.target.clone(),
                    first: first.clone(),
                    second: entry.id().clone(),
                });
            }
        }
    }

    Ok(())
}

/// Checks that names which become system-wide identifiers are unique.
fn check_unique_fields(
    entries: &[StorageEntry],
    index: &BTreeMap<&EntryId, &StorageEntry>,
) -> Result<(), ConfigError> {
    // (kind, field, value) -> first entry id
    let mut seen: BTreeMap<(EntryKind, &'static str, String), &EntryId> = BTreeMap::new();

    for entry in entries {
        let values: Vec<(&'static str, String)> = match entry {
            StorageEntry::Disk(disk) => {
                let mut values = Vec::new();
                if let Some(serial) = &disk.serial {
                    values.push(("serial", serial.clone()));
                }
                if let Some(path) = &disk.path {
                    values.push(("path", path.display().to_string()));
                }
                values
            }
            StorageEntry::Raid(raid) => {
                vec![("device path", raid.device_path().display().to_string())]
            }
            StorageEntry::LvmVolgroup(vg) => vec![("name", vg.name.clone())],
            StorageEntry::LvmPartition(lv) => {
                let vg_name = match index.get(&lv.volgroup) {
                    Some(StorageEntry::LvmVolgroup(vg)) => vg.name.as_str(),
                    _ => lv.volgroup.as_str(),
                };
                vec![("name", format!("{vg_name}/{}", lv.name))]
            }
            StorageEntry::ZfsPool(pool) => vec![("pool", pool.pool.clone())],
            StorageEntry::ZfsFs(fs) => vec![(
                "volume",
                format!("{}/{}", fs.pool, fs.volume.trim_start_matches('/')),
            )],
            StorageEntry::DmCrypt(crypt) => vec![("dm_name", crypt.mapping_name().to_string())],
            StorageEntry::Mount(mount) => match &mount.path {
                Some(path) => vec![("path", normalize(path).display().to_string())],
                None => Vec::new(),
            },
            StorageEntry::Bcache(bcache) => match &bcache.name {
                Some(name) => vec![("name", name.clone())],
                None => Vec::new(),
            },
            StorageEntry::Partition(_) | StorageEntry::Format(_) => Vec::new(),
        };

        for (field, value) in values {
            let key = (entry.kind(), field, value);
            if let Some(first) = seen.get(&key) {
                return Err(ConfigError::DuplicateValue {
                    kind: key.0,
                    field: key.1.to_string(),
                    value: key.2,
                    first: (*first).clone(),
                    second: entry.id().clone(),
                });
            }
            seen.insert(key, entry.id());
        }
    }

    Ok(())
}

/// Removes `.` components and trailing slashes from a mount path.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Checks that mounts of regular filesystems declare a path.
fn check_mounts(
    entries: &[StorageEntry],
    index: &BTreeMap<&EntryId, &StorageEntry>,
) -> Result<(), ConfigError> {
    for entry in entries {
        let StorageEntry::Mount(mount) = entry else {
            continue;
        };

        let is_swap = matches!(
            index.get(&mount.device),
            Some(StorageEntry::Format(format)) if format.fstype == FileSystemType::Swap
        );

        if !is_swap && mount.path.is_none() {
            return Err(ConfigError::InvalidEntry {
                id: mount.id.clone(),
                kind: EntryKind::Mount,
                reason: "'path' is required".into(),
            });
        }
    }

    Ok(())
}

/// Checks that partitions sit on a device with a partition table and use
/// flags that the table supports.
fn check_partitions(
    entries: &[StorageEntry],
    index: &BTreeMap<&EntryId, &StorageEntry>,
) -> Result<(), ConfigError> {
    for entry in entries {
        let StorageEntry::Partition(partition) = entry else {
            continue;
        };

        let invalid = |reason: String| ConfigError::InvalidEntry {
            id: partition.id.clone(),
            kind: EntryKind::Partition,
            reason,
        };

        // References were already checked, so the parent exists.
        let Some(parent) = index.get(&partition.device) else {
            continue;
        };

        let ptable = parent.ptable().ok_or_else(|| {
            invalid(format!(
                "parent {} does not declare a partition table",
                parent.describe()
            ))
        })?;

        if let Some(flag) = partition.flag {
            if !flag.supported_on(ptable) {
                return Err(invalid(format!(
                    "flag '{flag}' is not supported on '{ptable}' partition tables"
                )));
            }
        }
    }

    Ok(())
}
