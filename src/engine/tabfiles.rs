//! fstab, crypttab and mdadm.conf of the installed system, written from the
//! entries that were satisfied.

use std::path::Path;

use log::{info, warn};

use blockmeta_api::{
    config::{EntryKind, FileSystemType, StorageEntry},
    error::{EngineError, EnvironmentError, ReportError},
    plan::StoragePlan,
    status::{ApplyReport, ApplyState},
};
use osutils::{
    blkid,
    dependencies::CommandRunner,
    mdadm,
    tabfile::{CryptTab, CryptTabEntry, TabDevice, TabFile, TabFileEntry},
};

use crate::options::ApplyOptions;

use super::resolution::ResolutionTable;

fn satisfied<'a>(
    plan: &'a StoragePlan,
    report: &'a ApplyReport,
) -> impl Iterator<Item = &'a StorageEntry> {
    report
        .entries
        .iter()
        .filter(|e| e.state == ApplyState::Satisfied)
        .filter_map(|e| plan.entry(&e.id))
}

/// Builds fstab lines for every satisfied mount, in the order they were
/// mounted.
pub(super) fn fstab(
    plan: &StoragePlan,
    report: &ApplyReport,
    resolved: &ResolutionTable,
) -> TabFile {
    let mut tab = TabFile::default();
    for entry in satisfied(plan, report) {
        let StorageEntry::Mount(mount) = entry else {
            continue;
        };
        let Some(StorageEntry::Format(format)) = plan.entry(&mount.device) else {
            continue;
        };
        let Some(filesystem) = resolved.get(&format.id) else {
            continue;
        };
        let Some(path) = filesystem.handle.path() else {
            continue;
        };

        let by_uuid = plan.entry(&format.volume).is_some_and(|volume| {
            matches!(volume.kind(), EntryKind::Partition | EntryKind::DmCrypt)
        });
        let device = match &filesystem.fs_uuid {
            Some(uuid) if by_uuid => TabDevice::Uuid(uuid.clone()),
            _ => TabDevice::BlockDevice(path.to_path_buf()),
        };

        if format.fstype == FileSystemType::Swap {
            tab.entries.push(TabFileEntry::new_swap(device));
            continue;
        }
        let Some(mount_point) = &mount.path else {
            continue;
        };
        let options = mount
            .options
            .as_deref()
            .map(|options| options.split(',').map(String::from).collect())
            .unwrap_or_default();
        tab.entries.push(
            TabFileEntry::new_path(device, mount_point, format.fstype.mount_name())
                .with_options(options),
        );
    }
    tab
}

/// Builds crypttab lines for every satisfied encrypted volume. Volumes are
/// referenced by the UUID of their LUKS header when blkid can read it.
pub(super) fn crypttab(
    runner: &dyn CommandRunner,
    plan: &StoragePlan,
    report: &ApplyReport,
    resolved: &ResolutionTable,
) -> CryptTab {
    let mut tab = CryptTab::default();
    for entry in satisfied(plan, report) {
        let StorageEntry::DmCrypt(crypt) = entry else {
            continue;
        };
        let Some(volume) = resolved.path(&crypt.volume) else {
            continue;
        };

        let device = match blkid::get_filesystem_uuid(runner, volume) {
            Ok(uuid) => TabDevice::Uuid(uuid),
            Err(e) => {
                warn!(
                    "Referencing '{}' by path in crypttab: {e:#}",
                    volume.display()
                );
                TabDevice::BlockDevice(volume.to_path_buf())
            }
        };
        tab.entries.push(CryptTabEntry {
            name: crypt.mapping_name().into(),
            device,
            key_file: crypt.keyfile.clone(),
        });
    }
    tab
}

fn write_error(path: &Path) -> EnvironmentError {
    EnvironmentError::WriteFile {
        path: path.display().to_string(),
    }
}

/// Writes the files configured in `options` and records them in the report.
#[tracing::instrument(skip_all)]
pub(super) fn write_all(
    runner: &dyn CommandRunner,
    options: &ApplyOptions,
    plan: &StoragePlan,
    report: &mut ApplyReport,
    resolved: &ResolutionTable,
) -> Result<(), EngineError> {
    if let Some(path) = &options.fstab {
        fstab(plan, report, resolved)
            .write(path)
            .structured(write_error(path))?;
        info!("Wrote fstab to '{}'", path.display());
        report.written_files.push(path.clone());
    }

    if let Some(path) = &options.crypttab {
        crypttab(runner, plan, report, resolved)
            .write(path)
            .structured(write_error(path))?;
        info!("Wrote crypttab to '{}'", path.display());
        report.written_files.push(path.clone());
    }

    let has_raid = satisfied(plan, report).any(|e| e.kind() == EntryKind::Raid);
    if let (Some(path), true) = (&options.mdadm_conf, has_raid) {
        let arrays = mdadm::scan(runner).structured(write_error(path))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).structured(write_error(path))?;
        }
        std::fs::write(path, arrays).structured(write_error(path))?;
        info!("Wrote mdadm.conf to '{}'", path.display());
        report.written_files.push(path.clone());
    }

    Ok(())
}
