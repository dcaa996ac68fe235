use std::path::PathBuf;

use log::debug;

use blockmeta_api::{
    config::Disk,
    status::{HandlerFailure, Operation, StepError},
};

use super::{partition, wipe, HandlerContext, ProbeOutcome, Resolution};

/// Finds the disk on the system, by serial when one is declared.
fn resolve(ctx: &HandlerContext, disk: &Disk) -> Result<PathBuf, StepError> {
    if let Some(serial) = &disk.serial {
        if let Some(device) = ctx.inventory.disk_by_serial(serial) {
            debug!(
                "Disk '{}' with serial '{serial}' is '{}'",
                disk.id,
                device.path.display()
            );
            return Ok(device.path.clone());
        }
        if disk.path.is_none() {
            return Err(StepError::new(
                Operation::Resolve,
                HandlerFailure::DeviceNotFound {
                    reason: format!("no disk has serial '{serial}'"),
                },
            ));
        }
    }

    match &disk.path {
        Some(path) if ctx.inventory.device(path).is_some() => Ok(path.clone()),
        Some(path) => Err(StepError::new(
            Operation::Resolve,
            HandlerFailure::DeviceNotFound {
                reason: format!("'{}' does not exist", path.display()),
            },
        )),
        None => Err(StepError::new(
            Operation::Resolve,
            HandlerFailure::Internal {
                reason: format!("Disk '{}' declares neither serial nor path", disk.id),
            },
        )),
    }
}

pub(super) fn probe(ctx: &HandlerContext, disk: &Disk) -> Result<ProbeOutcome, StepError> {
    let path = resolve(ctx, disk)?;
    let observed = ctx
        .inventory
        .device(&path)
        .and_then(|device| device.ptable.clone());
    let existing = ctx.inventory.partitions_of(&path);

    let Some(ptable) = disk.ptable else {
        // Used whole, so any partition table is in the way.
        return Ok(match observed {
            Some(observed) => ProbeOutcome::Conflict(format!(
                "'{}' has a {observed} partition table but none is declared",
                path.display()
            )),
            None if !existing.is_empty() => ProbeOutcome::Conflict(format!(
                "'{}' has partitions but no partition table is declared",
                path.display()
            )),
            None => ProbeOutcome::Satisfied(Some(Resolution::node(path))),
        });
    };

    let Some(observed) = observed else {
        return Ok(ProbeOutcome::Missing);
    };
    if !ptable.matches_observed(&observed) {
        return Ok(ProbeOutcome::Conflict(format!(
            "'{}' has a {observed} partition table, expected {ptable}",
            path.display()
        )));
    }
    let declared = ctx.plan.partitions_of(&disk.id);
    if existing.is_empty() && !declared.is_empty() {
        return Ok(ProbeOutcome::Missing);
    }

    let missing = declared
        .into_iter()
        .filter_map(|p| ctx.plan.layout().get(&p.id))
        .filter(|geometry| {
            !existing
                .iter()
                .any(|e| e.partition_number == Some(geometry.number))
        })
        .map(|geometry| geometry.number.to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Ok(ProbeOutcome::Conflict(format!(
            "the partition table of '{}' lacks partition(s) {}",
            path.display(),
            missing.join(", ")
        )));
    }

    Ok(ProbeOutcome::Satisfied(Some(Resolution::node(path))))
}

/// Wipes the disk if asked to and writes the declared partition table.
pub(super) fn create(ctx: &HandlerContext, disk: &Disk) -> Result<Resolution, StepError> {
    let path = resolve(ctx, disk)?;

    if let Some(mode) = disk.wipe {
        wipe::release_holders(ctx, &path)?;
        wipe::wipe(ctx, &path, mode)?;
    }

    if let Some(ptable) = disk.ptable {
        partition::create_table(ctx, &path, ptable)?;
    }

    ctx.settle()?;
    Ok(Resolution::node(path))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use indoc::indoc;

    use blockmeta_api::config::StorageEntry;

    use super::{super::test_utils::*, *};

    fn disk(fixture: &Fixture, id: &str) -> Disk {
        match fixture.entry(id) {
            StorageEntry::Disk(disk) => disk.clone(),
            other => panic!("not a disk: {other:?}"),
        }
    }

    const DOCUMENT: &str = indoc! {r#"
        version: 1
        config:
          - {type: disk, id: sda, serial: QM00001, ptable: gpt, wipe: superblock}
          - {type: partition, id: sda1, device: sda, size: 1G}
          - {type: partition, id: sda2, device: sda, size: 1G}
          - {type: disk, id: sdb, path: /dev/sdb}
          - {type: disk, id: sdc, serial: QM00003, path: /dev/sdc}
    "#};

    #[test]
    fn test_resolve() {
        let fixture = Fixture::new(DOCUMENT, EMPTY_DISKS);
        let ctx = fixture.ctx();

        assert_eq!(
            resolve(&ctx, &disk(&fixture, "sda")).unwrap(),
            Path::new("/dev/sda")
        );
        assert_eq!(
            resolve(&ctx, &disk(&fixture, "sdb")).unwrap(),
            Path::new("/dev/sdb")
        );

        let error = resolve(&ctx, &disk(&fixture, "sdc")).unwrap_err();
        assert_eq!(error.operation, Operation::Resolve);
        assert_eq!(
            error.failure,
            HandlerFailure::DeviceNotFound {
                reason: "'/dev/sdc' does not exist".into()
            }
        );
    }

    #[test]
    fn test_probe() {
        let fixture = Fixture::new(DOCUMENT, EMPTY_DISKS);
        let ctx = fixture.ctx();
        assert_eq!(
            probe(&ctx, &disk(&fixture, "sda")).unwrap(),
            ProbeOutcome::Missing
        );
        assert_eq!(
            probe(&ctx, &disk(&fixture, "sdb")).unwrap(),
            ProbeOutcome::Satisfied(Some(Resolution::node("/dev/sdb")))
        );

        let fixture = Fixture::new(
            DOCUMENT,
            indoc! {r#"
                block_devices:
                  - {path: /dev/sda, device_type: disk, serial: QM00001, ptable: gpt}
                  - {path: /dev/sda1, device_type: part, parents: [/dev/sda], partition_number: 1}
                  - {path: /dev/sdb, device_type: disk, ptable: dos}
            "#},
        );
        let ctx = fixture.ctx();
        assert_eq!(
            probe(&ctx, &disk(&fixture, "sda")).unwrap(),
            ProbeOutcome::Conflict(
                "the partition table of '/dev/sda' lacks partition(s) 2".into()
            )
        );
        assert_eq!(
            probe(&ctx, &disk(&fixture, "sdb")).unwrap(),
            ProbeOutcome::Conflict(
                "'/dev/sdb' has a dos partition table but none is declared".into()
            )
        );
    }

    #[test]
    fn test_labelled_disk_without_partitions() {
        let document = indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda, ptable: gpt}
        "#};
        let fixture = Fixture::new(
            document,
            indoc! {r#"
                block_devices:
                  - {path: /dev/sda, device_type: disk, ptable: gpt}
            "#},
        );
        assert_eq!(
            probe(&fixture.ctx(), &disk(&fixture, "sda")).unwrap(),
            ProbeOutcome::Satisfied(Some(Resolution::node("/dev/sda")))
        );

        // A disk without any table still needs one.
        let fixture = Fixture::new(document, EMPTY_DISKS);
        assert_eq!(
            probe(&fixture.ctx(), &disk(&fixture, "sda")).unwrap(),
            ProbeOutcome::Missing
        );
    }

    #[test]
    fn test_create() {
        let fixture = Fixture::new(DOCUMENT, EMPTY_DISKS);
        let resolution = create(&fixture.ctx(), &disk(&fixture, "sda")).unwrap();

        assert_eq!(resolution, Resolution::node("/dev/sda"));
        assert_eq!(
            fixture.runner.calls(),
            [
                "wipefs --all --force /dev/sda",
                "sgdisk --zap-all /dev/sda",
                "sgdisk --clear /dev/sda",
                "udevadm settle --timeout=120",
            ]
        );
    }
}
