use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use blockmeta_api::{
    config::{LvmPartition, LvmVolgroup, StorageEntry},
    status::{DeviceHandle, HandlerFailure, Operation, StepError},
};
use osutils::lvm;

use super::{HandlerContext, ProbeOutcome, Resolution, StepResultExt};

/// LVM's default extent size, used when the group's is not known.
const DEFAULT_EXTENT_SIZE: u64 = 4 * 1024 * 1024;

fn volgroup_resolution(name: &str) -> Resolution {
    Resolution {
        handle: DeviceHandle::VolumeGroup(name.into()),
        fs_uuid: None,
    }
}

pub(super) fn probe_volgroup(
    ctx: &HandlerContext,
    volgroup: &LvmVolgroup,
) -> Result<ProbeOutcome, StepError> {
    let declared = ctx.device_paths(&volgroup.devices)?;
    let Some(existing) = ctx.inventory.volume_group(&volgroup.name) else {
        return Ok(ProbeOutcome::Missing);
    };

    let declared = declared.iter().map(PathBuf::as_path).collect::<BTreeSet<_>>();
    let observed = existing
        .physical_volumes
        .iter()
        .map(PathBuf::as_path)
        .collect::<BTreeSet<&Path>>();
    if declared != observed {
        return Ok(ProbeOutcome::Conflict(format!(
            "volume group '{}' is made of {}",
            volgroup.name,
            observed
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    Ok(ProbeOutcome::Satisfied(Some(volgroup_resolution(
        &volgroup.name,
    ))))
}

pub(super) fn create_volgroup(
    ctx: &HandlerContext,
    volgroup: &LvmVolgroup,
) -> Result<Resolution, StepError> {
    let devices = ctx.device_paths(&volgroup.devices)?;
    lvm::vgcreate(ctx.runner, &volgroup.name, &devices).step(Operation::CreateVolumeGroup)?;
    ctx.settle()?;
    Ok(volgroup_resolution(&volgroup.name))
}

/// Name of the volume group holding `volume`.
fn volgroup_name<'a>(
    ctx: &'a HandlerContext,
    volume: &LvmPartition,
) -> Result<&'a str, StepError> {
    match ctx.entry(&volume.volgroup)? {
        StorageEntry::LvmVolgroup(volgroup) => Ok(&volgroup.name),
        other => Err(StepError::new(
            Operation::Resolve,
            HandlerFailure::Internal {
                reason: format!("{} is not a volume group", other.describe()),
            },
        )),
    }
}

pub(super) fn probe_logical_volume(
    ctx: &HandlerContext,
    volume: &LvmPartition,
) -> Result<ProbeOutcome, StepError> {
    let volgroup = volgroup_name(ctx, volume)?;
    let Some(existing) = ctx.inventory.logical_volume(volgroup, &volume.name) else {
        return Ok(ProbeOutcome::Missing);
    };

    if let Some(size) = volume.size {
        // lvcreate rounds the requested size up to whole extents.
        let extent_size = ctx
            .inventory
            .volume_group(volgroup)
            .map(|vg| vg.extent_size)
            .filter(|&extent_size| extent_size > 0)
            .unwrap_or(DEFAULT_EXTENT_SIZE);
        let expected = (size.bytes() + extent_size - 1) / extent_size * extent_size;
        if existing.size != expected {
            return Ok(ProbeOutcome::Conflict(format!(
                "logical volume '{volgroup}/{}' is {} bytes, expected {expected}",
                volume.name, existing.size,
            )));
        }
    }

    Ok(ProbeOutcome::Satisfied(Some(Resolution::node(
        existing.path.clone(),
    ))))
}

pub(super) fn create_logical_volume(
    ctx: &HandlerContext,
    volume: &LvmPartition,
) -> Result<Resolution, StepError> {
    let volgroup = volgroup_name(ctx, volume)?;
    lvm::lvcreate(
        ctx.runner,
        volgroup,
        &volume.name,
        volume.size.map(|size| size.bytes()),
    )
    .step(Operation::CreateLogicalVolume)?;

    let path = Path::new("/dev").join(volgroup).join(&volume.name);
    ctx.wait_for_device(&path)?;
    Ok(Resolution::node(path))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{super::test_utils::*, *};

    const DOCUMENT: &str = indoc! {r#"
        version: 1
        config:
          - {type: disk, id: sda, path: /dev/sda}
          - {type: disk, id: sdb, path: /dev/sdb}
          - {type: lvm_volgroup, id: vg0, name: vg0, devices: [sda, sdb]}
          - {type: lvm_partition, id: root, name: root, volgroup: vg0, size: 10G}
          - {type: lvm_partition, id: home, name: home, volgroup: vg0}
    "#};

    fn lvm_fixture(inventory: &str) -> Fixture {
        let mut fixture = Fixture::new(DOCUMENT, inventory);
        fixture.resolve("sda", "/dev/sda").resolve("sdb", "/dev/sdb");
        fixture
    }

    fn volgroup(fixture: &Fixture) -> LvmVolgroup {
        match fixture.entry("vg0") {
            StorageEntry::LvmVolgroup(volgroup) => volgroup.clone(),
            other => panic!("not a volume group: {other:?}"),
        }
    }

    fn volume(fixture: &Fixture, id: &str) -> LvmPartition {
        match fixture.entry(id) {
            StorageEntry::LvmPartition(volume) => volume.clone(),
            other => panic!("not a logical volume: {other:?}"),
        }
    }

    #[test]
    fn test_create() {
        let fixture = lvm_fixture(EMPTY_DISKS);
        let ctx = fixture.ctx();

        assert_eq!(
            create_volgroup(&ctx, &volgroup(&fixture)).unwrap(),
            volgroup_resolution("vg0")
        );
        assert_eq!(
            create_logical_volume(&ctx, &volume(&fixture, "root")).unwrap(),
            Resolution::node("/dev/vg0/root")
        );
        create_logical_volume(&ctx, &volume(&fixture, "home")).unwrap();

        assert_eq!(
            fixture.runner.mutating_calls(),
            [
                "vgcreate --force --zero=y --yes vg0 /dev/sda /dev/sdb",
                "lvcreate vg0 --yes --wipesignatures=y --name=root --size=10737418240B",
                "lvcreate vg0 --yes --wipesignatures=y --name=home --extents=100%FREE",
            ]
        );
    }

    #[test]
    fn test_probe() {
        let fixture = lvm_fixture(indoc! {r#"
            volume_groups:
              - {name: vg0, physical_volumes: [/dev/sdb, /dev/sda]}
            logical_volumes:
              - {name: root, volume_group: vg0, path: /dev/vg0/root, size: 5368709120}
        "#});
        let ctx = fixture.ctx();

        assert_eq!(
            probe_volgroup(&ctx, &volgroup(&fixture)).unwrap(),
            ProbeOutcome::Satisfied(Some(volgroup_resolution("vg0")))
        );
        assert_eq!(
            probe_logical_volume(&ctx, &volume(&fixture, "root")).unwrap(),
            ProbeOutcome::Conflict(
                "logical volume 'vg0/root' is 5368709120 bytes, expected 10737418240".into()
            )
        );
        assert_eq!(
            probe_logical_volume(&ctx, &volume(&fixture, "home")).unwrap(),
            ProbeOutcome::Missing
        );

        let fixture = lvm_fixture(indoc! {r#"
            volume_groups:
              - {name: vg0, physical_volumes: [/dev/sda]}
        "#});
        assert_eq!(
            probe_volgroup(&fixture.ctx(), &volgroup(&fixture)).unwrap(),
            ProbeOutcome::Conflict("volume group 'vg0' is made of /dev/sda".into())
        );
    }

    #[test]
    fn test_logical_volume_size_rounds_to_extents() {
        let document = indoc! {r#"
            version: 1
            config:
              - {type: disk, id: sda, path: /dev/sda}
              - {type: lvm_volgroup, id: vg0, name: vg0, devices: [sda]}
              - {type: lvm_partition, id: swap, name: swap, volgroup: vg0, size: 10M}
        "#};
        let outcome = |inventory: &str| {
            let mut fixture = Fixture::new(document, inventory);
            fixture.resolve("sda", "/dev/sda");
            probe_logical_volume(&fixture.ctx(), &volume(&fixture, "swap")).unwrap()
        };

        // Extent size unknown: 10 MiB becomes three 4 MiB extents.
        assert_eq!(
            outcome(indoc! {r#"
                volume_groups:
                  - {name: vg0, physical_volumes: [/dev/sda]}
                logical_volumes:
                  - {name: swap, volume_group: vg0, path: /dev/vg0/swap, size: 12582912}
            "#}),
            ProbeOutcome::Satisfied(Some(Resolution::node("/dev/vg0/swap")))
        );
        assert_eq!(
            outcome(indoc! {r#"
                volume_groups:
                  - {name: vg0, physical_volumes: [/dev/sda], extent_size: 8388608}
                logical_volumes:
                  - {name: swap, volume_group: vg0, path: /dev/vg0/swap, size: 16777216}
            "#}),
            ProbeOutcome::Satisfied(Some(Resolution::node("/dev/vg0/swap")))
        );
        assert_eq!(
            outcome(indoc! {r#"
                volume_groups:
                  - {name: vg0, physical_volumes: [/dev/sda], extent_size: 8388608}
                logical_volumes:
                  - {name: swap, volume_group: vg0, path: /dev/vg0/swap, size: 12582912}
            "#}),
            ProbeOutcome::Conflict(
                "logical volume 'vg0/swap' is 12582912 bytes, expected 16777216".into()
            )
        );
    }
}
