use std::path::PathBuf;

use log::debug;

use blockmeta_api::{
    config::{FileSystemType, Format, Mount, StorageEntry},
    constants::DEFAULT_MOUNT_OPTIONS,
    status::{HandlerFailure, Operation, StepError},
};
use osutils::mount;

use super::{HandlerContext, ProbeOutcome, StepResultExt};

fn format_of<'a>(ctx: &'a HandlerContext, mount: &Mount) -> Result<&'a Format, StepError> {
    match ctx.entry(&mount.device)? {
        StorageEntry::Format(format) => Ok(format),
        other => Err(StepError::new(
            Operation::Resolve,
            HandlerFailure::Internal {
                reason: format!("{} is not a format", other.describe()),
            },
        )),
    }
}

/// Where the filesystem is mounted, under the target root.
fn mount_dir(ctx: &HandlerContext, mount: &Mount) -> Result<PathBuf, StepError> {
    let path = mount.path.as_deref().ok_or_else(|| {
        StepError::new(
            Operation::Resolve,
            HandlerFailure::Internal {
                reason: format!("Mount '{}' has no path", mount.id),
            },
        )
    })?;
    Ok(ctx.options.target_path(path))
}

pub(super) fn probe(ctx: &HandlerContext, mount: &Mount) -> Result<ProbeOutcome, StepError> {
    // Swap is only recorded in fstab.
    if format_of(ctx, mount)?.fstype == FileSystemType::Swap {
        return Ok(ProbeOutcome::Satisfied(None));
    }

    let device = ctx.device_path(&mount.device)?;
    let mount_dir = mount_dir(ctx, mount)?;
    Ok(match ctx.inventory.mount_at(&mount_dir) {
        Some(existing) if existing.source.as_deref() == Some(device) => {
            ProbeOutcome::Satisfied(None)
        }
        Some(existing) => ProbeOutcome::Conflict(format!(
            "'{}' is already mounted at '{}'",
            existing
                .source
                .as_ref()
                .map(|source| source.display().to_string())
                .unwrap_or_else(|| existing.fstype.clone()),
            mount_dir.display()
        )),
        None => ProbeOutcome::Missing,
    })
}

pub(super) fn create(ctx: &HandlerContext, mount: &Mount) -> Result<(), StepError> {
    let format = format_of(ctx, mount)?;
    if format.fstype == FileSystemType::Swap {
        debug!("Not mounting swap '{}'", mount.id);
        return Ok(());
    }

    let device = ctx.device_path(&mount.device)?;
    let mount_dir = mount_dir(ctx, mount)?;
    std::fs::create_dir_all(&mount_dir).map_err(|e| {
        StepError::new(
            Operation::Mount,
            HandlerFailure::CreateMountPoint {
                path: mount_dir.display().to_string(),
                reason: e.to_string(),
            },
        )
    })?;

    mount::mount(
        ctx.runner,
        device,
        &mount_dir,
        format.fstype.mount_name(),
        mount.options.as_deref().unwrap_or(DEFAULT_MOUNT_OPTIONS),
    )
    .step(Operation::Mount)
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
          - {type: format, id: sda-root, volume: sda, fstype: vfat}
          - {type: format, id: sdb-swap, volume: sdb, fstype: swap}
          - {type: mount, id: root-mount, device: sda-root, path: /boot/efi, options: "umask=0077"}
          - {type: mount, id: swap-mount, device: sdb-swap}
    "#};

    fn mount_fixture(inventory: &str) -> Fixture {
        let mut fixture = Fixture::new(DOCUMENT, inventory);
        fixture
            .resolve("sda-root", "/dev/sda")
            .resolve("sdb-swap", "/dev/sdb");
        fixture
    }

    fn mount(fixture: &Fixture, id: &str) -> Mount {
        match fixture.entry(id) {
            StorageEntry::Mount(mount) => mount.clone(),
            other => panic!("not a mount: {other:?}"),
        }
    }

    #[test]
    fn test_create() {
        let target = tempfile::tempdir().unwrap();
        let mut fixture = mount_fixture(EMPTY_DISKS);
        fixture.options.target = target.path().to_path_buf();
        let ctx = fixture.ctx();

        create(&ctx, &mount(&fixture, "root-mount")).unwrap();
        create(&ctx, &mount(&fixture, "swap-mount")).unwrap();

        assert!(target.path().join("boot/efi").is_dir());
        assert_eq!(
            fixture.runner.calls(),
            [format!(
                "mount -t vfat -o umask=0077 /dev/sda {}",
                target.path().join("boot/efi").display()
            )]
        );
    }

    #[test]
    fn test_create_mount_point_failure() {
        let target = tempfile::tempdir().unwrap();
        let blocker = target.path().join("boot");
        std::fs::write(&blocker, "").unwrap();

        let mut fixture = mount_fixture(EMPTY_DISKS);
        fixture.options.target = target.path().to_path_buf();

        let error = create(&fixture.ctx(), &mount(&fixture, "root-mount")).unwrap_err();
        assert_eq!(error.operation, Operation::Mount);
        assert!(matches!(
            error.failure,
            HandlerFailure::CreateMountPoint { ref path, .. } if path.ends_with("/boot/efi")
        ));
        assert!(fixture.runner.calls().is_empty());
    }

    #[test]
    fn test_probe() {
        let fixture = mount_fixture(EMPTY_DISKS);
        let ctx = fixture.ctx();
        assert_eq!(
            probe(&ctx, &mount(&fixture, "root-mount")).unwrap(),
            ProbeOutcome::Missing
        );
        assert_eq!(
            probe(&ctx, &mount(&fixture, "swap-mount")).unwrap(),
            ProbeOutcome::Satisfied(None)
        );

        let fixture = mount_fixture(indoc! {r#"
            mounts:
              - {target: /target/boot/efi, source: /dev/sda, fstype: vfat}
        "#});
        assert_eq!(
            probe(&fixture.ctx(), &mount(&fixture, "root-mount")).unwrap(),
            ProbeOutcome::Satisfied(None)
        );

        let fixture = mount_fixture(indoc! {r#"
            mounts:
              - {target: /target/boot/efi, fstype: tmpfs}
        "#});
        assert_eq!(
            probe(&fixture.ctx(), &mount(&fixture, "root-mount")).unwrap(),
            ProbeOutcome::Conflict("'tmpfs' is already mounted at '/target/boot/efi'".into())
        );
    }
}
