use std::path::Path;

use anyhow::{Context, Error};
use log::info;

use blockmeta_api::config::{FileSystemFamily, FileSystemType};

use crate::dependencies::{Command, CommandRunner, Dependency};

/// Builds the command creating a `fstype` filesystem on `device_path`.
/// Existing signatures are always overwritten.
pub fn command(
    device_path: &Path,
    fstype: FileSystemType,
    label: Option<&str>,
    uuid: Option<&str>,
) -> Command {
    let family = fstype.family();
    let mut command = match family {
        FileSystemFamily::Swap => Dependency::Mkswap.cmd(),
        _ => Dependency::Mkfs
            .cmd()
            .with_arg("--type")
            .with_arg(fstype.mount_name()),
    };

    command.arg(match family {
        FileSystemFamily::Ext => "-F",
        FileSystemFamily::Xfs => "-f",
        FileSystemFamily::Fat => "-I",
        FileSystemFamily::Btrfs | FileSystemFamily::Ntfs | FileSystemFamily::Swap => "--force",
    });

    if let Some(fat_size) = fstype.fat_size() {
        command.arg("-F").arg(fat_size.to_string());
    }

    if let Some(label) = label {
        command.arg(match family {
            FileSystemFamily::Ext | FileSystemFamily::Xfs => "-L",
            FileSystemFamily::Fat => "-n",
            FileSystemFamily::Btrfs | FileSystemFamily::Ntfs | FileSystemFamily::Swap => "--label",
        });
        command.arg(label);
    }

    if let Some(uuid) = uuid {
        match family {
            FileSystemFamily::Ext => command.arg("-U").arg(uuid),
            FileSystemFamily::Btrfs | FileSystemFamily::Swap => command.arg("--uuid").arg(uuid),
            FileSystemFamily::Xfs => command.arg("-m").arg(format!("uuid={uuid}")),
            FileSystemFamily::Fat => command.arg("-i").arg(uuid.replace('-', "")),
            // Rejected when the configuration is validated.
            FileSystemFamily::Ntfs => &mut command,
        };
    }

    command.arg(device_path);
    command
}

pub fn run(
    runner: &dyn CommandRunner,
    device_path: &Path,
    fstype: FileSystemType,
    label: Option<&str>,
    uuid: Option<&str>,
) -> Result<(), Error> {
    info!("Creating {fstype} filesystem on '{}'", device_path.display());
    command(device_path, fstype, label, uuid)
        .run_and_check(runner)
        .with_context(|| {
            format!(
                "Failed to create {fstype} filesystem on '{}'",
                device_path.display()
            )
        })
}
