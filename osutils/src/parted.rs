//! msdos partitioning with parted. Geometry is passed in 512-byte sectors so
//! that parted does not realign anything.

use std::path::Path;

use anyhow::{Context, Error};
use log::info;

use crate::dependencies::{Command, CommandRunner, Dependency};

fn parted(disk: &Path) -> Command {
    Dependency::Parted
        .cmd()
        .with_arg("--script")
        .with_arg(disk)
}

/// Writes a new, empty partition table of the given parted label type.
pub fn mklabel(runner: &dyn CommandRunner, disk: &Path, label: &str) -> Result<(), Error> {
    info!("Creating {label} partition table on '{}'", disk.display());
    parted(disk)
        .with_arg("mklabel")
        .with_arg(label)
        .run_and_check(runner)
        .with_context(|| format!("Failed to create {label} partition table on '{}'", disk.display()))
}

/// Creates a partition of `part_type` (primary, extended or logical). Without
/// an end the partition extends to the end of the disk.
pub fn mkpart(
    runner: &dyn CommandRunner,
    disk: &Path,
    part_type: &str,
    start: u64,
    end: Option<u64>,
) -> Result<(), Error> {
    info!(
        "Creating {part_type} partition on '{}' at sector {start}",
        disk.display()
    );
    parted(disk)
        .with_arg("unit")
        .with_arg("s")
        .with_arg("mkpart")
        .with_arg(part_type)
        .with_arg(format!("{start}s"))
        .with_arg(match end {
            Some(end) => format!("{end}s"),
            None => "100%".into(),
        })
        .run_and_check(runner)
        .with_context(|| format!("Failed to create {part_type} partition on '{}'", disk.display()))
}

pub fn set_flag(runner: &dyn CommandRunner, disk: &Path, number: u32, flag: &str) -> Result<(), Error> {
    parted(disk)
        .with_arg("set")
        .with_arg(number.to_string())
        .with_arg(flag)
        .with_arg("on")
        .run_and_check(runner)
        .with_context(|| {
            format!(
                "Failed to set flag '{flag}' on partition {number} of '{}'",
                disk.display()
            )
        })
}

pub fn rm(runner: &dyn CommandRunner, disk: &Path, number: u32) -> Result<(), Error> {
    info!("Deleting partition {number} of '{}'", disk.display());
    parted(disk)
        .with_arg("rm")
        .with_arg(number.to_string())
        .run_and_check(runner)
        .with_context(|| format!("Failed to delete partition {number} of '{}'", disk.display()))
}

/// Asks the kernel to re-read the partition table.
pub fn partprobe(runner: &dyn CommandRunner, disk: &Path) -> Result<(), Error> {
    Dependency::Partprobe
        .cmd()
        .with_arg(disk)
        .run_and_check(runner)
        .with_context(|| format!("Failed to re-read partition table of '{}'", disk.display()))
}

#[cfg(test)]
mod tests {
    use crate::testutils::MockRunner;

    use super::*;

    #[test]
    fn test_mkpart() {
        let runner = MockRunner::new();
        let disk = Path::new("/dev/sdb");
        mklabel(&runner, disk, "msdos").unwrap();
        mkpart(&runner, disk, "primary", 2048, Some(2099199)).unwrap();
        mkpart(&runner, disk, "extended", 2099200, None).unwrap();
        set_flag(&runner, disk, 1, "boot").unwrap();
        rm(&runner, disk, 2).unwrap();
        partprobe(&runner, disk).unwrap();

        assert_eq!(
            runner.calls(),
            [
                "parted --script /dev/sdb mklabel msdos",
                "parted --script /dev/sdb unit s mkpart primary 2048s 2099199s",
                "parted --script /dev/sdb unit s mkpart extended 2099200s 100%",
                "parted --script /dev/sdb set 1 boot on",
                "parted --script /dev/sdb rm 2",
                "partprobe /dev/sdb",
            ]
        );
    }
}
