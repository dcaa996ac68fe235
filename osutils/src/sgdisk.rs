//! GPT partitioning with sgdisk. Sectors are 512 bytes.

use std::path::Path;

use anyhow::{Context, Error};
use log::info;

use crate::dependencies::{CommandRunner, Dependency};

/// Destroys the GPT and MBR data structures on the disk.
pub fn zap_all(runner: &dyn CommandRunner, disk: &Path) -> Result<(), Error> {
    Dependency::Sgdisk
        .cmd()
        .with_arg("--zap-all")
        .with_arg(disk)
        .run_and_check(runner)
        .with_context(|| format!("Failed to zap partition tables of '{}'", disk.display()))
}

/// Writes a new, empty GPT.
pub fn clear(runner: &dyn CommandRunner, disk: &Path) -> Result<(), Error> {
    info!("Creating GPT partition table on '{}'", disk.display());
    Dependency::Sgdisk
        .cmd()
        .with_arg("--clear")
        .with_arg(disk)
        .run_and_check(runner)
        .with_context(|| format!("Failed to create GPT on '{}'", disk.display()))
}

/// Creates partition `number` from `start` to `end` (inclusive). Without an
/// end the partition takes the largest free block.
pub fn new_partition(
    runner: &dyn CommandRunner,
    disk: &Path,
    number: u32,
    start: u64,
    end: Option<u64>,
    typecode: &str,
) -> Result<(), Error> {
    info!(
        "Creating partition {number} on '{}' at sector {start}",
        disk.display()
    );
    Dependency::Sgdisk
        .cmd()
        .with_arg("--new")
        .with_arg(format!("{number}:{start}:{}", end.unwrap_or(0)))
        .with_arg(format!("--typecode={number}:{typecode}"))
        .with_arg(disk)
        .run_and_check(runner)
        .with_context(|| {
            format!(
                "Failed to create partition {number} on '{}'",
                disk.display()
            )
        })
}

pub fn delete_partition(runner: &dyn CommandRunner, disk: &Path, number: u32) -> Result<(), Error> {
    info!("Deleting partition {number} of '{}'", disk.display());
    Dependency::Sgdisk
        .cmd()
        .with_arg("--delete")
        .with_arg(number.to_string())
        .with_arg(disk)
        .run_and_check(runner)
        .with_context(|| {
            format!(
                "Failed to delete partition {number} of '{}'",
                disk.display()
            )
        })
}
