use std::path::Path;

use anyhow::{Context, Error};
use log::info;

use crate::dependencies::{CommandRunner, Dependency};

/// Erases every filesystem, RAID, LVM and partition table signature on the
/// device.
pub fn all(runner: &dyn CommandRunner, device_path: &Path) -> Result<(), Error> {
    info!("Wiping signatures from '{}'", device_path.display());
    Dependency::Wipefs
        .cmd()
        .with_arg("--all")
        .with_arg("--force")
        .with_arg(device_path)
        .run_and_check(runner)
        .with_context(|| format!("Failed to wipe signatures from '{}'", device_path.display()))
}
