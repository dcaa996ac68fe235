use std::path::Path;

use anyhow::{Context, Error};

use crate::dependencies::{CommandRunner, Dependency};

fn run(runner: &dyn CommandRunner, device_path: &Path, tag: &str) -> Result<String, Error> {
    let output = Dependency::Blkid
        .cmd()
        .with_arg("-o") // output format
        .with_arg("value") // single value
        .with_arg("-s") // tag
        .with_arg(tag)
        .with_arg(device_path)
        .output_and_check(runner)
        .context("Failed to execute blkid")?;

    Ok(output.trim().to_owned())
}

/// UUID of the filesystem or container on the device.
pub fn get_filesystem_uuid(runner: &dyn CommandRunner, device_path: &Path) -> Result<String, Error> {
    let uuid = run(runner, device_path, "UUID")?;
    if uuid.is_empty() {
        anyhow::bail!("Device '{}' has no UUID", device_path.display());
    }
    Ok(uuid)
}
