use std::path::Path;

use anyhow::{Context, Error};
use log::info;

use crate::dependencies::{CommandRunner, Dependency};

/// Options of a new LUKS volume.
#[derive(Debug, Default, Clone, Copy)]
pub struct LuksOptions<'a> {
    pub cipher: Option<&'a str>,
    pub key_size: Option<u32>,
}

/// Initializes a LUKS header on `device`, unlocked by the key in `key_file`.
pub fn luks_format(
    runner: &dyn CommandRunner,
    device: &Path,
    key_file: &Path,
    options: LuksOptions,
) -> Result<(), Error> {
    info!("Encrypting '{}'", device.display());
    let mut command = Dependency::Cryptsetup.cmd();
    command.arg("luksFormat").arg("--batch-mode");
    if let Some(cipher) = options.cipher {
        command.arg(format!("--cipher={cipher}"));
    }
    if let Some(key_size) = options.key_size {
        command.arg(format!("--key-size={key_size}"));
    }
    command
        .arg(format!("--key-file={}", key_file.display()))
        .arg(device)
        .run_and_check(runner)
        .with_context(|| format!("Failed to format '{}' as LUKS volume", device.display()))
}

/// Opens the LUKS volume on `device` as `/dev/mapper/<name>`.
pub fn open(
    runner: &dyn CommandRunner,
    device: &Path,
    name: &str,
    key_file: &Path,
) -> Result<(), Error> {
    info!("Opening encrypted volume '{}' as '{name}'", device.display());
    Dependency::Cryptsetup
        .cmd()
        .with_arg("open")
        .with_arg("--type=luks")
        .with_arg(format!("--key-file={}", key_file.display()))
        .with_arg(device)
        .with_arg(name)
        .run_and_check(runner)
        .with_context(|| format!("Failed to open encrypted volume '{}'", device.display()))
}

/// Closes the mapping at `mapping`, e.g. `/dev/mapper/cryptroot`.
pub fn close(runner: &dyn CommandRunner, mapping: &Path) -> Result<(), Error> {
    info!("Closing encrypted volume '{}'", mapping.display());
    Dependency::Cryptsetup
        .cmd()
        .with_arg("close")
        .with_arg(mapping)
        .run_and_check(runner)
        .with_context(|| format!("Failed to close encrypted volume '{}'", mapping.display()))
}
