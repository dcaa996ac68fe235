use std::path::Path;

use anyhow::{Context, Error};
use log::info;
use strum_macros::IntoStaticStr;

use crate::dependencies::{CommandRunner, Dependency};

/// dd stops with this status once the output device is full.
const DEVICE_FULL_STATUS: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum FillSource {
    #[strum(serialize = "/dev/zero")]
    Zero,
    #[strum(serialize = "/dev/urandom")]
    Random,
}

/// Overwrites the whole device with data read from `source`.
pub fn fill(runner: &dyn CommandRunner, device_path: &Path, source: FillSource) -> Result<(), Error> {
    let source: &'static str = source.into();
    info!("Overwriting '{}' with {source}", device_path.display());
    Dependency::Dd
        .cmd()
        .with_arg(format!("if={source}"))
        .with_arg(format!("of={}", device_path.display()))
        .with_arg("bs=1M")
        .with_arg("conv=fsync")
        .run_allowing(runner, &[DEVICE_FULL_STATUS])
        .with_context(|| format!("Failed to overwrite '{}'", device_path.display()))?;
    Ok(())
}
