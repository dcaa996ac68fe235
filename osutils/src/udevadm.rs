use std::path::Path;

use anyhow::{Context, Error};

use crate::dependencies::{CommandRunner, Dependency};

/// Waits for the udev event queue to drain.
pub fn settle(runner: &dyn CommandRunner, timeout_secs: u64) -> Result<(), Error> {
    Dependency::Udevadm
        .cmd()
        .with_arg("settle")
        .with_arg(format!("--timeout={timeout_secs}"))
        .run_and_check(runner)
        .context("Failed settle udev setup")
}

/// Waits until udev has processed the device node at `path`.
pub fn wait(runner: &dyn CommandRunner, path: &Path, timeout_secs: u64) -> Result<(), Error> {
    Dependency::Udevadm
        .cmd()
        .with_arg("wait")
        .with_arg("--settle")
        .with_arg(format!("--timeout={timeout_secs}"))
        .with_arg(path)
        .run_and_check(runner)
        .with_context(|| format!("Failed wait udev for '{}'", path.display()))
}
