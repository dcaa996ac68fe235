use std::path::Path;

use anyhow::{Context, Error};
use log::info;

use crate::dependencies::{CommandRunner, Dependency};

/// Formats `backing` and `cache` and attaches them as one bcache device.
pub fn make(
    runner: &dyn CommandRunner,
    backing: &Path,
    cache: &Path,
    writeback: bool,
) -> Result<(), Error> {
    info!(
        "Creating bcache device from backing device '{}' and cache device '{}'",
        backing.display(),
        cache.display()
    );
    let mut command = Dependency::MakeBcache.cmd();
    command.arg("-B").arg(backing).arg("-C").arg(cache);
    if writeback {
        command.arg("--writeback");
    }
    command
        .run_and_check(runner)
        .with_context(|| format!("Failed to create bcache on '{}'", backing.display()))
}
