use std::path::Path;

use anyhow::{Context, Error};
use log::info;

use crate::dependencies::{CommandRunner, Dependency};

/// Mounts the block device at `path` to `mount_dir`.
pub fn mount(
    runner: &dyn CommandRunner,
    path: &Path,
    mount_dir: &Path,
    filesystem: &str,
    options: &str,
) -> Result<(), Error> {
    info!(
        "Mounting '{}' at '{}'",
        path.display(),
        mount_dir.display()
    );
    Dependency::Mount
        .cmd()
        .with_arg("-t")
        .with_arg(filesystem)
        .with_arg("-o")
        .with_arg(options)
        .with_arg(path)
        .with_arg(mount_dir)
        .run_and_check(runner)
        .with_context(|| {
            format!(
                "Failed to mount {} to path {}",
                path.display(),
                mount_dir.display(),
            )
        })
}
