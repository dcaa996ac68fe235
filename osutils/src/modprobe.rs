use anyhow::{Context, Error};

use crate::dependencies::{CommandRunner, Dependency};

pub fn load(runner: &dyn CommandRunner, module: &str) -> Result<(), Error> {
    Dependency::Modprobe
        .cmd()
        .with_arg(module)
        .run_and_check(runner)
        .with_context(|| format!("Failed to load kernel module '{module}'"))
}
