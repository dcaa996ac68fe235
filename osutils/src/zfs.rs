use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use log::{debug, info};

use crate::dependencies::{CommandRunner, Dependency};

/// Pool properties used unless the declaration overrides them.
pub const ZPOOL_DEFAULT_PROPERTIES: [(&str, &str); 2] = [("ashift", "12"), ("version", "28")];

/// Filesystem properties of the root dataset used unless the declaration
/// overrides them.
pub const ZFS_DEFAULT_PROPERTIES: [(&str, &str); 3] = [
    ("atime", "off"),
    ("canmount", "off"),
    ("normalization", "formD"),
];

/// Parameters of a new pool.
#[derive(Debug, Clone, Default)]
pub struct CreatePool<'a> {
    pub name: &'a str,
    pub vdevs: &'a [PathBuf],
    pub mountpoint: Option<&'a Path>,
    /// Alternate root the pool is imported under.
    pub altroot: Option<&'a Path>,
    pub pool_properties: BTreeMap<String, String>,
    pub fs_properties: BTreeMap<String, String>,
}

fn merge_defaults(
    defaults: &[(&str, &str)],
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = defaults
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>();
    merged.extend(overrides.clone());
    merged
}

pub fn zpool_create(runner: &dyn CommandRunner, pool: &CreatePool) -> Result<(), Error> {
    info!(
        "Creating zpool '{}' from {} vdev(s)",
        pool.name,
        pool.vdevs.len()
    );

    let mut command = Dependency::Zpool.cmd();
    command.arg("create");
    for (key, value) in merge_defaults(&ZPOOL_DEFAULT_PROPERTIES, &pool.pool_properties) {
        command.arg("-o").arg(format!("{key}={value}"));
    }
    for (key, value) in merge_defaults(&ZFS_DEFAULT_PROPERTIES, &pool.fs_properties) {
        command.arg("-O").arg(format!("{key}={value}"));
    }
    if let Some(mountpoint) = pool.mountpoint {
        command
            .arg("-O")
            .arg(format!("mountpoint={}", mountpoint.display()));
    }
    if let Some(altroot) = pool.altroot {
        command.arg("-R").arg(altroot);
    }
    command.arg(pool.name).args(pool.vdevs);

    command
        .run_and_check(runner)
        .with_context(|| format!("Failed to create zpool '{}'", pool.name))
}

/// Creates dataset `volume` in `pool`.
pub fn zfs_create(
    runner: &dyn CommandRunner,
    pool: &str,
    volume: &str,
    properties: &BTreeMap<String, String>,
) -> Result<(), Error> {
    let dataset = dataset_name(pool, volume);
    info!("Creating zfs dataset '{dataset}'");

    let mut command = Dependency::Zfs.cmd();
    command.arg("create");
    for (key, value) in properties {
        command.arg("-o").arg(format!("{key}={value}"));
    }
    command
        .arg(&dataset)
        .run_and_check(runner)
        .with_context(|| format!("Failed to create zfs dataset '{dataset}'"))?;

    if properties.get("canmount").is_some_and(|v| v == "noauto") {
        Dependency::Zfs
            .cmd()
            .with_arg("mount")
            .with_arg(&dataset)
            .run_and_check(runner)
            .with_context(|| format!("Failed to mount zfs dataset '{dataset}'"))?;
    }

    Ok(())
}

/// Full dataset name of `volume` in `pool`.
pub fn dataset_name(pool: &str, volume: &str) -> String {
    format!("{pool}/{}", volume.trim_start_matches('/'))
}

/// An imported pool and the leaf devices it is made of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zpool {
    pub name: String,
    pub vdevs: Vec<PathBuf>,
}

/// Lists imported pools.
pub fn zpool_list(runner: &dyn CommandRunner) -> Result<Vec<Zpool>, Error> {
    debug!("Listing zpools");
    let output = Dependency::Zpool
        .cmd()
        .with_arg("list")
        .with_arg("-H")
        .with_arg("-P")
        .with_arg("-v")
        .with_arg("-o")
        .with_arg("name")
        .output_and_check(runner)
        .context("Failed to list zpools")?;

    Ok(parse_zpool_list(&output))
}

fn parse_zpool_list(output: &str) -> Vec<Zpool> {
    let mut pools: Vec<Zpool> = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        // Pools start at the beginning of the line, vdevs are indented.
        if !line.starts_with(char::is_whitespace) {
            pools.push(Zpool {
                name: line.trim().to_string(),
                vdevs: Vec::new(),
            });
            continue;
        }

        let vdev = line.trim();
        if let Some(pool) = pools.last_mut().filter(|_| vdev.starts_with('/')) {
            pool.vdevs.push(PathBuf::from(vdev));
        }
    }
    pools
}

/// Lists every dataset name.
pub fn zfs_list(runner: &dyn CommandRunner) -> Result<Vec<String>, Error> {
    debug!("Listing zfs datasets");
    let output = Dependency::Zfs
        .cmd()
        .with_arg("list")
        .with_arg("-H")
        .with_arg("-o")
        .with_arg("name")
        .output_and_check(runner)
        .context("Failed to list zfs datasets")?;

    Ok(output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}
