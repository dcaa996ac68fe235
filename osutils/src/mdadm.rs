use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dependencies::{CommandRunner, Dependency};

/// Parameters of a new array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateArray<'a> {
    pub raid_path: &'a Path,
    pub name: &'a str,
    /// mdadm level name, e.g. `raid1`.
    pub level: &'a str,
    pub metadata: &'a str,
    /// Active members, in declared order.
    pub devices: &'a [PathBuf],
    pub spares: &'a [PathBuf],
}

pub fn create(runner: &dyn CommandRunner, array: &CreateArray) -> Result<(), Error> {
    info!(
        "Creating RAID array '{}' ({}) from {} device(s)",
        array.raid_path.display(),
        array.level,
        array.devices.len()
    );

    let mut mdadm_command = Dependency::Mdadm.cmd();
    mdadm_command
        .arg("--create")
        .arg(array.raid_path)
        .arg("--run")
        .arg("--homehost=any")
        .arg(format!("--name={}", array.name))
        .arg(format!("--level={}", array.level))
        .arg(format!("--raid-devices={}", array.devices.len()))
        .arg(format!("--metadata={}", array.metadata));
    if !array.spares.is_empty() {
        mdadm_command.arg(format!("--spare-devices={}", array.spares.len()));
    }
    mdadm_command.args(array.devices).args(array.spares);

    mdadm_command.run_and_check(runner).with_context(|| {
        format!(
            "Failed to create RAID array '{}'",
            array.raid_path.display()
        )
    })
}

pub fn stop(runner: &dyn CommandRunner, raid_path: &Path) -> Result<(), Error> {
    info!("Stopping RAID array '{}'", raid_path.display());
    Dependency::Mdadm
        .cmd()
        .with_arg("--stop")
        .with_arg(raid_path)
        .run_and_check(runner)
        .with_context(|| format!("Failed to stop RAID array '{}'", raid_path.display()))
}

/// Removes the md superblock from a former array member.
pub fn zero_superblock(runner: &dyn CommandRunner, device: &Path) -> Result<(), Error> {
    Dependency::Mdadm
        .cmd()
        .with_arg("--zero-superblock")
        .with_arg(device)
        .run_and_check(runner)
        .with_context(|| format!("Failed to zero RAID superblock of '{}'", device.display()))
}

#[derive(Serialize, Deserialize, Clone, Debug, Hash, Eq, PartialEq, Default)]
pub struct MdadmDetail {
    pub raid_path: PathBuf,
    /// Array name without the home host prefix.
    pub name: Option<String>,
    pub level: String,
    pub uuid: String,
    pub devices: Vec<PathBuf>,
}

/// Details of every assembled array.
pub fn details(runner: &dyn CommandRunner) -> Result<Vec<MdadmDetail>, Error> {
    debug!("Getting details for all RAID arrays");

    let output = Dependency::Mdadm
        .cmd()
        .with_arg("--detail")
        .with_arg("--scan")
        .with_arg("--verbose")
        .output_and_check(runner)
        .context("Failed to run mdadm detail")?;

    mdadm_detail_to_struct(&output).context("Failed to parse mdadm detail")
}

/// ARRAY lines describing every assembled array, as written to mdadm.conf.
pub fn scan(runner: &dyn CommandRunner) -> Result<String, Error> {
    Dependency::Mdadm
        .cmd()
        .with_arg("--detail")
        .with_arg("--scan")
        .output_and_check(runner)
        .context("Failed to run mdadm scan")
}

fn mdadm_detail_to_struct(mdadm_output: &str) -> Result<Vec<MdadmDetail>, Error> {
    let mut mdadm_details = Vec::new();

    let array_regex = Regex::new(r"ARRAY\s+(/dev/md\S+)")?;
    let name_regex = Regex::new(r"(?:^|\s)name=(\S+)")?;
    let level_regex = Regex::new(r"(?:^|\s)level=(\w+)")?;
    let uuid_regex = Regex::new(r"(?:^|\s)UUID=([\da-zA-Z:]+)")?;
    let devices_regex = Regex::new(r"(?:^|\s)devices=([^=\s]+)")?;

    let mut current_mdadm_detail = MdadmDetail::default();

    for line in mdadm_output.lines() {
        if let Some(captures) = array_regex.captures(line) {
            current_mdadm_detail.raid_path = PathBuf::from(
                captures
                    .get(1)
                    .context("Failed to parse RAID path from details")?
                    .as_str(),
            );
        }
        if let Some(captures) = name_regex.captures(line) {
            let name = captures
                .get(1)
                .context("Failed to parse RAID name from details")?
                .as_str();
            current_mdadm_detail.name = Some(
                name.rsplit_once(':')
                    .map(|(_, name)| name)
                    .unwrap_or(name)
                    .to_string(),
            );
        }
        if let Some(captures) = level_regex.captures(line) {
            current_mdadm_detail.level = captures
                .get(1)
                .context("Failed to parse RAID level from details")?
                .as_str()
                .to_string();
        }
        if let Some(captures) = uuid_regex.captures(line) {
            current_mdadm_detail.uuid = captures
                .get(1)
                .context("Failed to parse RAID UUID from details")?
                .as_str()
                .to_string();
        }
        if let Some(captures) = devices_regex.captures(line) {
            current_mdadm_detail.devices = captures
                .get(1)
                .context("Failed to parse RAID devices from details")?
                .as_str()
                .split(',')
                .map(PathBuf::from)
                .collect();

            mdadm_details.push(std::mem::take(&mut current_mdadm_detail));
        }
    }

    Ok(mdadm_details)
}
