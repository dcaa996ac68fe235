//! LVM tools. Reports are read with `--reportformat json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::{debug, info};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::dependencies::{Command, CommandRunner, Dependency};

/// pvremove exits with this status when the device holds no PV label.
const PVREMOVE_NO_LABEL_STATUS: i32 = 5;

pub fn vgcreate(runner: &dyn CommandRunner, name: &str, devices: &[PathBuf]) -> Result<(), Error> {
    info!(
        "Creating volume group '{name}' from {} physical volume(s)",
        devices.len()
    );
    Dependency::Vgcreate
        .cmd()
        .with_arg("--force")
        .with_arg("--zero=y")
        .with_arg("--yes")
        .with_arg(name)
        .args(devices)
        .run_and_check(runner)
        .with_context(|| format!("Failed to create volume group '{name}'"))
}

/// Creates a logical volume of `size` bytes, or using all free space in the
/// group.
pub fn lvcreate(
    runner: &dyn CommandRunner,
    volgroup: &str,
    name: &str,
    size: Option<u64>,
) -> Result<(), Error> {
    info!("Creating logical volume '{volgroup}/{name}'");
    let mut command = Dependency::Lvcreate.cmd();
    command
        .arg(volgroup)
        .arg("--yes")
        .arg("--wipesignatures=y")
        .arg(format!("--name={name}"));
    match size {
        Some(size) => command.arg(format!("--size={size}B")),
        None => command.arg("--extents=100%FREE"),
    };

    command
        .run_and_check(runner)
        .with_context(|| format!("Failed to create logical volume '{volgroup}/{name}'"))
}

/// Removes the PV label from a device. A device without a label is not an
/// error.
pub fn pvremove(runner: &dyn CommandRunner, device: &Path) -> Result<(), Error> {
    info!("Removing LVM physical volume label from '{}'", device.display());
    Dependency::Pvremove
        .cmd()
        .with_arg("--force")
        .with_arg("--force")
        .with_arg("--yes")
        .with_arg(device)
        .run_allowing(runner, &[PVREMOVE_NO_LABEL_STATUS])
        .with_context(|| format!("Failed to remove PV label from '{}'", device.display()))?;
    Ok(())
}

/// Deactivates every logical volume of the group.
pub fn deactivate(runner: &dyn CommandRunner, volgroup: &str) -> Result<(), Error> {
    Dependency::Vgchange
        .cmd()
        .with_arg("--activate=n")
        .with_arg(volgroup)
        .run_and_check(runner)
        .with_context(|| format!("Failed to deactivate volume group '{volgroup}'"))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VolumeGroup {
    pub vg_name: String,
    /// Allocation unit of the group in bytes.
    #[serde(deserialize_with = "deserialize_size")]
    pub vg_extent_size: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PhysicalVolume {
    pub pv_name: PathBuf,
    /// Empty when the PV is not part of a group.
    #[serde(default)]
    pub vg_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogicalVolume {
    pub lv_name: String,
    pub vg_name: String,
    pub lv_path: PathBuf,
    /// Size in bytes.
    #[serde(deserialize_with = "deserialize_size")]
    pub lv_size: u64,
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let size = String::deserialize(deserializer)?;
    size.trim_end_matches('B')
        .parse()
        .map_err(|e| serde::de::Error::custom(format!("invalid size '{size}': {e}")))
}

#[derive(Deserialize)]
struct Report<T> {
    report: Vec<T>,
}

#[derive(Deserialize)]
struct VgSection {
    vg: Vec<VolumeGroup>,
}

#[derive(Deserialize)]
struct PvSection {
    pv: Vec<PhysicalVolume>,
}

#[derive(Deserialize)]
struct LvSection {
    lv: Vec<LogicalVolume>,
}

fn report<T: DeserializeOwned>(
    runner: &dyn CommandRunner,
    mut command: Command,
    fields: &str,
) -> Result<Vec<T>, Error> {
    let output = command
        .arg("--reportformat=json")
        .arg("--units=b")
        .arg("--nosuffix")
        .arg(format!("--options={fields}"))
        .output_and_check(runner)
        .with_context(|| format!("Failed to run {}", command.dependency()))?;

    let parsed: Report<T> = serde_json::from_str(&output)
        .with_context(|| format!("Failed to parse {} output", command.dependency()))?;
    Ok(parsed.report)
}

pub fn volume_groups(runner: &dyn CommandRunner) -> Result<Vec<VolumeGroup>, Error> {
    debug!("Listing LVM volume groups");
    Ok(report::<VgSection>(
        runner,
        Dependency::Vgs.cmd(),
        "vg_name,vg_extent_size",
    )?
        .into_iter()
        .flat_map(|section| section.vg)
        .collect())
}

pub fn physical_volumes(runner: &dyn CommandRunner) -> Result<Vec<PhysicalVolume>, Error> {
    debug!("Listing LVM physical volumes");
    Ok(
        report::<PvSection>(runner, Dependency::Pvs.cmd(), "pv_name,vg_name")?
            .into_iter()
            .flat_map(|section| section.pv)
            .collect(),
    )
}

pub fn logical_volumes(runner: &dyn CommandRunner) -> Result<Vec<LogicalVolume>, Error> {
    debug!("Listing LVM logical volumes");
    Ok(report::<LvSection>(
        runner,
        Dependency::Lvs.cmd(),
        "lv_name,vg_name,lv_path,lv_size",
    )?
    .into_iter()
    .flat_map(|section| section.lv)
    .collect())
}
