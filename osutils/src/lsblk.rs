use std::path::PathBuf;

use anyhow::{Context, Error};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::dependencies::{CommandRunner, Dependency};

/// Columns requested from lsblk.
const COLUMNS: &str = "NAME,TYPE,SIZE,SERIAL,PTTYPE,PKNAME,PARTN,START,FSTYPE,UUID,LABEL,MOUNTPOINT";

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct LsBlkOutput {
    pub blockdevices: Vec<BlockDevice>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct BlockDevice {
    pub name: PathBuf,
    /// disk, part, raid1, lvm, crypt, ...
    #[serde(rename = "type")]
    pub device_type: String,
    pub size: u64,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(rename = "pttype", default)]
    pub partition_table_type: Option<String>,
    #[serde(rename = "pkname", default)]
    pub parent_kernel_name: Option<PathBuf>,
    #[serde(rename = "partn", default)]
    pub partition_number: Option<u32>,
    /// First sector, for partitions.
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub fstype: Option<String>,
    #[serde(rename = "uuid", default)]
    pub fs_uuid: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub mountpoint: Option<PathBuf>,
    #[serde(default)]
    pub children: Option<Vec<BlockDevice>>,
}

/// Lists every block device as a tree of holders.
pub fn list(runner: &dyn CommandRunner) -> Result<Vec<BlockDevice>, Error> {
    let result = Dependency::Lsblk
        .cmd()
        .with_arg("--json")
        .with_arg("--path")
        .with_arg("--bytes")
        .with_arg("--output")
        .with_arg(COLUMNS)
        .output_and_check(runner)
        .context("Failed execute lsblk")?;

    let parsed = parse_lsblk_output(result.as_str());
    if parsed.is_err() {
        warn!("lsblk output: {}", result);
    }

    parsed
}

fn parse_lsblk_output(output: &str) -> Result<Vec<BlockDevice>, Error> {
    let parsed: LsBlkOutput =
        serde_json::from_str(output).context("Failed to parse lsblk output")?;

    Ok(parsed.blockdevices)
}
