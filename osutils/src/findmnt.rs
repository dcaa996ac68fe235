//! Module for interacting with the `findmnt` command.
//!
//! `findmnt --json` reads `/proc/self/mountinfo` and prints the mounted
//! filesystems as a tree, where each mount point lists the mounts below it in
//! its `children` field. The `FindMnt` structure represents that output with
//! the columns defined in `FINDMNT_COLUMNS`.
//!
//! The engine only needs to know what is mounted where, so the tree can be
//! flattened with `FindMnt::mounts`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::dependencies::{CommandRunner, Dependency};

/// Columns requested with `findmnt --json -o`.
pub const FINDMNT_COLUMNS: &str = "target,source,fstype,options";

/// Represents the output of `findmnt --json` as a Rust structure.
#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct FindMnt {
    pub filesystems: Vec<MountpointMetadata>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub struct MountpointMetadata {
    /// Mount target.
    pub target: PathBuf,

    /// Source device. Some virtual filesystems have none.
    pub source: Option<String>,

    /// Filesystem type.
    pub fstype: String,

    pub options: String,

    /// Mounts under this filesystem.
    #[serde(default)]
    pub children: Vec<MountpointMetadata>,
}

impl FindMnt {
    /// Runs `findmnt --json` and parses the output into a `FindMnt` structure.
    pub fn run(runner: &dyn CommandRunner) -> Result<Self, anyhow::Error> {
        let output = Dependency::Findmnt
            .cmd()
            .with_arg("--json")
            .with_arg("-o")
            .with_arg(FINDMNT_COLUMNS)
            .output_and_check(runner)
            .context("Failed to run findmnt")?;

        Self::from_json(&output).context("Failed to deserialize output of findmnt")
    }

    /// Parses a JSON string into a `FindMnt` structure.
    fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Every mount of the tree, parents before children.
    pub fn mounts(&self) -> Vec<&MountpointMetadata> {
        let mut mounts = Vec::new();
        let mut stack = self.filesystems.iter().rev().collect::<Vec<_>>();
        while let Some(mount) = stack.pop() {
            mounts.push(mount);
            stack.extend(mount.children.iter().rev());
        }
        mounts
    }
}

impl MountpointMetadata {
    /// Source device node, without the subvolume suffix findmnt adds for
    /// btrfs (`/dev/sda2[/@home]`).
    pub fn source_device(&self) -> Option<&Path> {
        let source = self.source.as_deref()?;
        if !source.starts_with('/') {
            return None;
        }
        Some(Path::new(
            source.split_once('[').map_or(source, |(device, _)| device),
        ))
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_mounts() {
        let findmnt = FindMnt::from_json(indoc! {r#"
            {
                "filesystems": [
                    {
                        "target": "/",
                        "source": "/dev/vda2",
                        "fstype": "ext4",
                        "options": "rw,relatime",
                        "children": [
                            {
                                "target": "/proc",
                                "source": "proc",
                                "fstype": "proc",
                                "options": "rw,nosuid,nodev,noexec,relatime"
                            },
                            {
                                "target": "/target",
                                "source": "/dev/sda2[/@]",
                                "fstype": "btrfs",
                                "options": "rw,relatime",
                                "children": [
                                    {
                                        "target": "/target/boot",
                                        "source": "/dev/sda1",
                                        "fstype": "ext4",
                                        "options": "rw,relatime"
                                    }
                                ]
                            }
                        ]
                    }
                ]
            }
        "#})
        .unwrap();

        let mounts = findmnt.mounts();
        assert_eq!(
            mounts.iter().map(|m| m.target.as_path()).collect::<Vec<_>>(),
            [
                Path::new("/"),
                Path::new("/proc"),
                Path::new("/target"),
                Path::new("/target/boot")
            ]
        );
        assert_eq!(mounts[1].source_device(), None);
        assert_eq!(mounts[2].source_device(), Some(Path::new("/dev/sda2")));
        assert_eq!(mounts[3].source_device(), Some(Path::new("/dev/sda1")));
    }
}
