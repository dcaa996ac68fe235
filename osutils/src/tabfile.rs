//! fstab and crypttab files of the installed system.

use std::path::{Path, PathBuf};

use anyhow::{Context, Error};

use blockmeta_api::constants::{ROOT_MOUNT_POINT_PATH, SWAP_MOUNT_OPTIONS};

/// A representation of a fstab file.
#[derive(Debug, Default)]
pub struct TabFile {
    pub entries: Vec<TabFileEntry>,
}

/// A representation of a single entry in a tab file.
#[derive(Debug, PartialEq, Eq)]
pub struct TabFileEntry {
    pub device: TabDevice,
    pub mount_point: TabMountPoint,
    pub fs_type: String,
    pub options: Vec<String>,
}

/// A representation of a device in a tab file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabDevice {
    /// Filesystem or container UUID, rendered as `UUID=...`.
    Uuid(String),
    BlockDevice(PathBuf),
}

/// A representation of a mount point in a tab file.
#[derive(Debug, PartialEq, Eq)]
pub enum TabMountPoint {
    None,
    Path(PathBuf),
}

fn write(tab_file_path: &Path, contents: String) -> Result<(), Error> {
    if let Some(parent) = tab_file_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    std::fs::write(tab_file_path, contents.as_bytes())
        .with_context(|| format!("Failed to write new {}", tab_file_path.display()))
}

impl TabFile {
    /// Write this tab file to disk at location `tab_file_path`.
    pub fn write(&self, tab_file_path: impl AsRef<Path>) -> Result<(), Error> {
        write(tab_file_path.as_ref(), self.render())
    }

    /// Render this tab file as a string.
    pub fn render(&self) -> String {
        self.entries.iter().map(|entry| entry.render()).collect()
    }
}

impl TabFileEntry {
    /// Create a new regular entry for a block device mounted at a path.
    pub fn new_path(
        device: TabDevice,
        mount_point: impl Into<PathBuf>,
        fs_type: impl Into<String>,
    ) -> Self {
        Self {
            device,
            mount_point: TabMountPoint::Path(mount_point.into()),
            fs_type: fs_type.into(),
            options: Vec::new(),
        }
    }

    /// Create a new entry for a block device mounted as swap.
    pub fn new_swap(device: TabDevice) -> Self {
        Self {
            device,
            mount_point: TabMountPoint::None,
            fs_type: "swap".into(),
            options: vec![SWAP_MOUNT_OPTIONS.into()],
        }
    }

    /// Add options to this entry.
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Render this entry as a string suitable for writing to a tab file.
    pub fn render(&self) -> String {
        // fsck pass is 1 for root, 2 for everything else, 0 for none
        let fsck_pass = match self.mount_point {
            TabMountPoint::None => 0,
            TabMountPoint::Path(ref path) if path == Path::new(ROOT_MOUNT_POINT_PATH) => 1,
            _ => 2,
        };

        // If the options are empty, use "defaults" as the default
        let options = if self.options.is_empty() {
            "defaults".into()
        } else {
            self.options.join(",")
        };

        format!(
            "{} {} {} {} 0 {}\n",
            self.device.render(),
            self.mount_point.render(),
            self.fs_type,
            options,
            fsck_pass,
        )
    }
}

impl TabDevice {
    /// Render this device as a string.
    pub fn render(&self) -> String {
        match self {
            TabDevice::Uuid(uuid) => format!("UUID={uuid}"),
            TabDevice::BlockDevice(path) => path.to_string_lossy().to_string(),
        }
    }
}

impl TabMountPoint {
    /// Render this mount point as a string.
    pub fn render(&self) -> String {
        match self {
            TabMountPoint::None => "none".to_string(),
            TabMountPoint::Path(path) => path.to_string_lossy().to_string(),
        }
    }
}

/// A representation of a crypttab file.
#[derive(Debug, Default)]
pub struct CryptTab {
    pub entries: Vec<CryptTabEntry>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct CryptTabEntry {
    /// Name of the mapping under `/dev/mapper`.
    pub name: String,
    pub device: TabDevice,
    /// Key file on the installed system, if the volume is not unlocked by a
    /// passphrase.
    pub key_file: Option<PathBuf>,
}

impl CryptTab {
    pub fn write(&self, tab_file_path: impl AsRef<Path>) -> Result<(), Error> {
        write(tab_file_path.as_ref(), self.render())
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|entry| {
                format!(
                    "{} {} {} luks\n",
                    entry.name,
                    entry.device.render(),
                    entry
                        .key_file
                        .as_ref()
                        .map_or("none".into(), |p| p.to_string_lossy().to_string()),
                )
            })
            .collect()
    }
}
