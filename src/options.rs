use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use blockmeta_api::error::{EngineError, EnvironmentError, ReportError};

fn default_target() -> PathBuf {
    PathBuf::from("/target")
}

fn default_settle_timeout_secs() -> u64 {
    120
}

fn default_settle_retries() -> u32 {
    1
}

fn default_mdadm_metadata() -> String {
    "1.2".into()
}

/// Options of an apply run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApplyOptions {
    /// Root the declared mount paths are mounted under.
    /// Default is `/target`.
    #[serde(default = "default_target")]
    pub target: PathBuf,

    /// Where to write the fstab of the installed system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fstab: Option<PathBuf>,

    /// Where to write the crypttab of the installed system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypttab: Option<PathBuf>,

    /// Where to write the mdadm.conf of the installed system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mdadm_conf: Option<PathBuf>,

    /// Bound of every udev settlement wait, in seconds.
    /// Default is 120.
    #[serde(default = "default_settle_timeout_secs")]
    pub settle_timeout_secs: u64,

    /// Extra attempts of a timed out settlement wait.
    /// Default is 1.
    #[serde(default = "default_settle_retries")]
    pub settle_retries: u32,

    /// Superblock format of new RAID arrays.
    /// Default is `1.2`.
    #[serde(default = "default_mdadm_metadata")]
    pub mdadm_metadata: String,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            target: default_target(),
            fstab: None,
            crypttab: None,
            mdadm_conf: None,
            settle_timeout_secs: default_settle_timeout_secs(),
            settle_retries: default_settle_retries(),
            mdadm_metadata: default_mdadm_metadata(),
        }
    }
}

impl ApplyOptions {
    /// Loads options from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).structured(EnvironmentError::LoadOptions {
            path: path.display().to_string(),
        })?;
        serde_yaml::from_str(&contents).structured(EnvironmentError::LoadOptions {
            path: path.display().to_string(),
        })
    }

    /// Path under the target root where `path` is mounted.
    pub fn target_path(&self, path: &Path) -> PathBuf {
        let relative = path.strip_prefix("/").unwrap_or(path);
        if relative.as_os_str().is_empty() {
            // Joining an empty path would add a trailing slash.
            return self.target.clone();
        }
        self.target.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use indoc::indoc;

    use blockmeta_api::error::ErrorKind;

    use super::*;

    #[test]
    fn test_defaults() {
        let options: ApplyOptions = serde_yaml::from_str("{}").unwrap();
        assert_eq!(options, ApplyOptions::default());
        assert_eq!(options.target, Path::new("/target"));
        assert_eq!(options.settle_timeout_secs, 120);
        assert_eq!(options.settle_retries, 1);
        assert_eq!(options.mdadm_metadata, "1.2");

        assert_eq!(
            options.target_path(Path::new("/boot/efi")),
            Path::new("/target/boot/efi")
        );
        assert_eq!(
            options.target_path(Path::new("/")).display().to_string(),
            "/target"
        );
    }

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            indoc! {r#"
                target: /mnt
                fstab: /mnt/etc/fstab
                settle_timeout_secs: 30
                settle_retries: 0
            "#}
            .as_bytes(),
        )
        .unwrap();

        let options = ApplyOptions::load(file.path()).unwrap();
        assert_eq!(options.target, Path::new("/mnt"));
        assert_eq!(options.fstab.as_deref(), Some(Path::new("/mnt/etc/fstab")));
        assert_eq!(options.settle_timeout_secs, 30);
        assert_eq!(options.settle_retries, 0);
        assert_eq!(options.crypttab, None);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"strict: true\n").unwrap();
        let error = ApplyOptions::load(file.path()).unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::Environment(EnvironmentError::LoadOptions { .. })
        ));
    }
}
