//! Outcome of applying a storage configuration.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::{config::EntryKind, EntryId};

/// State of a single entry during and after an apply run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ApplyState {
    Pending,
    InProgress,
    Satisfied,
    Failed,
    Skipped,
}

/// How a satisfied entry came to be satisfied.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Origin {
    /// The entry already existed and matched the declaration.
    Probed,
    /// The entry was created during this run.
    Created,
}

/// What an entry resolves to on the live system.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", tag = "type", content = "value")]
pub enum DeviceHandle {
    /// A block device node, e.g. `/dev/sda1`.
    Node(PathBuf),
    /// A ZFS pool name.
    Zpool(String),
    /// A ZFS dataset name, e.g. `rpool/ROOT`.
    ZfsDataset(String),
    /// An LVM volume group name.
    VolumeGroup(String),
}

impl DeviceHandle {
    /// Device node path, for handles that are block devices.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Node(path) => Some(path),
            Self::Zpool(_) | Self::ZfsDataset(_) | Self::VolumeGroup(_) => None,
        }
    }
}

impl Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(path) => write!(f, "{}", path.display()),
            Self::Zpool(name) => write!(f, "zpool {name}"),
            Self::ZfsDataset(name) => write!(f, "zfs dataset {name}"),
            Self::VolumeGroup(name) => write!(f, "volume group {name}"),
        }
    }
}

/// Entry of the resolution table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedDevice {
    pub handle: DeviceHandle,

    /// Filesystem UUID, for `format` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_uuid: Option<String>,

    pub origin: Origin,
}

/// Steps performed by the handlers. Reported with every handler failure.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Operation {
    Resolve,
    Probe,
    Wipe,
    StopHolders,
    CreatePartitionTable,
    CreatePartition,
    CreateRaid,
    CreateVolumeGroup,
    CreateLogicalVolume,
    CreateBcache,
    CreateEncryptedVolume,
    OpenEncryptedVolume,
    CreateZpool,
    CreateZfsDataset,
    CreateFilesystem,
    Mount,
    Settle,
}

/// Why a handler failed.
#[derive(thiserror::Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum HandlerFailure {
    #[error("Existing state conflicts with the declaration: {reason}")]
    ProbeConflict { reason: String },

    #[error(
        "Timed out waiting for device '{path}' after {attempts} attempt(s) of {timeout_secs}s"
    )]
    DeviceTimeout {
        path: String,
        timeout_secs: u64,
        attempts: u32,
    },

    #[error("Command '{command}' failed: {explanation}{}", render_output(.output))]
    ToolInvocation {
        tool: String,
        command: String,
        explanation: String,
        /// Captured stdout and stderr.
        output: String,
    },

    #[error("Tool '{tool}' is unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("Dependency '{ancestor}' failed")]
    AncestorFailed { ancestor: EntryId },

    #[error("Device not found: {reason}")]
    DeviceNotFound { reason: String },

    #[error("Failed to create mount point '{path}': {reason}")]
    CreateMountPoint { path: String, reason: String },

    #[error("Failed to inspect the system: {reason}")]
    InspectionFailed { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

fn render_output(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!("\n{}", output.trim_end())
    }
}

/// A handler failure attributed to a step, before it is attributed to an
/// entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepError {
    pub operation: Operation,
    pub failure: HandlerFailure,
}

impl StepError {
    pub fn new(operation: Operation, failure: impl Into<HandlerFailure>) -> Self {
        Self {
            operation,
            failure: failure.into(),
        }
    }

    pub fn attribute(self, id: EntryId, kind: EntryKind) -> HandlerError {
        HandlerError {
            id,
            kind,
            operation: self.operation,
            failure: self.failure,
        }
    }
}

/// A handler failure, attributed to an entry and a step.
#[derive(thiserror::Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[error("Entry '{id}' of kind '{kind}' failed at step '{operation}': {failure}")]
pub struct HandlerError {
    pub id: EntryId,
    pub kind: EntryKind,
    pub operation: Operation,
    pub failure: HandlerFailure,
}

/// Final state of one entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct EntryReport {
    pub id: EntryId,

    pub kind: EntryKind,

    pub state: ApplyState,

    /// Set once the entry is satisfied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,

    /// Absent for mounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedDevice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HandlerError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl EntryReport {
    pub fn new(id: EntryId, kind: EntryKind) -> Self {
        Self {
            id,
            kind,
            state: ApplyState::Pending,
            origin: None,
            resolved: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Report of a whole apply run. Entries are listed in execution order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ApplyReport {
    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Whether the run was cancelled before every entry was started.
    #[serde(default)]
    pub aborted: bool,

    pub entries: Vec<EntryReport>,

    /// fstab, crypttab and mdadm.conf files written at the end of the run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub written_files: Vec<PathBuf>,
}

impl ApplyReport {
    pub fn new(entries: impl IntoIterator<Item = (EntryId, EntryKind)>) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            aborted: false,
            entries: entries
                .into_iter()
                .map(|(id, kind)| EntryReport::new(id, kind))
                .collect(),
            written_files: Vec::new(),
        }
    }

    pub fn entry(&self, id: &str) -> Option<&EntryReport> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: &str) -> Option<&mut EntryReport> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Ids of entries in the given state, in execution order.
    pub fn in_state(&self, state: ApplyState) -> Vec<&EntryId> {
        self.entries
            .iter()
            .filter(|e| e.state == state)
            .map(|e| &e.id)
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|e| e.state == ApplyState::Satisfied)
    }

    /// Turns a report with failed or skipped entries into an error.
    pub fn check(self) -> Result<Self, AggregateApplyError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(AggregateApplyError {
                report: Box::new(self),
            })
        }
    }
}

/// Summary of an apply run that did not satisfy every entry.
#[derive(thiserror::Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[error("{}", summarize(.report))]
pub struct AggregateApplyError {
    pub report: Box<ApplyReport>,
}

impl AggregateApplyError {
    pub fn failed(&self) -> Vec<&HandlerError> {
        self.report
            .entries
            .iter()
            .filter_map(|e| e.error.as_ref())
            .collect()
    }

    pub fn skipped(&self) -> Vec<&EntryId> {
        self.report.in_state(ApplyState::Skipped)
    }
}

fn summarize(report: &ApplyReport) -> String {
    let mut message = String::from("Failed to apply storage configuration");

    let failed = report.in_state(ApplyState::Failed);
    if !failed.is_empty() {
        message.push_str(&format!(
            "; {} entries failed: {}",
            failed.len(),
            quote_list(&failed)
        ));
    }

    let skipped = report.in_state(ApplyState::Skipped);
    if !skipped.is_empty() {
        message.push_str(&format!(
            "; {} entries skipped: {}",
            skipped.len(),
            quote_list(&skipped)
        ));
    }

    let pending = report
        .entries
        .iter()
        .filter(|e| matches!(e.state, ApplyState::Pending | ApplyState::InProgress))
        .count();
    if pending > 0 {
        message.push_str(&format!("; {pending} entries did not finish"));
    }

    message
}

fn quote_list(ids: &[&EntryId]) -> String {
    ids.iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> ApplyReport {
        ApplyReport::new([
            ("sda".to_string(), EntryKind::Disk),
            ("sda1".to_string(), EntryKind::Partition),
            ("fs".to_string(), EntryKind::Format),
        ])
    }

    #[test]
    fn test_report_check() {
        let mut report = report();
        for entry in report.entries.iter_mut() {
            entry.state = ApplyState::Satisfied;
        }
        assert!(report.clone().check().is_ok());

        let entry = report.entry_mut("sda1").unwrap();
        entry.state = ApplyState::Failed;
        entry.error = Some(HandlerError {
            id: "sda1".into(),
            kind: EntryKind::Partition,
            operation: Operation::CreatePartition,
            failure: HandlerFailure::ToolInvocation {
                tool: "sgdisk".into(),
                command: "sgdisk --new 1:2048:6293503 /dev/sda".into(),
                explanation: "exited with status: 4".into(),
                output: String::new(),
            },
        });
        report.entry_mut("fs").unwrap().state = ApplyState::Skipped;

        let error = report.check().unwrap_err();
        assert_eq!(
            error.to_string(),
            "Failed to apply storage configuration; 1 entries failed: 'sda1'; \
                1 entries skipped: 'fs'"
        );
        assert_eq!(error.failed().len(), 1);
        assert_eq!(error.skipped(), ["fs"]);
        assert_eq!(
            error.failed()[0].to_string(),
            "Entry 'sda1' of kind 'partition' failed at step 'create-partition': \
                Command 'sgdisk --new 1:2048:6293503 /dev/sda' failed: exited with status: 4"
        );
    }

    #[test]
    fn test_report_serialize() {
        let mut report = report();
        let entry = report.entry_mut("sda").unwrap();
        entry.state = ApplyState::Satisfied;
        entry.origin = Some(Origin::Probed);
        entry.resolved = Some(ResolvedDevice {
            handle: DeviceHandle::Node("/dev/sda".into()),
            fs_uuid: None,
            origin: Origin::Probed,
        });

        let value = serde_yaml::to_value(&report).unwrap();
        let sda = &value["entries"][0];
        assert_eq!(sda["state"], serde_yaml::Value::String("satisfied".into()));
        assert_eq!(sda["origin"], serde_yaml::Value::String("probed".into()));
        assert_eq!(
            sda["resolved"]["handle"]["type"],
            serde_yaml::Value::String("node".into())
        );
        assert_eq!(
            sda["resolved"]["handle"]["value"],
            serde_yaml::Value::String("/dev/sda".into())
        );
        assert_eq!(
            sda["resolved"]["origin"],
            serde_yaml::Value::String("probed".into())
        );
        assert_eq!(
            value["entries"][1]["state"],
            serde_yaml::Value::String("pending".into())
        );

        let parsed: ApplyReport = serde_yaml::from_value(value).unwrap();
        assert_eq!(parsed, report);
    }
}
