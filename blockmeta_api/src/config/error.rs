use serde::{Deserialize, Serialize};

use crate::{constants::SUPPORTED_CONFIG_VERSION, EntryId};

use super::kinds::{EntryKind, EntryKindFlag, ReferenceField};

/// Errors found while parsing and validating a storage configuration
/// document. None of these are ever produced after a device was touched.
#[derive(thiserror::Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigError {
    #[error("Failed to parse storage configuration: {0}")]
    Parse(String),

    #[error(
        "Unsupported storage configuration version {0}, \
            only version {SUPPORTED_CONFIG_VERSION} is supported"
    )]
    UnsupportedVersion(u64),

    #[error("Storage configuration does not declare any entries")]
    Empty,

    #[error("Entry '{0}' is defined more than once")]
    DuplicateId(EntryId),

    #[error("Entry '{id}' of kind '{kind}' is invalid: {reason}")]
    InvalidEntry {
        id: EntryId,
        kind: EntryKind,
        reason: String,
    },

    #[error("Entry '{id}' of kind '{kind}' references itself in field '{field}'")]
    SelfReference {
        id: EntryId,
        kind: EntryKind,
        field: ReferenceField,
    },

    #[error(
        "Entry '{id}' of kind '{kind}' references non-existent entry '{target}' \
            in field '{field}'"
    )]
    DanglingReference {
        id: EntryId,
        kind: EntryKind,
        field: ReferenceField,
        target: EntryId,
    },

    #[error(
        "Entry '{id}' of kind '{kind}' references '{target}' of kind '{target_kind}' \
            in field '{field}', valid kinds are: {valid_kinds}"
    )]
    IncompatibleReference {
        id: EntryId,
        kind: EntryKind,
        field: ReferenceField,
        target: EntryId,
        target_kind: EntryKind,
        valid_kinds: EntryKindFlag,
    },

    #[error("Entry '{id}' of kind '{kind}' references '{target}' more than once")]
    DuplicateReference {
        id: EntryId,
        kind: EntryKind,
        target: EntryId,
    },

    #[error("Entry '{target}' is used by both '{first}' and '{second}'")]
    MultipleConsumers {
        target: EntryId,
        first: EntryId,
        second: EntryId,
    },

    #[error("Entries '{first}' and '{second}' of kind '{kind}' share the same {field} '{value}'")]
    DuplicateValue {
        kind: EntryKind,
        field: String,
        value: String,
        first: EntryId,
        second: EntryId,
    },

    #[error("Partition '{id}' on '{device}' has an invalid layout: {reason}")]
    InvalidLayout {
        id: EntryId,
        device: EntryId,
        reason: String,
    },
}
