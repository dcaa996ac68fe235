use serde::{Deserialize, Serialize};

use crate::{config::ReferenceField, EntryId};

/// Errors produced while building the dependency graph.
#[derive(thiserror::Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GraphError {
    #[error("Entry '{0}' is defined more than once")]
    DuplicateId(EntryId),

    #[error("Entry '{id}' references non-existent entry '{target}' in field '{field}'")]
    NonExistentReference {
        id: EntryId,
        field: ReferenceField,
        target: EntryId,
    },

    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// A dependency cycle. Each entry in `cycle` depends on the next one, and
/// the last one depends on the first.
#[derive(thiserror::Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[error("Dependency cycle detected: {}", render_cycle(.cycle))]
pub struct CycleError {
    pub cycle: Vec<EntryId>,
}

fn render_cycle(cycle: &[EntryId]) -> String {
    cycle
        .iter()
        .chain(cycle.first())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
