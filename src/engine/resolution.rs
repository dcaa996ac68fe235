use std::{collections::BTreeMap, path::Path};

use blockmeta_api::{error::InternalError, status::ResolvedDevice, EntryId};

/// What each satisfied entry resolved to during the current run. Every entry
/// is recorded at most once; mounts are recorded without a device.
#[derive(Debug, Default)]
pub(crate) struct ResolutionTable {
    entries: BTreeMap<EntryId, Option<ResolvedDevice>>,
}

impl ResolutionTable {
    pub fn insert(
        &mut self,
        id: &str,
        resolved: Option<ResolvedDevice>,
    ) -> Result<(), InternalError> {
        if self.entries.contains_key(id) {
            return Err(InternalError::DuplicateResolution(id.into()));
        }
        self.entries.insert(id.into(), resolved);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ResolvedDevice> {
        self.entries.get(id).and_then(Option::as_ref)
    }

    /// Device node of `id`, for entries that resolved to a block device.
    pub fn path(&self, id: &str) -> Option<&Path> {
        self.get(id).and_then(|resolved| resolved.handle.path())
    }
}
