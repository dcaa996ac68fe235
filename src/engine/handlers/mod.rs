//! Per-kind handlers. Each kind has a `probe` function that compares the
//! declaration with the inventory without touching the system, and a `create`
//! function that builds the declared object.

use std::path::{Path, PathBuf};

use log::{debug, warn};

use blockmeta_api::{
    config::StorageEntry,
    plan::StoragePlan,
    status::{DeviceHandle, HandlerFailure, Operation, StepError},
};
use osutils::{
    dependencies::{handler_failure, CommandRunner},
    udevadm,
};

use crate::{options::ApplyOptions, probe::Inventory, probe::Prober};

use super::resolution::ResolutionTable;

mod bcache;
mod disk;
mod dm_crypt;
mod format;
mod lvm;
mod mount;
mod partition;
mod raid;
mod wipe;
mod zfs;

/// What an entry resolves to, before the coordinator records its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolution {
    pub handle: DeviceHandle,
    pub fs_uuid: Option<String>,
}

impl Resolution {
    pub fn node(path: impl Into<PathBuf>) -> Self {
        Self {
            handle: DeviceHandle::Node(path.into()),
            fs_uuid: None,
        }
    }
}

/// Result of comparing a declaration with the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProbeOutcome {
    /// The declared object exists. Mounts resolve to nothing.
    Satisfied(Option<Resolution>),
    Missing,
    /// Something else occupies the place of the declared object.
    Conflict(String),
}

/// Everything a handler may look at while applying one entry.
pub(crate) struct HandlerContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub prober: &'a dyn Prober,
    pub options: &'a ApplyOptions,
    pub plan: &'a StoragePlan,
    pub inventory: &'a Inventory,
    pub resolved: &'a ResolutionTable,
}

impl HandlerContext<'_> {
    /// Device node a satisfied dependency resolved to.
    pub fn device_path(&self, id: &str) -> Result<&Path, StepError> {
        self.resolved.path(id).ok_or_else(|| {
            StepError::new(
                Operation::Resolve,
                HandlerFailure::Internal {
                    reason: format!("Dependency '{id}' did not resolve to a block device"),
                },
            )
        })
    }

    /// Device nodes of several dependencies, in the given order.
    pub fn device_paths(&self, ids: &[String]) -> Result<Vec<PathBuf>, StepError> {
        ids.iter()
            .map(|id| self.device_path(id).map(Path::to_path_buf))
            .collect()
    }

    /// Declared entry `id`, which validation guarantees to exist.
    pub fn entry(&self, id: &str) -> Result<&StorageEntry, StepError> {
        self.plan.entry(id).ok_or_else(|| {
            StepError::new(
                Operation::Resolve,
                HandlerFailure::Internal {
                    reason: format!("Entry '{id}' is not part of the plan"),
                },
            )
        })
    }

    /// Waits for the udev event queue to drain.
    pub fn settle(&self) -> Result<(), StepError> {
        udevadm::settle(self.runner, self.options.settle_timeout_secs).step(Operation::Settle)
    }

    /// Waits until udev has processed the device node at `path`. A timed out
    /// wait is retried `settle_retries` times.
    pub fn wait_for_device(&self, path: &Path) -> Result<(), StepError> {
        let attempts = self.options.settle_retries + 1;
        for attempt in 1..=attempts {
            match udevadm::wait(self.runner, path, self.options.settle_timeout_secs) {
                Ok(()) => {
                    debug!("Device '{}' is ready", path.display());
                    return Ok(());
                }
                Err(e) => match handler_failure(e) {
                    failure @ HandlerFailure::ToolUnavailable { .. } => {
                        return Err(StepError::new(Operation::Settle, failure))
                    }
                    failure => warn!(
                        "Attempt {attempt}/{attempts} waiting for '{}' failed: {failure}",
                        path.display()
                    ),
                },
            }
        }

        Err(StepError::new(
            Operation::Settle,
            HandlerFailure::DeviceTimeout {
                path: path.display().to_string(),
                timeout_secs: self.options.settle_timeout_secs,
                attempts,
            },
        ))
    }
}

/// Attributes failures of system tools to a handler step.
pub(crate) trait StepResultExt<T> {
    fn step(self, operation: Operation) -> Result<T, StepError>;
}

impl<T> StepResultExt<T> for Result<T, anyhow::Error> {
    fn step(self, operation: Operation) -> Result<T, StepError> {
        self.map_err(|e| StepError::new(operation, handler_failure(e)))
    }
}

impl<T> StepResultExt<T> for Result<T, HandlerFailure> {
    fn step(self, operation: Operation) -> Result<T, StepError> {
        self.map_err(|failure| StepError::new(operation, failure))
    }
}

/// Compares `entry` with the inventory.
#[tracing::instrument(skip_all)]
pub(crate) fn probe(ctx: &HandlerContext, entry: &StorageEntry) -> Result<ProbeOutcome, StepError> {
    match entry {
        StorageEntry::Disk(disk) => disk::probe(ctx, disk),
        StorageEntry::Partition(partition) => partition::probe(ctx, partition),
        StorageEntry::Raid(raid) => raid::probe(ctx, raid),
        StorageEntry::LvmVolgroup(volgroup) => lvm::probe_volgroup(ctx, volgroup),
        StorageEntry::LvmPartition(volume) => lvm::probe_logical_volume(ctx, volume),
        StorageEntry::Bcache(bcache) => bcache::probe(ctx, bcache),
        StorageEntry::ZfsPool(pool) => zfs::probe_pool(ctx, pool),
        StorageEntry::ZfsFs(dataset) => zfs::probe_dataset(ctx, dataset),
        StorageEntry::Format(format) => format::probe(ctx, format),
        StorageEntry::Mount(mount) => mount::probe(ctx, mount),
        StorageEntry::DmCrypt(crypt) => dm_crypt::probe(ctx, crypt),
    }
}

/// Builds `entry`. Returns what it resolves to; mounts resolve to nothing.
#[tracing::instrument(skip_all)]
pub(crate) fn create(
    ctx: &HandlerContext,
    entry: &StorageEntry,
) -> Result<Option<Resolution>, StepError> {
    match entry {
        StorageEntry::Disk(disk) => disk::create(ctx, disk).map(Some),
        StorageEntry::Partition(partition) => partition::create(ctx, partition).map(Some),
        StorageEntry::Raid(raid) => raid::create(ctx, raid).map(Some),
        StorageEntry::LvmVolgroup(volgroup) => lvm::create_volgroup(ctx, volgroup).map(Some),
        StorageEntry::LvmPartition(volume) => lvm::create_logical_volume(ctx, volume).map(Some),
        StorageEntry::Bcache(bcache) => bcache::create(ctx, bcache).map(Some),
        StorageEntry::ZfsPool(pool) => zfs::create_pool(ctx, pool).map(Some),
        StorageEntry::ZfsFs(dataset) => zfs::create_dataset(ctx, dataset).map(Some),
        StorageEntry::Format(format) => format::create(ctx, format).map(Some),
        StorageEntry::Mount(mount) => mount::create(ctx, mount).map(|()| None),
        StorageEntry::DmCrypt(crypt) => dm_crypt::create(ctx, crypt).map(Some),
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use indoc::indoc;

    use osutils::testutils::MockRunner;

    use crate::probe::test_utils::StaticProber;

    use super::*;

    /// Owns everything a `HandlerContext` borrows.
    pub struct Fixture {
        pub runner: MockRunner,
        /// Answers re-probes. Starts out returning `inventory`.
        pub prober: StaticProber,
        pub options: ApplyOptions,
        pub plan: StoragePlan,
        pub inventory: Inventory,
        pub resolved: ResolutionTable,
    }

    impl Fixture {
        pub fn new(document: &str, inventory: &str) -> Self {
            Self {
                runner: MockRunner::new(),
                prober: StaticProber::from_yaml(&[inventory]),
                options: ApplyOptions::default(),
                plan: StoragePlan::new(document).unwrap(),
                inventory: serde_yaml::from_str(inventory).unwrap(),
                resolved: ResolutionTable::default(),
            }
        }

        /// Records `id` as resolved to the device node `path`.
        pub fn resolve(&mut self, id: &str, path: &str) -> &mut Self {
            self.resolved
                .insert(
                    id,
                    Some(blockmeta_api::status::ResolvedDevice {
                        handle: DeviceHandle::Node(path.into()),
                        fs_uuid: None,
                        origin: blockmeta_api::status::Origin::Probed,
                    }),
                )
                .unwrap();
            self
        }

        pub fn ctx(&self) -> HandlerContext<'_> {
            HandlerContext {
                runner: &self.runner,
                prober: &self.prober,
                options: &self.options,
                plan: &self.plan,
                inventory: &self.inventory,
                resolved: &self.resolved,
            }
        }

        pub fn entry(&self, id: &str) -> &StorageEntry {
            self.plan.entry(id).unwrap()
        }
    }

    pub const EMPTY_DISKS: &str = indoc! {r#"
        block_devices:
          - {path: /dev/sda, device_type: disk, size: 17179869184, serial: QM00001}
          - {path: /dev/sdb, device_type: disk, size: 17179869184, serial: QM00002}
    "#};
}
