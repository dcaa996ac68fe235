//! Applies a storage plan to the system, one entry at a time in dependency
//! order.

use chrono::Utc;
use log::{debug, error, info, warn};

use blockmeta_api::{
    config::StorageEntry,
    error::EngineError,
    plan::StoragePlan,
    status::{
        ApplyReport, ApplyState, HandlerFailure, Operation, Origin, ResolvedDevice, StepError,
    },
    EntryId,
};
use osutils::dependencies::{CommandRunner, HostRunner};

use crate::{
    options::ApplyOptions,
    probe::{Inventory, Prober, SystemProber},
};

mod abort;
mod handlers;
mod resolution;
mod tabfiles;

pub use abort::AbortHandle;

use handlers::{HandlerContext, ProbeOutcome, Resolution};
use resolution::ResolutionTable;

/// Runs apply operations against one system.
pub struct Engine {
    runner: Box<dyn CommandRunner>,
    prober: Box<dyn Prober>,
    options: ApplyOptions,
    abort: AbortHandle,
}

impl Engine {
    /// Engine acting on the host, through the system tools.
    pub fn new(options: ApplyOptions) -> Self {
        Self::with_runner(Box::new(HostRunner), Box::new(SystemProber), options)
    }

    pub fn with_runner(
        runner: Box<dyn CommandRunner>,
        prober: Box<dyn Prober>,
        options: ApplyOptions,
    ) -> Self {
        Self {
            runner,
            prober,
            options,
            abort: AbortHandle::new(),
        }
    }

    pub fn options(&self) -> &ApplyOptions {
        &self.options
    }

    /// Handle that stops the current and future runs of this engine from
    /// starting further entries.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Aborts the run on SIGINT and SIGTERM.
    pub fn register_signal_handlers(&self) -> Result<(), EngineError> {
        self.abort.register_signals()
    }

    /// Parses `document` and applies it.
    pub fn apply_document(&self, document: &str) -> Result<ApplyReport, EngineError> {
        let plan = StoragePlan::new(document)?;
        self.apply(&plan)
    }

    /// Applies `plan`. Fails with an aggregate error, carrying the full
    /// report, unless every entry ends up satisfied.
    pub fn apply(&self, plan: &StoragePlan) -> Result<ApplyReport, EngineError> {
        self.run(plan)?.check().map_err(EngineError::new)
    }

    /// Applies `plan` and reports the final state of every entry. Only
    /// environment and internal errors are returned as errors.
    #[tracing::instrument(skip_all)]
    pub fn run(&self, plan: &StoragePlan) -> Result<ApplyReport, EngineError> {
        info!("Applying {} storage entries", plan.len());
        debug!("Dependency graph:\n{}", plan.graph().describe());

        let mut report = ApplyReport::new(
            plan.ordered_entries()
                .map(|entry| (entry.id().clone(), entry.kind())),
        );
        let mut resolved = ResolutionTable::default();
        let mut inventory = None;

        for (index, entry) in plan.ordered_entries().enumerate() {
            if self.abort.is_aborted() {
                let mut skipped = 0;
                for record in report.entries[index..].iter_mut() {
                    if record.state == ApplyState::Pending {
                        record.state = ApplyState::Skipped;
                        skipped += 1;
                    }
                }
                report.aborted = true;
                warn!("Apply aborted, skipping {skipped} entries");
                break;
            }

            if let Some(ancestor) = failed_ancestor(plan, &report, entry.id()) {
                let failure = StepError::new(
                    Operation::Resolve,
                    HandlerFailure::AncestorFailed { ancestor },
                )
                .attribute(entry.id().clone(), entry.kind());
                warn!("Not applying {}: {}", entry.describe(), failure.failure);

                let record = &mut report.entries[index];
                record.state = ApplyState::Failed;
                record.error = Some(failure);
                record.finished_at = Some(Utc::now());
                continue;
            }

            let record = &mut report.entries[index];
            record.state = ApplyState::InProgress;
            record.started_at = Some(Utc::now());
            info!("Applying {}", entry.describe());

            let outcome = self.apply_entry(plan, entry, &mut inventory, &resolved);

            let record = &mut report.entries[index];
            record.finished_at = Some(Utc::now());
            match outcome {
                Ok((origin, resolution)) => {
                    let device = resolution.map(|resolution| ResolvedDevice {
                        handle: resolution.handle,
                        fs_uuid: resolution.fs_uuid,
                        origin,
                    });
                    resolved
                        .insert(entry.id(), device.clone())
                        .map_err(EngineError::new)?;

                    match (origin, &device) {
                        (Origin::Probed, Some(device)) => {
                            info!("{} already exists as {}", entry.describe(), device.handle)
                        }
                        (Origin::Created, Some(device)) => {
                            info!("Created {} as {}", entry.describe(), device.handle)
                        }
                        (_, None) => info!("{} is satisfied", entry.describe()),
                    }

                    record.state = ApplyState::Satisfied;
                    record.origin = Some(origin);
                    record.resolved = device;
                }
                Err(e) => {
                    let e = e.attribute(entry.id().clone(), entry.kind());
                    error!("{e}");
                    record.state = ApplyState::Failed;
                    record.error = Some(e);
                }
            }
        }

        tabfiles::write_all(
            self.runner.as_ref(),
            &self.options,
            plan,
            &mut report,
            &resolved,
        )?;

        report.finished_at = Some(Utc::now());
        info!(
            "Applied storage configuration: {} satisfied, {} failed, {} skipped",
            report.in_state(ApplyState::Satisfied).len(),
            report.in_state(ApplyState::Failed).len(),
            report.in_state(ApplyState::Skipped).len()
        );
        Ok(report)
    }

    /// Probes `entry` and builds it if needed. `cached` holds the inventory
    /// of the system for as long as nothing was changed.
    fn apply_entry(
        &self,
        plan: &StoragePlan,
        entry: &StorageEntry,
        cached: &mut Option<Inventory>,
        resolved: &ResolutionTable,
    ) -> Result<(Origin, Option<Resolution>), StepError> {
        let inventory = match cached.take() {
            Some(inventory) => inventory,
            None => self.prober.probe(self.runner.as_ref()).map_err(|e| {
                StepError::new(
                    Operation::Probe,
                    HandlerFailure::InspectionFailed {
                        reason: format!("{e:?}"),
                    },
                )
            })?,
        };

        let ctx = HandlerContext {
            runner: self.runner.as_ref(),
            prober: self.prober.as_ref(),
            options: &self.options,
            plan,
            inventory: &inventory,
            resolved,
        };
        let outcome = reconcile(&ctx, entry);

        // Anything but a successful probe may have changed the system.
        if matches!(outcome, Ok((Origin::Probed, _))) {
            *cached = Some(inventory);
        }
        outcome
    }
}

/// Decides whether `entry` is satisfied by what exists and builds it if not.
fn reconcile(
    ctx: &HandlerContext,
    entry: &StorageEntry,
) -> Result<(Origin, Option<Resolution>), StepError> {
    let conflict = |reason: String| {
        StepError::new(Operation::Probe, HandlerFailure::ProbeConflict { reason })
    };

    let outcome = handlers::probe(ctx, entry)?;
    debug!("Probed {}: {outcome:?}", entry.describe());

    // What exists on top of a rebuilt dependency belongs to the old layout.
    if let Some(dependency) = created_dependency(ctx, entry) {
        if entry.preserve() {
            return Err(conflict(format!(
                "{} is preserved but its dependency '{dependency}' was created in this run",
                entry.describe()
            )));
        }
        debug!(
            "Building {} on top of newly created '{dependency}'",
            entry.describe()
        );
    } else {
        match outcome {
            ProbeOutcome::Satisfied(resolution) => return Ok((Origin::Probed, resolution)),
            ProbeOutcome::Missing if entry.preserve() => {
                return Err(conflict(format!(
                    "{} is preserved but does not exist",
                    entry.describe()
                )))
            }
            ProbeOutcome::Missing => {}
            ProbeOutcome::Conflict(reason) if entry.preserve() || entry.wipe().is_none() => {
                return Err(conflict(reason))
            }
            ProbeOutcome::Conflict(reason) => {
                warn!("Rebuilding {}: {reason}", entry.describe());
            }
        }
    }

    handlers::create(ctx, entry).map(|resolution| (Origin::Created, resolution))
}

/// A dependency of `entry`, direct or not, that was created during this run.
/// Mounts resolve to nothing and are never reported.
fn created_dependency<'a>(ctx: &'a HandlerContext, entry: &StorageEntry) -> Option<&'a EntryId> {
    ctx.plan
        .graph()
        .transitive_dependencies(entry.id())
        .into_iter()
        .find(|id| {
            ctx.resolved
                .get(id)
                .is_some_and(|device| device.origin == Origin::Created)
        })
}

/// The entry whose failure prevents `id` from being applied: the root cause
/// behind a failed direct dependency.
fn failed_ancestor(plan: &StoragePlan, report: &ApplyReport, id: &str) -> Option<EntryId> {
    plan.graph().dependencies(id).into_iter().find_map(|dependency| {
        let record = report.entry(dependency)?;
        if record.state != ApplyState::Failed {
            return None;
        }
        match &record.error {
            Some(error) => match &error.failure {
                HandlerFailure::AncestorFailed { ancestor } => Some(ancestor.clone()),
                _ => Some(dependency.clone()),
            },
            None => Some(dependency.clone()),
        }
    })
}
