use log::info;

use blockmeta_api::{
    config::{Bcache, CacheMode},
    status::{HandlerFailure, Operation, StepError},
};
use osutils::{bcache, modprobe};

use super::{partition, HandlerContext, ProbeOutcome, Resolution, StepResultExt};

pub(super) fn probe(ctx: &HandlerContext, bcache: &Bcache) -> Result<ProbeOutcome, StepError> {
    let backing = ctx.device_path(&bcache.backing_device)?;
    let cache = ctx.device_path(&bcache.cache_device)?;

    Ok(match ctx.inventory.bcache_on(backing) {
        Some(existing) if existing.parents.iter().any(|p| p == cache) => {
            ProbeOutcome::Satisfied(Some(Resolution::node(existing.path.clone())))
        }
        Some(existing) => ProbeOutcome::Conflict(format!(
            "'{}' already backs '{}' with another cache device",
            backing.display(),
            existing.path.display()
        )),
        None => ProbeOutcome::Missing,
    })
}

/// Builds the bcache device. The kernel picks its name, so the system is
/// probed again to find it.
pub(super) fn create(ctx: &HandlerContext, bcache: &Bcache) -> Result<Resolution, StepError> {
    let backing = ctx.device_path(&bcache.backing_device)?;
    let cache = ctx.device_path(&bcache.cache_device)?;

    modprobe::load(ctx.runner, "bcache").step(Operation::CreateBcache)?;
    bcache::make(
        ctx.runner,
        backing,
        cache,
        bcache.cache_mode == Some(CacheMode::Writeback),
    )
    .step(Operation::CreateBcache)?;
    ctx.settle()?;

    let inventory = ctx.prober.probe(ctx.runner).map_err(|e| {
        StepError::new(
            Operation::CreateBcache,
            HandlerFailure::InspectionFailed {
                reason: format!("{e:?}"),
            },
        )
    })?;
    let path = inventory
        .bcache_on(backing)
        .map(|device| device.path.clone())
        .ok_or_else(|| {
            StepError::new(
                Operation::CreateBcache,
                HandlerFailure::DeviceNotFound {
                    reason: format!("no bcache device appeared on '{}'", backing.display()),
                },
            )
        })?;
    info!("Bcache '{}' is '{}'", bcache.id, path.display());

    if let Some(ptable) = bcache.ptable {
        partition::create_table(ctx, &path, ptable)?;
        ctx.settle()?;
    }

    Ok(Resolution::node(path))
}
