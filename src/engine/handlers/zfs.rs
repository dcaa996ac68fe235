use std::{collections::BTreeMap, path::Path};

use blockmeta_api::{
    config::{Properties, StorageEntry, ZfsFs, ZfsPool},
    status::{DeviceHandle, HandlerFailure, Operation, StepError},
};
use osutils::zfs;

use super::{HandlerContext, ProbeOutcome, Resolution, StepResultExt};

fn properties(properties: &Properties) -> BTreeMap<String, String> {
    properties
        .iter()
        .map(|(key, value)| (key.clone(), value.0.clone()))
        .collect()
}

fn pool_resolution(name: &str) -> Resolution {
    Resolution {
        handle: DeviceHandle::Zpool(name.into()),
        fs_uuid: None,
    }
}

pub(super) fn probe_pool(ctx: &HandlerContext, pool: &ZfsPool) -> Result<ProbeOutcome, StepError> {
    let vdevs = ctx.device_paths(&pool.vdevs)?;
    let Some(existing) = ctx.inventory.zpool(&pool.pool) else {
        return Ok(ProbeOutcome::Missing);
    };

    // zpool reports the partition it created on a whole disk vdev.
    let in_pool = |vdev: &Path| {
        existing.vdevs.iter().any(|observed| {
            observed == vdev
                || ctx
                    .inventory
                    .device(observed)
                    .is_some_and(|device| device.parents.iter().any(|p| p == vdev))
        })
    };
    if let Some(missing) = vdevs.iter().find(|vdev| !in_pool(vdev.as_path())) {
        return Ok(ProbeOutcome::Conflict(format!(
            "zpool '{}' exists but does not use '{}'",
            pool.pool,
            missing.display()
        )));
    }

    Ok(ProbeOutcome::Satisfied(Some(pool_resolution(&pool.pool))))
}

pub(super) fn create_pool(ctx: &HandlerContext, pool: &ZfsPool) -> Result<Resolution, StepError> {
    let vdevs = ctx.device_paths(&pool.vdevs)?;
    zfs::zpool_create(
        ctx.runner,
        &zfs::CreatePool {
            name: &pool.pool,
            vdevs: &vdevs,
            mountpoint: pool.mountpoint.as_deref(),
            altroot: Some(&ctx.options.target),
            pool_properties: properties(&pool.pool_properties),
            fs_properties: properties(&pool.fs_properties),
        },
    )
    .step(Operation::CreateZpool)?;
    Ok(pool_resolution(&pool.pool))
}

/// Pool entry `dataset` is created in.
fn pool_of<'a>(ctx: &'a HandlerContext, dataset: &ZfsFs) -> Result<&'a ZfsPool, StepError> {
    match ctx.entry(&dataset.pool)? {
        StorageEntry::ZfsPool(pool) => Ok(pool),
        other => Err(StepError::new(
            Operation::Resolve,
            HandlerFailure::Internal {
                reason: format!("{} is not a zpool", other.describe()),
            },
        )),
    }
}

pub(super) fn probe_dataset(
    ctx: &HandlerContext,
    dataset: &ZfsFs,
) -> Result<ProbeOutcome, StepError> {
    let pool = pool_of(ctx, dataset)?;
    let name = zfs::dataset_name(&pool.pool, &dataset.volume);
    Ok(if ctx.inventory.has_dataset(&name) {
        ProbeOutcome::Satisfied(Some(Resolution {
            handle: DeviceHandle::ZfsDataset(name),
            fs_uuid: None,
        }))
    } else {
        ProbeOutcome::Missing
    })
}

pub(super) fn create_dataset(
    ctx: &HandlerContext,
    dataset: &ZfsFs,
) -> Result<Resolution, StepError> {
    let pool = pool_of(ctx, dataset)?;
    zfs::zfs_create(
        ctx.runner,
        &pool.pool,
        &dataset.volume,
        &properties(&dataset.properties),
    )
    .step(Operation::CreateZfsDataset)?;

    Ok(Resolution {
        handle: DeviceHandle::ZfsDataset(zfs::dataset_name(&pool.pool, &dataset.volume)),
        fs_uuid: None,
    })
}
