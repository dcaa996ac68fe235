use std::{collections::BTreeSet, path::Path};

use log::{debug, info};

use blockmeta_api::{
    config::WipeMode,
    status::{Operation, StepError},
};
use osutils::{cryptsetup, dd, lvm, mdadm, wipefs};

use super::{HandlerContext, StepResultExt};

/// Stops every RAID array, dm-crypt mapping and volume group built on
/// `path` or on one of its partitions, top-most first.
pub(super) fn release_holders(ctx: &HandlerContext, path: &Path) -> Result<(), StepError> {
    let mut released = BTreeSet::new();
    release(ctx, path, &mut released)?;
    for partition in ctx.inventory.partitions_of(path) {
        release(ctx, &partition.path, &mut released)?;
    }
    Ok(())
}

fn release(
    ctx: &HandlerContext,
    path: &Path,
    released: &mut BTreeSet<String>,
) -> Result<(), StepError> {
    for holder in ctx.inventory.holders(path) {
        release(ctx, &holder.path, released)?;
        for partition in ctx.inventory.partitions_of(&holder.path) {
            release(ctx, &partition.path, released)?;
        }

        if holder.is_raid() {
            if released.insert(holder.path.display().to_string()) {
                mdadm::stop(ctx.runner, &holder.path).step(Operation::StopHolders)?;
            }
        } else if holder.device_type == "crypt" {
            if released.insert(holder.path.display().to_string()) {
                cryptsetup::close(ctx.runner, &holder.path).step(Operation::StopHolders)?;
            }
        } else if holder.device_type == "lvm" {
            if let Some(volgroup) = ctx.inventory.volume_group_of(&holder.path) {
                if released.insert(format!("vg:{volgroup}")) {
                    info!("Deactivating volume group '{volgroup}'");
                    lvm::deactivate(ctx.runner, volgroup).step(Operation::StopHolders)?;
                }
            }
        } else {
            debug!(
                "Not releasing '{}' of type '{}' held by '{}'",
                holder.path.display(),
                holder.device_type,
                path.display()
            );
        }
    }
    Ok(())
}

/// Erases the previous content of `path` according to `mode`.
pub(super) fn wipe(ctx: &HandlerContext, path: &Path, mode: WipeMode) -> Result<(), StepError> {
    debug!("Wiping '{}' ({mode})", path.display());
    match mode {
        WipeMode::Superblock => {
            for partition in ctx.inventory.partitions_of(path) {
                wipefs::all(ctx.runner, &partition.path).step(Operation::Wipe)?;
            }
            wipefs::all(ctx.runner, path).step(Operation::Wipe)
        }
        WipeMode::Zero => dd::fill(ctx.runner, path, dd::FillSource::Zero).step(Operation::Wipe),
        WipeMode::Random => {
            dd::fill(ctx.runner, path, dd::FillSource::Random).step(Operation::Wipe)
        }
        WipeMode::Pvremove => lvm::pvremove(ctx.runner, path).step(Operation::Wipe),
    }
}
