use std::path::{Path, PathBuf};

use log::info;

use blockmeta_api::{
    config::{Partition, PartitionFlag, PartitionGeometry, PartitionRole, PartitionTableType},
    status::{HandlerFailure, Operation, StepError},
};
use osutils::{parted, sgdisk};

use super::{wipe, HandlerContext, ProbeOutcome, Resolution, StepResultExt};

/// Device node of partition `number` of `parent`. Kernel names ending in a
/// digit get a `p` separator, e.g. `/dev/nvme0n1p1`.
pub(super) fn partition_path(parent: &Path, number: u32) -> PathBuf {
    let parent = parent.to_string_lossy();
    if parent.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{parent}p{number}"))
    } else {
        PathBuf::from(format!("{parent}{number}"))
    }
}

/// Writes an empty partition table of type `ptable` on `path`.
pub(super) fn create_table(
    ctx: &HandlerContext,
    path: &Path,
    ptable: PartitionTableType,
) -> Result<(), StepError> {
    match ptable {
        PartitionTableType::Gpt => {
            sgdisk::zap_all(ctx.runner, path).step(Operation::CreatePartitionTable)?;
            sgdisk::clear(ctx.runner, path).step(Operation::CreatePartitionTable)
        }
        PartitionTableType::Msdos => {
            parted::mklabel(ctx.runner, path, "msdos").step(Operation::CreatePartitionTable)
        }
    }
}

fn geometry(ctx: &HandlerContext, partition: &Partition) -> Result<PartitionGeometry, StepError> {
    ctx.plan.layout().get(&partition.id).copied().ok_or_else(|| {
        StepError::new(
            Operation::Resolve,
            HandlerFailure::Internal {
                reason: format!("Partition '{}' has no computed geometry", partition.id),
            },
        )
    })
}

fn parent_table(
    ctx: &HandlerContext,
    partition: &Partition,
) -> Result<PartitionTableType, StepError> {
    ctx.entry(&partition.device)?.ptable().ok_or_else(|| {
        StepError::new(
            Operation::Resolve,
            HandlerFailure::Internal {
                reason: format!("Device '{}' declares no partition table", partition.device),
            },
        )
    })
}

pub(super) fn probe(
    ctx: &HandlerContext,
    partition: &Partition,
) -> Result<ProbeOutcome, StepError> {
    let parent = ctx.device_path(&partition.device)?;
    let geometry = geometry(ctx, partition)?;

    let Some(existing) = ctx.inventory.partition(parent, geometry.number) else {
        return Ok(ProbeOutcome::Missing);
    };

    // Extended partitions are reported with a nominal size.
    if geometry.role != PartitionRole::Extended {
        if let Some(size) = geometry.size_bytes() {
            if existing.size != size {
                return Ok(ProbeOutcome::Conflict(format!(
                    "partition {} of '{}' is {} bytes, expected {size}",
                    geometry.number,
                    parent.display(),
                    existing.size
                )));
            }
        }
    }

    Ok(ProbeOutcome::Satisfied(Some(Resolution::node(
        existing.path.clone(),
    ))))
}

pub(super) fn create(ctx: &HandlerContext, partition: &Partition) -> Result<Resolution, StepError> {
    let parent = ctx.device_path(&partition.device)?.to_path_buf();
    let geometry = geometry(ctx, partition)?;
    let ptable = parent_table(ctx, partition)?;
    let replaced = ctx.inventory.partition(&parent, geometry.number).is_some();

    match ptable {
        PartitionTableType::Gpt => {
            if replaced {
                sgdisk::delete_partition(ctx.runner, &parent, geometry.number)
                    .step(Operation::CreatePartition)?;
            }
            sgdisk::new_partition(
                ctx.runner,
                &parent,
                geometry.number,
                geometry.start_sector,
                geometry.end_sector(),
                PartitionFlag::gpt_typecode(partition.flag),
            )
            .step(Operation::CreatePartition)?;
        }
        PartitionTableType::Msdos => {
            if replaced {
                parted::rm(ctx.runner, &parent, geometry.number)
                    .step(Operation::CreatePartition)?;
            }
            let part_type = match geometry.role {
                PartitionRole::Primary => "primary",
                PartitionRole::Extended => "extended",
                PartitionRole::Logical => "logical",
            };
            parted::mkpart(
                ctx.runner,
                &parent,
                part_type,
                geometry.start_sector,
                geometry.end_sector(),
            )
            .step(Operation::CreatePartition)?;
            if let Some(flag) = partition.flag.and_then(|flag| flag.parted_flag()) {
                parted::set_flag(ctx.runner, &parent, geometry.number, flag)
                    .step(Operation::CreatePartition)?;
            }
        }
    }
    parted::partprobe(ctx.runner, &parent).step(Operation::CreatePartition)?;

    let path = partition_path(&parent, geometry.number);
    ctx.wait_for_device(&path)?;
    info!("Created partition '{}'", path.display());

    if let Some(mode) = partition.wipe {
        wipe::wipe(ctx, &path, mode)?;
    }

    Ok(Resolution::node(path))
}
