use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use blockmeta_api::{
    config::Raid,
    status::{Operation, StepError},
};
use osutils::mdadm;

use super::{partition, HandlerContext, ProbeOutcome, Resolution, StepResultExt};

pub(super) fn probe(ctx: &HandlerContext, raid: &Raid) -> Result<ProbeOutcome, StepError> {
    let path = raid.device_path();
    let mut declared = ctx.device_paths(&raid.devices)?;
    declared.extend(ctx.device_paths(&raid.spare_devices)?);

    let Some(existing) = ctx.inventory.raid(&path, &raid.name) else {
        return Ok(ProbeOutcome::Missing);
    };

    let level: &str = raid.raidlevel.into();
    if existing.level != level {
        return Ok(ProbeOutcome::Conflict(format!(
            "RAID array '{}' is {}, expected {level}",
            existing.path.display(),
            existing.level
        )));
    }

    let declared = declared.iter().map(PathBuf::as_path).collect::<BTreeSet<_>>();
    let observed = existing
        .devices
        .iter()
        .map(PathBuf::as_path)
        .collect::<BTreeSet<&Path>>();
    if declared != observed {
        return Ok(ProbeOutcome::Conflict(format!(
            "RAID array '{}' is made of {}",
            existing.path.display(),
            observed
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    Ok(ProbeOutcome::Satisfied(Some(Resolution::node(
        existing.path.clone(),
    ))))
}

/// Creates the array from its members in declared order.
pub(super) fn create(ctx: &HandlerContext, raid: &Raid) -> Result<Resolution, StepError> {
    let path = raid.device_path();
    let devices = ctx.device_paths(&raid.devices)?;
    let spares = ctx.device_paths(&raid.spare_devices)?;

    mdadm::create(
        ctx.runner,
        &mdadm::CreateArray {
            raid_path: &path,
            name: &raid.name,
            level: raid.raidlevel.into(),
            metadata: &ctx.options.mdadm_metadata,
            devices: &devices,
            spares: &spares,
        },
    )
    .step(Operation::CreateRaid)?;
    ctx.wait_for_device(&path)?;

    if let Some(ptable) = raid.ptable {
        partition::create_table(ctx, &path, ptable)?;
        ctx.settle()?;
    }

    Ok(Resolution::node(path))
}
