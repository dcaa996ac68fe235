use blockmeta_api::{
    config::Format,
    status::{DeviceHandle, Operation, StepError},
};
use osutils::{blkid, mkfs};

use super::{HandlerContext, ProbeOutcome, Resolution, StepResultExt};

/// Compares filesystem UUIDs the way tools print them, ignoring case and
/// dashes.
fn same_uuid(declared: &str, observed: &str) -> bool {
    let normalize = |uuid: &str| uuid.replace('-', "").to_ascii_lowercase();
    normalize(declared) == normalize(observed)
}

pub(super) fn probe(ctx: &HandlerContext, format: &Format) -> Result<ProbeOutcome, StepError> {
    let path = ctx.device_path(&format.volume)?;
    let Some((device, observed)) = ctx
        .inventory
        .device(path)
        .and_then(|device| Some((device, device.fstype.as_deref()?)))
    else {
        return Ok(ProbeOutcome::Missing);
    };

    if !format.fstype.matches_observed(observed) {
        return Ok(ProbeOutcome::Conflict(format!(
            "'{}' already holds a {observed} filesystem",
            path.display()
        )));
    }

    if let Some(uuid) = &format.uuid {
        let current = device.fs_uuid.as_deref().unwrap_or_default();
        if !same_uuid(uuid, current) {
            return Ok(ProbeOutcome::Conflict(format!(
                "the filesystem on '{}' has UUID '{current}', expected '{uuid}'",
                path.display()
            )));
        }
    }

    if let Some(label) = &format.label {
        let current = device.label.as_deref().unwrap_or_default();
        if label != current {
            return Ok(ProbeOutcome::Conflict(format!(
                "the filesystem on '{}' is labeled '{current}', expected '{label}'",
                path.display()
            )));
        }
    }

    Ok(ProbeOutcome::Satisfied(Some(Resolution {
        handle: DeviceHandle::Node(path.to_path_buf()),
        fs_uuid: device.fs_uuid.clone(),
    })))
}

pub(super) fn create(ctx: &HandlerContext, format: &Format) -> Result<Resolution, StepError> {
    let path = ctx.device_path(&format.volume)?;
    mkfs::run(
        ctx.runner,
        path,
        format.fstype,
        format.label.as_deref(),
        format.uuid.as_deref(),
    )
    .step(Operation::CreateFilesystem)?;
    ctx.settle()?;

    let fs_uuid = match &format.uuid {
        Some(uuid) => uuid.clone(),
        None => blkid::get_filesystem_uuid(ctx.runner, path).step(Operation::CreateFilesystem)?,
    };

    Ok(Resolution {
        handle: DeviceHandle::Node(path.to_path_buf()),
        fs_uuid: Some(fs_uuid),
    })
}
