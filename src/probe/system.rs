use std::path::{Path, PathBuf};

use log::debug;

use blockmeta_api::error::{EngineError, ProbeError, ReportError};
use osutils::{
    dependencies::CommandRunner,
    findmnt::FindMnt,
    lsblk::{self, BlockDevice},
    lvm, mdadm, zfs,
};

use super::{
    Inventory, ProbedDevice, ProbedLogicalVolume, ProbedMount, ProbedRaid, ProbedVolumeGroup,
    ProbedZpool, Prober,
};

/// Probes the host with lsblk, mdadm, the LVM tools, the ZFS tools and
/// findmnt. RAID, LVM and ZFS tools are only run when lsblk shows objects of
/// that kind, so that they are not required on systems without them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProber;

impl Prober for SystemProber {
    #[tracing::instrument(skip_all)]
    fn probe(&self, runner: &dyn CommandRunner) -> Result<Inventory, EngineError> {
        let mut inventory = Inventory {
            block_devices: flatten(lsblk::list(runner).structured(ProbeError::ListBlockDevices)?),
            ..Default::default()
        };

        let has_fstype = |fstype: &str| {
            inventory
                .block_devices
                .iter()
                .any(|d| d.fstype.as_deref() == Some(fstype))
        };
        let probe_raid = inventory.block_devices.iter().any(ProbedDevice::is_raid)
            || has_fstype("linux_raid_member");
        let probe_lvm = inventory.block_devices.iter().any(|d| d.device_type == "lvm")
            || has_fstype("LVM2_member");
        let probe_zfs = has_fstype("zfs_member");

        if probe_raid {
            inventory.raid_arrays = mdadm::details(runner)
                .structured(ProbeError::ListRaidArrays)?
                .into_iter()
                .map(|detail| ProbedRaid {
                    path: detail.raid_path,
                    name: detail.name,
                    level: detail.level,
                    uuid: detail.uuid,
                    devices: detail.devices,
                })
                .collect();
        }

        if probe_lvm {
            let physical_volumes =
                lvm::physical_volumes(runner).structured(ProbeError::ListLvm)?;
            inventory.volume_groups = lvm::volume_groups(runner)
                .structured(ProbeError::ListLvm)?
                .into_iter()
                .map(|vg| ProbedVolumeGroup {
                    physical_volumes: physical_volumes
                        .iter()
                        .filter(|pv| pv.vg_name == vg.vg_name)
                        .map(|pv| pv.pv_name.clone())
                        .collect(),
                    name: vg.vg_name,
                    extent_size: vg.vg_extent_size,
                })
                .collect();
            inventory.logical_volumes = lvm::logical_volumes(runner)
                .structured(ProbeError::ListLvm)?
                .into_iter()
                .map(|lv| ProbedLogicalVolume {
                    name: lv.lv_name,
                    volume_group: lv.vg_name,
                    path: lv.lv_path,
                    size: lv.lv_size,
                })
                .collect();
        }

        if probe_zfs {
            inventory.zpools = zfs::zpool_list(runner)
                .structured(ProbeError::ListZfs)?
                .into_iter()
                .map(|pool| ProbedZpool {
                    name: pool.name,
                    vdevs: pool.vdevs,
                })
                .collect();
            inventory.zfs_datasets = zfs::zfs_list(runner).structured(ProbeError::ListZfs)?;
        }

        inventory.mounts = FindMnt::run(runner)
            .structured(ProbeError::ListMounts)?
            .mounts()
            .into_iter()
            .map(|mount| ProbedMount {
                target: mount.target.clone(),
                source: mount.source_device().map(Path::to_path_buf),
                fstype: mount.fstype.clone(),
            })
            .collect();

        debug!(
            "Probed {} block device(s), {} RAID array(s), {} volume group(s), {} zpool(s) and {} mount(s)",
            inventory.block_devices.len(),
            inventory.raid_arrays.len(),
            inventory.volume_groups.len(),
            inventory.zpools.len(),
            inventory.mounts.len()
        );

        Ok(inventory)
    }
}

/// Flattens the lsblk tree. Devices with several parents (RAID arrays,
/// bcache devices) appear once per parent in the tree and once in the
/// result.
fn flatten(devices: Vec<BlockDevice>) -> Vec<ProbedDevice> {
    fn visit(device: BlockDevice, parent: Option<&Path>, out: &mut Vec<ProbedDevice>) {
        let path = device.name.clone();
        match out.iter_mut().find(|d| d.path == path) {
            Some(existing) => {
                if let Some(parent) = parent {
                    if !existing.parents.iter().any(|p| p == parent) {
                        existing.parents.push(parent.to_path_buf());
                    }
                }
            }
            None => out.push(ProbedDevice {
                path: path.clone(),
                device_type: device.device_type,
                size: device.size,
                serial: device.serial,
                ptable: device
                    .partition_table_type
                    .filter(|_| parent.is_none() || device.partition_number.is_none()),
                parents: parent.map(Path::to_path_buf).into_iter().collect::<Vec<PathBuf>>(),
                partition_number: device.partition_number,
                start_sector: device.start,
                fstype: device.fstype,
                fs_uuid: device.fs_uuid,
                label: device.label,
            }),
        }

        for child in device.children.into_iter().flatten() {
            visit(child, Some(&path), out);
        }
    }

    let mut out = Vec::new();
    for device in devices {
        visit(device, None, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use osutils::testutils::MockRunner;

    use super::*;

    const LSBLK: &str = indoc! {r#"
        {
            "blockdevices": [
                {"name": "/dev/sda", "type": "disk", "size": 17179869184, "serial": "QM00001", "pttype": "gpt",
                 "pkname": null, "partn": null, "start": null, "fstype": null, "uuid": null, "label": null, "mountpoint": null,
                 "children": [
                    {"name": "/dev/sda1", "type": "part", "size": 3221225472, "serial": null, "pttype": "gpt",
                     "pkname": "/dev/sda", "partn": 1, "start": 2048, "fstype": "linux_raid_member",
                     "uuid": "6245349d-505a-367b-6ceb-a75f7f55c158", "label": "md0", "mountpoint": null,
                     "children": [
                        {"name": "/dev/md0", "type": "raid1", "size": 3220176896, "serial": null, "pttype": null,
                         "pkname": "/dev/sda1", "partn": null, "start": null, "fstype": "ext4",
                         "uuid": "2b4d5c7e-3b5a-4c3e-9a8f-0d8b7a6e5f4c", "label": null, "mountpoint": "/target"}
                     ]}
                 ]},
                {"name": "/dev/sdb", "type": "disk", "size": 17179869184, "serial": "QM00002", "pttype": "gpt",
                 "pkname": null, "partn": null, "start": null, "fstype": null, "uuid": null, "label": null, "mountpoint": null,
                 "children": [
                    {"name": "/dev/sdb1", "type": "part", "size": 3221225472, "serial": null, "pttype": "gpt",
                     "pkname": "/dev/sdb", "partn": 1, "start": 2048, "fstype": "linux_raid_member",
                     "uuid": "6245349d-505a-367b-6ceb-a75f7f55c158", "label": "md0", "mountpoint": null,
                     "children": [
                        {"name": "/dev/md0", "type": "raid1", "size": 3220176896, "serial": null, "pttype": null,
                         "pkname": "/dev/sdb1", "partn": null, "start": null, "fstype": "ext4",
                         "uuid": "2b4d5c7e-3b5a-4c3e-9a8f-0d8b7a6e5f4c", "label": null, "mountpoint": "/target"}
                     ]}
                 ]}
            ]
        }
    "#};

    const MDADM: &str = indoc! {r#"
        ARRAY /dev/md0 level=raid1 num-devices=2 metadata=1.2 name=md0 UUID=6245349d:505a367b:6ceba75f:7f55c158
           devices=/dev/sda1,/dev/sdb1
    "#};

    const FINDMNT: &str = indoc! {r#"
        {
            "filesystems": [
                {"target": "/", "source": "/dev/vda1", "fstype": "ext4", "options": "rw",
                 "children": [
                    {"target": "/target", "source": "/dev/md0", "fstype": "ext4", "options": "rw"}
                 ]}
            ]
        }
    "#};

    #[test]
    fn test_probe() {
        let runner = MockRunner::new();
        runner
            .respond("lsblk", LSBLK)
            .respond("mdadm --detail --scan --verbose", MDADM)
            .respond("findmnt", FINDMNT);

        let inventory = SystemProber.probe(&runner).unwrap();

        assert_eq!(inventory.block_devices.len(), 5);
        let md0 = inventory.device(Path::new("/dev/md0")).unwrap();
        assert_eq!(
            md0.parents,
            [PathBuf::from("/dev/sda1"), PathBuf::from("/dev/sdb1")]
        );
        assert_eq!(md0.fstype.as_deref(), Some("ext4"));

        // Partitions report the table of their parent, which is not theirs.
        assert_eq!(
            inventory.device(Path::new("/dev/sda1")).unwrap().ptable,
            None
        );
        assert_eq!(
            inventory.device(Path::new("/dev/sda")).unwrap().ptable.as_deref(),
            Some("gpt")
        );

        assert_eq!(inventory.raid_arrays.len(), 1);
        assert_eq!(inventory.raid_arrays[0].level, "raid1");
        assert_eq!(
            inventory.mount_at(Path::new("/target")).unwrap().source.as_deref(),
            Some(Path::new("/dev/md0"))
        );

        // No LVM or ZFS objects, so their tools were not needed.
        assert_eq!(
            runner.calls(),
            [
                "lsblk --json --path --bytes --output \
                    NAME,TYPE,SIZE,SERIAL,PTTYPE,PKNAME,PARTN,START,FSTYPE,UUID,LABEL,MOUNTPOINT",
                "mdadm --detail --scan --verbose",
                "findmnt --json -o target,source,fstype,options",
            ]
        );
    }

    #[test]
    fn test_probe_failure() {
        let runner = MockRunner::new();
        runner.fail("lsblk", 1, "lsblk: unknown column");

        let error = SystemProber.probe(&runner).unwrap_err();
        assert_eq!(error.to_string(), "Failed to list block devices");
    }
}
