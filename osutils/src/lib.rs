pub mod bcache;
pub mod blkid;
pub mod cryptsetup;
pub mod dd;
pub mod dependencies;
pub mod findmnt;
pub mod lsblk;
pub mod lvm;
pub mod mdadm;
pub mod mkfs;
pub mod modprobe;
pub mod mount;
pub mod parted;
pub mod sgdisk;
pub mod tabfile;
pub mod udevadm;
pub mod wipefs;
pub mod zfs;

#[cfg(any(test, feature = "test-utilities"))]
pub mod testutils;
