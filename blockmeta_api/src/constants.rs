/// The only storage configuration document version understood by this crate.
pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

/// Top-level key under which a storage document may be nested.
pub const STORAGE_DOCUMENT_KEY: &str = "storage";

/// Logical sector size used for all partition geometry computations.
pub const SECTOR_SIZE: u64 = 512;

/// Partitions are aligned to 1 MiB boundaries.
pub const PARTITION_ALIGNMENT_SECTORS: u64 = 2048;

/// First usable sector for the first partition of a device.
pub const FIRST_PARTITION_SECTOR: u64 = PARTITION_ALIGNMENT_SECTORS;

/// Number assigned to the first logical partition of an msdos table.
pub const FIRST_LOGICAL_PARTITION_NUMBER: u32 = 5;

/// Maximum number of primary and extended partitions in an msdos table.
pub const MSDOS_MAX_PRIMARY_PARTITIONS: u32 = 4;

/// Maximum number of partitions in a GPT.
pub const GPT_MAX_PARTITIONS: u32 = 128;

/// Mount options used when a mount entry does not declare any.
pub const DEFAULT_MOUNT_OPTIONS: &str = "defaults";

/// Mount options recorded for swap entries.
pub const SWAP_MOUNT_OPTIONS: &str = "sw";

/// Path of the root mount point.
pub const ROOT_MOUNT_POINT_PATH: &str = "/";

/// Directory under which device-mapper nodes appear.
pub const DEV_MAPPER_DIR: &str = "/dev/mapper";

/// Directory under which named RAID arrays appear.
pub const DEV_MD_DIR: &str = "/dev/md";
