//! Declarative storage provisioning: converges the block devices, arrays,
//! volumes, filesystems and mounts declared in a storage document onto the
//! running system.

pub mod engine;
pub mod options;
pub mod probe;

pub use blockmeta_api::{
    error::{EngineError, ErrorKind},
    plan::StoragePlan,
    status::ApplyReport,
};
pub use engine::{AbortHandle, Engine};
pub use options::ApplyOptions;
pub use probe::{Inventory, Prober, SystemProber};
