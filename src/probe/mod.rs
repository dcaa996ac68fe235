//! Inspection of the storage objects already present on the system.

use blockmeta_api::error::EngineError;
use osutils::dependencies::CommandRunner;

mod inventory;
mod system;

pub use inventory::{
    Inventory, ProbedDevice, ProbedLogicalVolume, ProbedMount, ProbedRaid, ProbedVolumeGroup,
    ProbedZpool,
};
pub use system::SystemProber;

/// Builds an inventory of the system. Probing never changes anything.
pub trait Prober {
    fn probe(&self, runner: &dyn CommandRunner) -> Result<Inventory, EngineError>;
}
