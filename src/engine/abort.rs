use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::info;
use signal_hook::consts::signal::{SIGINT, SIGTERM};

use blockmeta_api::error::{EngineError, EngineResultExt, EnvironmentError, ReportError};

/// Requests that an apply run stop starting new entries. The entry being
/// applied when the request arrives still finishes.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            info!("Abort requested");
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sets the flag when the process receives SIGINT or SIGTERM.
    pub fn register_signals(&self) -> Result<(), EngineError> {
        for signal in [SIGTERM, SIGINT] {
            signal_hook::flag::register(signal, Arc::clone(&self.flag))
                .structured(EnvironmentError::RegisterSignalHandlers)
                .message(format!("Failed to register handler for signal {signal}"))?;
        }
        Ok(())
    }
}
