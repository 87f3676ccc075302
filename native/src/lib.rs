pub mod config;
pub mod constants;
pub mod conversions;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod pipe;
pub mod process;

use log::{debug, info};
use std::time::Instant;

// Re-export the types hosts use most.
pub use config::ProbeConfig;
pub use constants::NativeCode;
pub use error::{ErrorKind, ProbeError, Result};
pub use pipe::{IoOutcome, PipeState, WaitOutcome};
pub use process::{AccountName, ProcessIoCounters, ProcessMemoryInfo, ProcessParameter};

/// Initialize logging, the crash logger and the process configuration.
///
/// Safe to call more than once; only the first call installs anything.
pub fn initialize() -> &'static ProbeConfig {
    if let Some(existing) = config::installed() {
        debug!("[INIT] Already initialized");
        return existing;
    }

    let start = Instant::now();
    logging::init_logger();
    logging::init_crash_logger();
    let installed = config::init(ProbeConfig::from_env());
    info!(
        "[INIT] host-probe {} ready in {:?} (pipe: {})",
        get_version(),
        start.elapsed(),
        installed.pipe_name
    );
    installed
}

pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
