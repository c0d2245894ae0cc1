pub mod bridge;
pub mod cli;
pub mod config;
pub mod protocol;

use std::sync::{Mutex, MutexGuard};

pub use bridge::BridgeServer;
pub use cli::{Command, PrintHandler, prompt};
pub use config::BridgeConfig;
pub use protocol::{CorrelationEngine, Handler};

/// Locks `m`, ignoring poisoning. Every structure guarded this way stays consistent
/// between individual operations, so a panicked holder leaves nothing half-updated.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
