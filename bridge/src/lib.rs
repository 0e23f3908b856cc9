pub mod api;
pub mod coordinator;
pub mod display_sync;
pub mod error;
pub mod host;
pub mod mqtt;
pub mod ports;
pub mod provisioner;
pub mod store;

#[cfg(test)]
mod testing;

pub use coordinator::{ActionOutcome, Coordinator, DeviceDiagnostics};
pub use error::{BridgeError, Result};
