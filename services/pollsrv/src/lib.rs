//! Modbus polling engine
//!
//! A per-network scheduler that turns a catalog of points into an orderly
//! stream of Modbus transactions over RTU (serial) or TCP, applies
//! per-point read/write semantics, and reports results back through the
//! store abstraction.

// Module declarations
pub mod api;
pub mod config;
pub mod error;
pub mod modbus;
pub mod module;
pub mod polling;
pub mod pollqueue;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{PollError, Result};
pub use modbus::ModbusClient;
pub use module::ModbusModule;
pub use pollqueue::NetworkPollManager;
pub use store::{MemoryStore, Store};

use tracing::error;

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix).
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                error!(
                    "Failed to install SIGTERM handler: {}. Service will only respond to Ctrl+C",
                    e
                );
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(mut sig) = term_signal {
                    sig.recv().await;
                } else {
                    std::future::pending::<()>().await
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
