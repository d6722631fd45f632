use std::net::Ipv4Addr;
use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the fleet manager
#[derive(Error, Debug)]
pub enum FleetError {
    // Configuration / inventory errors (fatal at startup)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Inventory file {path} is unreadable: {source}")]
    InventoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed inventory line {line} in {path}: {reason}")]
    MalformedInventory {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Inventory {0} is locked by another process")]
    InventoryLocked(PathBuf),

    // Provider errors
    #[error("Provisioning failed: {0}")]
    Provision(String),

    #[error("Proxy not found: {0}")]
    ProxyNotFound(Ipv4Addr),

    // Load balancer errors
    #[error("Load balancer config write failed: {0}")]
    LbWrite(String),

    #[error("Load balancer reload failed: {0}")]
    LbReload(String),

    // Side-channel errors
    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("Bootstrap of {address} failed: {reason}")]
    Bootstrap { address: Ipv4Addr, reason: String },

    #[error("Command `{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for fleet operations
pub type Result<T> = std::result::Result<T, FleetError>;

impl FleetError {
    /// Process exit code used when a one-shot command fails with this error
    pub fn exit_code(&self) -> u8 {
        match self {
            FleetError::InvalidConfig(_)
            | FleetError::InventoryUnreadable { .. }
            | FleetError::MalformedInventory { .. } => 78,

            FleetError::InventoryLocked(_) => 75,

            FleetError::Provision(_)
            | FleetError::ProxyNotFound(_)
            | FleetError::LbWrite(_)
            | FleetError::LbReload(_)
            | FleetError::Notify(_)
            | FleetError::Bootstrap { .. }
            | FleetError::CommandFailed { .. }
            | FleetError::Io(_)
            | FleetError::Json(_) => 1,
        }
    }

    /// Startup configuration or inventory corruption; the process must not continue
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FleetError::InvalidConfig(_)
                | FleetError::InventoryUnreadable { .. }
                | FleetError::MalformedInventory { .. }
        )
    }
}
