//! Persisted fleet inventory

pub mod atomic;
pub mod inventory;
pub mod lock;

pub use atomic::write_atomic;
pub use inventory::InventoryRepository;
pub use lock::InventoryLock;
