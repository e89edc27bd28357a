//! Shared configuration, error taxonomy, and logging setup for the
//! patch-repair workspace.

pub mod config;
pub mod error;
pub mod logging;

pub use config::RepairConfig;
pub use error::RepairError;
