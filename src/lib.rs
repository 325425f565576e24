// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod execution;
pub mod forecast;
pub mod indicators;
pub mod models;
pub mod prompt;
pub mod risk;

// Re-export commonly used types
pub use api::*;
pub use models::*;
pub use risk::{GuardOutcome, HoldGuard, HoldGuardConfig};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
