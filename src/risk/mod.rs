// Risk management module
pub mod hold_guard;

pub use hold_guard::{GuardOutcome, HoldGuard, HoldGuardConfig};
