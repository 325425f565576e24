// Order execution
pub mod executor;

pub use executor::{execute_signal, position_size, ExecutionResult};
