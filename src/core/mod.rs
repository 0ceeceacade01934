/*!
 * Core Module
 * Fundamental types, layout constants, configuration and error handling
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use config::{ForkConfig, ForkPolicy, Layout};
pub use errors::*;
pub use types::*;
