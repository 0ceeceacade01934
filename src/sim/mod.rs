/*!
 * Simulation Module
 * In-memory exokernel backing the fork library in tests and the demo
 */

mod audit;
mod frames;
mod machine;
mod process;

// Re-export for convenience
pub use audit::Violation;
pub use frames::FrameId;
pub use machine::{Machine, MachineConfig, MachineStats};
pub use process::SimProcess;
