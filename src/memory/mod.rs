/*!
 * Memory Module
 * Page permissions and the kernel interface for address-space primitives
 */

pub mod perm;
pub mod traits;

// Re-export for convenience
pub use perm::{FaultCode, PteFlags};
pub use traits::*;
