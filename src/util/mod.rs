/// Error types and Result alias
pub mod error;
/// TCP tuning helpers
pub mod net;
/// Connection-draining shutdown support
pub mod shutdown;

pub use error::*;
pub use shutdown::ConnTracker;
