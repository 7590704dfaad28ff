//! Acknowledgment propagation back along the route forest.

pub mod error;
pub mod propagator;
pub mod types;

pub use error::{AckError, AckResult};
pub use propagator::AckPropagator;
pub use types::AckReceipt;
