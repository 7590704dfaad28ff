//! Store-and-forward relay: target selection, hop records and hand-offs.

pub mod engine;
pub mod error;
pub mod pool;
pub mod route_log;
pub mod scoring;
pub mod transport;
pub mod types;

pub use engine::RoutingEngine;
pub use error::{RelayError, RelayResult};
pub use pool::RelayPool;
pub use route_log::{RouteError, RouteLog, RouteResult};
pub use transport::{HandOffError, LoopbackTransport, PeerTransport};
pub use types::{
    HopLimits, RelayHalt, RelayJob, RelayOutcome, RelayReport, RoutingConfig, RoutingStats,
    ScoreWeights, SkipReason, SkippedTarget,
};
