//! Sahaay Mesh: store-and-forward relay of distress messages across an
//! intermittently connected device mesh.
//!
//! Messages are created on an origin device, relayed hop by hop to the
//! best-scoring neighbors, acknowledged by responders, and expired when
//! their deadline passes. Each hop is recorded as an immutable
//! [`model::MessageRoute`], forming a per-message route forest.

pub mod ack;
pub mod api;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod reaper;
pub mod registry;
pub mod routing;
pub mod store;
