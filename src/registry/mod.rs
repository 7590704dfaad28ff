//! Device Registry
//!
//! Tracks which devices exist, whether they are online, when they were last
//! heard from, and who they can currently reach. The registry is an explicit
//! handle shared by reference with the routing engine, so several meshes can
//! live in one process.

pub mod registry;
pub mod types;

pub use registry::DeviceRegistry;
pub use types::{DeviceUpdate, PeerView, RegistryConfig, RegistryEvent};
