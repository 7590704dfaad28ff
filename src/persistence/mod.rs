//! SQLite archive of messages, devices and routes.
//!
//! The in-memory components stay authoritative; the archive is written
//! through and read back on restart.

pub mod archive;
pub mod error;

pub use archive::{ArchiveConfig, ArchiveSnapshot, MeshArchive};
pub use error::{ArchiveError, ArchiveResult};
