//! Periodic sweep that moves overdue messages to EXPIRED.

pub mod reaper;

pub use reaper::{ExpiryReaper, ReaperConfig};
