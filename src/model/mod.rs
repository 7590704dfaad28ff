//! Core records shared by every component: locations, messages, devices
//! and hop records, plus the clock abstraction.

pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ModelError, ModelResult};
pub use types::{
    DeviceId, DeviceNode, DistressMessage, Location, MessageCategory, MessageId, MessageRoute,
    MessageStatus, Urgency,
};
