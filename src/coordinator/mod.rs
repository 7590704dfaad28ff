mod coordinator;
mod error;
mod types;

pub use coordinator::MeshCoordinator;
pub use error::{CoordinatorError, CoordinatorResult};
pub use types::{
    CreateDistressMessageInput, LocationInput, MaintenanceReport, MeshStats, RegisterDeviceInput,
};
