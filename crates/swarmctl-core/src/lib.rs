pub mod controller;
pub mod error;

pub use controller::{ControllerStatus, ProviderStatus, SwarmController};
pub use error::ControllerError;
