pub mod cloud;
pub mod container;
pub mod driver;
pub mod error;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cloud::CloudDriver;
pub use container::ContainerDriver;
pub use driver::{Driver, ExecResult, LogBatch, LogEntry, LogLevel, LogOptions, PartialInstanceSpec};
pub use error::DriverError;
pub use registry::DriverRegistry;
