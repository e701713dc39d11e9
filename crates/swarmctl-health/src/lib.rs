pub mod config;
pub mod error;
pub mod monitor;

pub use config::HealthMonitorConfig;
pub use error::HealthError;
pub use monitor::HealthMonitor;
