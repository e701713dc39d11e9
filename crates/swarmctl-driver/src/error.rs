pub use swarmctl_domain::SwarmError as DriverError;
