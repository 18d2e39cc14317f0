// Settings: JSON pipeline configuration with environment overrides.

pub mod store;
pub mod types;
