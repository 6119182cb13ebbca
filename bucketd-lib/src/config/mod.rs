mod loader;
mod telemetry;
mod types;

pub use loader::{load_from_path, validate};
pub use telemetry::LoggingConfig;
pub use types::{BucketConfig, Config, QueueConfig, TableConfig, DEFAULT_PORT};
