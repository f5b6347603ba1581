use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssignmentError {
    /// Rule set or catalog is unusable; surfaced at load time, never per request.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
