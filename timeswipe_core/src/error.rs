use thiserror::Error;

/// Failures surfaced by the driver, either synchronously or as error events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("configuration incomplete: {0}")]
    ConfigurationIncomplete(String),
    #[error("acquisition fault: {0}")]
    AcquisitionFault(String),
    #[error("stream is already running")]
    AlreadyRunning,
    #[error("stream is not running")]
    NotRunning,
}

impl DriverError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing sensor front end")]
    MissingFrontend,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub type DriverResult<T> = std::result::Result<T, DriverError>;
pub use eyre::Report;
