//! Runtime error types.

use thiserror::Error;

use tether_framework::DependencyError;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A matcher declaration was rejected at registration.
    #[error("Failed to register matcher: {0}")]
    Registration(#[from] DependencyError),

    /// A global subscriber is already installed.
    #[error("Logging already initialized: {0}")]
    LoggingInit(#[from] tracing_subscriber::util::TryInitError),

    /// The rolling log file could not be opened.
    #[error("Failed to open log file: {0}")]
    LogFile(#[from] tracing_appender::rolling::InitError),

    /// Listening for the shutdown signal failed.
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
