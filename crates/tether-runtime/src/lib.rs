//! Tether Runtime - the composition root of a Tether application.
//!
//! This crate provides:
//! - Layered configuration (`tether.toml`, profiles, `TETHER_*` variables)
//! - Logging setup on `tracing-subscriber`
//! - [`TetherRuntime`], owning the process-wide dispatcher and sweeping
//!   expired sessions until shutdown
//!
//! ```rust,ignore
//! use tether_runtime::TetherRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = TetherRuntime::new()?;
//!     runtime.register(runtime.on_command(["echo"]).handle(echo))?;
//!
//!     // hand `runtime.clone()` to adapters, which call `spawn` per event
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, LoggingConfig, TetherConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{RuntimeBuilder, RuntimeStats, TetherRuntime};

// Re-export tracing for use by other crates
pub use tracing;

/// Logging macros for handler code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
