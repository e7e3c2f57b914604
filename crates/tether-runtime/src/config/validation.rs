//! Configuration validation.

use tether_framework::Settings;

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, TetherConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &TetherConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_engine(&config.engine)?;
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File
        && logging
            .file_path
            .as_ref()
            .is_some_and(|path| path.file_name().is_none())
    {
        return Err(ConfigError::validation(
            "logging.file_path must name a file",
        ));
    }
    Ok(())
}

fn validate_engine(engine: &Settings) -> ConfigResult<()> {
    if engine.session_expire_timeout_secs == 0 {
        return Err(ConfigError::validation(
            "engine.session_expire_timeout_secs must be greater than 0",
        ));
    }

    if engine.command_start.is_empty() {
        return Err(ConfigError::validation(
            "engine.command_start must list at least one prefix (use \"\" for none)",
        ));
    }

    if engine.command_sep.iter().any(String::is_empty) {
        return Err(ConfigError::validation(
            "engine.command_sep cannot contain an empty separator",
        ));
    }

    Ok(())
}
