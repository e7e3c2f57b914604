//! Layered configuration loading with figment.
//!
//! Sources, lowest priority first:
//!
//! 1. [`TetherConfig::default`]
//! 2. Programmatic [`ConfigLoader::merge`] values
//! 3. A profile-specific file (`tether.{profile}.toml`)
//! 4. The main file (`tether.toml` / `config.toml`, or the YAML equivalents
//!    with `yaml-config`)
//! 5. `TETHER_*` environment variables, `__` separating nested keys:
//!    `TETHER_ENGINE__SESSION_EXPIRE_TIMEOUT_SECS=300` sets
//!    `engine.session_expire_timeout_secs`
//!
//! Files are looked up in the current directory and in
//! `<config dir>/tether` unless search paths are given. `TETHER_PROFILE`
//! picks the profile.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("deploy/tether.toml")
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::TetherConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "TETHER_";
const PROFILE_VAR: &str = "TETHER_PROFILE";

#[cfg(feature = "toml-config")]
const TOML_NAMES: &[&str] = &["tether.toml", "config.toml"];
#[cfg(feature = "yaml-config")]
const YAML_NAMES: &[&str] = &["tether.yaml", "tether.yml", "config.yaml", "config.yml"];

/// Deployment profile selecting an extra configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Reads `TETHER_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|name| Self::parse(&name))
            .unwrap_or_default()
    }

    fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_owned()),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder for a validated [`TetherConfig`].
pub struct ConfigLoader {
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a directory to search. Replaces the default locations.
    pub fn search_path(mut self, path: impl AsRef<Path>) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Loads exactly this file instead of searching. It must exist.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Layers `config` over the defaults, below files and environment.
    pub fn merge(mut self, config: TetherConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Loads, extracts and validates the configuration.
    pub fn load(self) -> ConfigResult<TetherConfig> {
        let profile = self.profile.clone();
        let config: TetherConfig = self.figment()?.extract()?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            session_expire_timeout_secs = config.engine.session_expire_timeout_secs,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Builds the layered figment without extracting it.
    pub fn figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(TetherConfig::default()))
            .merge(self.overrides.clone());

        match &self.config_file {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration file");
                figment = merge_file(figment, path)?;
            }
            Some(path) => return Err(ConfigError::FileNotFound(path.clone())),
            None => figment = self.search(figment),
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }
        Ok(figment)
    }

    fn resolved_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join("tether")))
            .collect()
    }

    #[cfg_attr(
        not(any(feature = "toml-config", feature = "yaml-config")),
        allow(unused_mut)
    )]
    fn search(&self, mut figment: Figment) -> Figment {
        let paths = self.resolved_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (merged, hit) = self.search_format(figment, &paths, TOML_NAMES, |f, p| {
                f.merge(Toml::file(p))
            });
            figment = merged;
            found |= hit;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (merged, hit) = self.search_format(figment, &paths, YAML_NAMES, |f, p| {
                f.merge(Yaml::file(p))
            });
            figment = merged;
            found |= hit;
        }

        if !found {
            warn!("No configuration file found, using defaults");
        }
        figment
    }

    /// Merges the first main file found, preceded by its profile variant.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn search_format(
        &self,
        mut figment: Figment,
        paths: &[PathBuf],
        names: &[&str],
        merge: impl Fn(Figment, &Path) -> Figment,
    ) -> (Figment, bool) {
        for dir in paths {
            for name in names {
                let Some((stem, ext)) = name.rsplit_once('.') else {
                    continue;
                };

                let profiled = dir.join(format!("{stem}.{}.{ext}", self.profile));
                if profiled.exists() {
                    debug!(path = %profiled.display(), "Loading profile configuration file");
                    figment = merge(figment, &profiled);
                }

                let main = dir.join(name);
                if main.exists() {
                    info!(path = %main.display(), "Loading configuration file");
                    return (merge(figment, &main), true);
                }
            }
        }
        (figment, false)
    }
}

fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    match ext {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_owned())),
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<TetherConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path`, with environment overrides.
pub fn load_config_from_file(path: impl AsRef<Path>) -> ConfigResult<TetherConfig> {
    ConfigLoader::new().file(path).load()
}
