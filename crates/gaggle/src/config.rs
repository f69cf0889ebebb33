//! Application configuration.
//!
//! Layered as defaults, then the TOML config file, then environment
//! variables (`GAGGLE__SECTION__KEY`).

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::api::StateOptions;
use crate::auth::AuthConfig;
use crate::hub::HubConfig;

pub const APP_NAME: &str = "gaggle";

/// Prefix of environment overrides, as in `GAGGLE__SERVER__PORT`.
pub const ENV_PREFIX: &str = "GAGGLE";

/// File name of the database inside the data directory.
pub const DATABASE_FILE: &str = "gaggle.db";

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub features: FeaturesConfig,
    pub session: SessionConfig,
    pub hub: HubConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Overrides the platform data directory.
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub chat_enabled: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self { chat_enabled: true }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session lifetime in hours. 0 keeps sessions until logout.
    pub ttl_hours: u64,
}

impl SessionConfig {
    pub fn ttl(&self) -> Option<Duration> {
        ttl_from_hours(self.ttl_hours)
    }
}

/// Session lifetime for a count of hours; 0 means no expiry.
pub fn ttl_from_hours(hours: u64) -> Option<Duration> {
    (hours > 0).then(|| Duration::from_secs(hours.saturating_mul(3600)))
}

impl AppConfig {
    /// Load configuration from `file` (optional) and the environment.
    pub fn load(file: &Path, env_prefix: &str) -> Result<Self> {
        let built = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080_i64)?
            .set_default("features.chat_enabled", true)?
            .add_source(
                File::from(file)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix(env_prefix).separator("__"))
            .build()
            .with_context(|| format!("reading config from {}", file.display()))?;

        let config: AppConfig = built
            .try_deserialize()
            .context("parsing configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.auth.validate().context("invalid [auth] section")?;
        Ok(())
    }

    /// Write the defaults to `path` as commented TOML, creating its directory.
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating config directory {}", dir.display()))?;
        }

        let toml = toml::to_string_pretty(&Self::default())
            .context("serializing default config to TOML")?;
        let body = format!("# {APP_NAME} configuration\n# File: {}\n\n{toml}", path.display());
        fs::write(path, body).with_context(|| format!("writing config file {}", path.display()))
    }

    /// Runtime options for [`crate::api::AppState`].
    pub fn state_options(&self) -> StateOptions {
        StateOptions {
            auth: self.auth.clone(),
            hub: self.hub.clone(),
            chat_enabled: self.features.chat_enabled,
            session_ttl: self.session.ttl(),
        }
    }
}

/// Where the config file and the data directory live.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Platform locations, or `config_override` for the config file. A
    /// directory override means `config.toml` inside it.
    pub fn discover(config_override: Option<&Path>) -> Result<Self> {
        let config_file = match config_override {
            Some(path) => {
                let path = expand_path(path)?;
                if path.is_dir() { path.join(CONFIG_FILE) } else { path }
            }
            None => xdg_dir("XDG_CONFIG_HOME", dirs::config_dir(), &[".config"])?.join(CONFIG_FILE),
        };

        Ok(Self {
            config_file,
            data_dir: xdg_dir("XDG_DATA_HOME", dirs::data_dir(), &[".local", "share"])?,
        })
    }

    /// Apply `paths.data_dir` from the loaded config.
    pub fn with_config(mut self, config: &AppConfig) -> Result<Self> {
        if let Some(dir) = &config.paths.data_dir {
            self.data_dir = expand_path(Path::new(dir))?;
        }
        Ok(self)
    }

    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

impl fmt::Display for AppPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config: {}, data: {}",
            self.config_file.display(),
            self.data_dir.display()
        )
    }
}

/// `$VAR/gaggle` when set, else the platform directory, else under home.
fn xdg_dir(var: &str, platform: Option<PathBuf>, home_parts: &[&str]) -> Result<PathBuf> {
    if let Some(dir) = env::var_os(var).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }
    if let Some(dir) = platform {
        return Ok(dir.join(APP_NAME));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    Ok(home_parts
        .iter()
        .fold(home, |path, part| path.join(part))
        .join(APP_NAME))
}

/// Expand `~` and environment variables.
fn expand_path(path: &Path) -> Result<PathBuf> {
    let Some(text) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    let expanded = shellexpand::full(text)
        .with_context(|| format!("expanding path {text}"))?;
    Ok(PathBuf::from(expanded.into_owned()))
}
