//! Configuration for the CMP back end.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{error, LevelFilter};
use serde::{de, Deserialize, Deserializer};

//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults {}

impl ConfigDefaults {
    fn log_level() -> LevelFilter {
        LevelFilter::Info
    }
    fn log_type() -> LogType {
        LogType::File
    }
    fn log_file() -> PathBuf {
        PathBuf::from("./cmpd.log")
    }
    fn database_path() -> PathBuf {
        PathBuf::from("./data/cmpd.db")
    }
    fn confirm_wait_secs() -> i64 {
        300
    }
    fn require_explicit_confirm() -> bool {
        false
    }
    fn send_ca_cert() -> bool {
        false
    }
    fn pending_sweep_secs() -> u64 {
        600
    }
    fn crls_to_keep() -> usize {
        10
    }
}

//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "deserialize_log_level"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    /// Where the certificate store database lives.
    #[serde(default = "ConfigDefaults::database_path")]
    pub database_path: PathBuf,

    /// How long a requestor gets to confirm an issued certificate.
    #[serde(default = "ConfigDefaults::confirm_wait_secs")]
    pub confirm_wait_secs: i64,

    /// If true, implicit confirmation requests are refused and every
    /// enrollment must be confirmed explicitly.
    #[serde(default = "ConfigDefaults::require_explicit_confirm")]
    pub require_explicit_confirm: bool,

    /// Include the CA certificate in enrollment responses.
    #[serde(default = "ConfigDefaults::send_ca_cert")]
    pub send_ca_cert: bool,

    /// How often the pending pool is swept for expired entries.
    #[serde(default = "ConfigDefaults::pending_sweep_secs")]
    pub pending_sweep_secs: u64,

    /// How many historic CRLs to retain in the store.
    #[serde(default = "ConfigDefaults::crls_to_keep")]
    pub crls_to_keep: usize,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Stderr,
    File,
}

/// # Accessors
impl Config {
    pub fn confirm_wait(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.confirm_wait_secs.max(0))
    }
}

/// # Create
impl Config {
    pub fn read_config(file: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read_to_string(file).map_err(|e| {
            ConfigError::other(format!(
                "cannot read config file '{}': {}",
                file.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.confirm_wait_secs < 0 {
            return Err(ConfigError::other("confirm_wait_secs must not be negative"));
        }
        if self.pending_sweep_secs == 0 {
            return Err(ConfigError::other("pending_sweep_secs must not be zero"));
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn test_config() -> Self {
        Config {
            log_level: LevelFilter::Debug,
            log_type: LogType::Stderr,
            log_file: ConfigDefaults::log_file(),
            database_path: ConfigDefaults::database_path(),
            confirm_wait_secs: ConfigDefaults::confirm_wait_secs(),
            require_explicit_confirm: false,
            send_ca_cert: false,
            pending_sweep_secs: ConfigDefaults::pending_sweep_secs(),
            crls_to_keep: ConfigDefaults::crls_to_keep(),
        }
    }
}

/// # Set up logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.dispatch(fern::Dispatch::new()).chain(io::stderr()).apply().map_err(|e| {
                ConfigError::other(format!("cannot initialize logging: {e}"))
            }),
        }
    }

    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = fern::log_file(path).map_err(|e| {
            ConfigError::other(format!(
                "cannot open log file '{}': {}",
                path.display(),
                e
            ))
        })?;
        self.dispatch(fern::Dispatch::new())
            .chain(file)
            .apply()
            .map_err(|e| ConfigError::other(format!("cannot initialize logging: {e}")))
    }

    fn dispatch(&self, dispatch: fern::Dispatch) -> fern::Dispatch {
        dispatch
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} [{}] [{}] {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(self.log_level)
    }
}

fn deserialize_log_level<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(|_| {
        de::Error::custom(format!("unrecognized log level: {string}"))
    })
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Toml(toml::de::Error),
    Other(String),
}

impl ConfigError {
    pub fn other(msg: impl Into<String>) -> Self {
        ConfigError::Other(msg.into())
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConfigError::Toml(e) => e.fmt(f),
            ConfigError::Other(msg) => msg.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        error!("config file cannot be parsed");
        ConfigError::Toml(e)
    }
}

//============ Tests =========================================================
