use crate::error::ConfigError;
use crate::models::Config;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const APP_NAME: &str = "ytdx";
const CONFIG_FILE: &str = "config.json";

/// Per-user application directory (`<local data dir>/ytdx`).
pub fn app_dir() -> Result<PathBuf, ConfigError> {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_NAME))
        .ok_or(ConfigError::NoDataDir)
}

/// Outcome of reading the settings document. Every variant carries a
/// complete config.
#[derive(Debug)]
pub enum ConfigLoad {
    Loaded(Config),
    Missing(Config),
    /// The file existed but could not be used; defaults were substituted.
    Recovered { config: Config, error: ConfigError },
}

impl ConfigLoad {
    pub fn into_config(self) -> Config {
        match self {
            ConfigLoad::Loaded(config) | ConfigLoad::Missing(config) => config,
            ConfigLoad::Recovered { config, .. } => config,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_location() -> Self {
        let dir = app_dir().unwrap_or_else(|_| PathBuf::from(".").join(APP_NAME));
        Self::at(dir.join(CONFIG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> ConfigLoad {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no config file, using defaults");
                return ConfigLoad::Missing(Config::default());
            }
            Err(source) => {
                let error = ConfigError::Io {
                    path: self.path.clone(),
                    source,
                };
                warn!(%error, "config unreadable, using defaults");
                return ConfigLoad::Recovered {
                    config: Config::default(),
                    error,
                };
            }
        };

        match parse_merged(&contents) {
            Ok(config) => ConfigLoad::Loaded(config),
            Err(error) => {
                warn!(%error, path = %self.path.display(), "config corrupt, using defaults");
                ConfigLoad::Recovered {
                    config: Config::default(),
                    error,
                }
            }
        }
    }

    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let contents = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, contents).map_err(io_err)?;
        debug!(path = %self.path.display(), "config saved");
        Ok(())
    }
}

/// Shallow-merges the persisted object over the defaults. A key whose value
/// does not fit keeps its default instead of failing the whole document.
fn parse_merged(contents: &str) -> Result<Config, ConfigError> {
    let persisted: Map<String, Value> = serde_json::from_str(contents)?;
    let mut merged = match serde_json::to_value(Config::default())? {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    for (key, value) in persisted {
        let mut candidate = merged.clone();
        candidate.insert(key.clone(), value);
        if serde_json::from_value::<Config>(Value::Object(candidate.clone())).is_ok() {
            merged = candidate;
        } else {
            warn!(key = %key, "ignoring invalid config value");
        }
    }

    Ok(serde_json::from_value(Value::Object(merged))?)
}
