/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use crate::config::{ConfigError, HomefleetConfig};
use regex::Regex;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "HOMEFLEET_CONFIG";

pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("./homefleet.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("homefleet").join("config.toml"));
        }

        search_paths.push(PathBuf::from("/etc/homefleet/config.toml"));

        Self { search_paths }
    }

    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Load configuration from the given file, `HOMEFLEET_CONFIG`, or the
    /// first file found on the search paths. With none of those, the
    /// built-in defaults are used after environment substitution.
    pub fn load_config(&self, config_file: Option<&Path>) -> Result<HomefleetConfig, ConfigError> {
        let config_path = match config_file {
            Some(path) => Some(path.to_path_buf()),
            None => match env::var(CONFIG_ENV_VAR) {
                Ok(path) => Some(PathBuf::from(path)),
                Err(_) => self.find_config_file(),
            },
        };

        match config_path {
            Some(path) => {
                debug!(path = %path.display(), "Loading configuration file");
                self.load_config_from_file(&path)
            }
            None => {
                debug!("No configuration file found, using defaults");
                self.load_defaults()
            }
        }
    }

    pub fn load_config_from_file(&self, path: &Path) -> Result<HomefleetConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") | None => self.parse(&content),
            Some(ext) => Err(ConfigError::UnsupportedFormat {
                extension: ext.to_string(),
            }),
        }
    }

    /// The defaults, with their `${HOMEFLEET_*:-...}` references resolved.
    pub fn load_defaults(&self) -> Result<HomefleetConfig, ConfigError> {
        let rendered = toml::to_string(&HomefleetConfig::default())?;
        self.parse(&rendered)
    }

    fn parse(&self, content: &str) -> Result<HomefleetConfig, ConfigError> {
        let substituted = self.substitute_env_vars(content)?;
        Ok(toml::from_str::<HomefleetConfig>(&substituted)?)
    }

    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .find(|path| path.is_file())
            .cloned()
    }

    /// Substitute `${VAR}`, `${VAR:-default}` and `${VAR:?error}` references
    fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::EnvSubstitutionError(e.to_string()))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let replacement = self.process_var_expression(&cap[1])?;
            result = result.replace(full_match, &replacement);
        }

        Ok(result)
    }

    fn process_var_expression(&self, expr: &str) -> Result<String, ConfigError> {
        if let Some(default_pos) = expr.find(":-") {
            let var_name = &expr[..default_pos];
            let default_value = &expr[default_pos + 2..];
            Ok(env::var(var_name).unwrap_or_else(|_| default_value.to_string()))
        } else if let Some(error_pos) = expr.find(":?") {
            let var_name = &expr[..error_pos];
            let error_msg = &expr[error_pos + 2..];
            env::var(var_name).map_err(|_| {
                ConfigError::EnvSubstitutionError(format!(
                    "Required environment variable '{}' is not set: {}",
                    var_name, error_msg
                ))
            })
        } else {
            env::var(expr).map_err(|_| {
                ConfigError::EnvSubstitutionError(format!(
                    "Required environment variable '{}' is not set",
                    expr
                ))
            })
        }
    }

    pub fn get_search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
