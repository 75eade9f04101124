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

use crate::config::defaults::PLACEHOLDER_API_KEY;
use crate::config::{types::*, ValidationError};
use homefleet::database::BackendType;

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

impl Validate for HomefleetConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = self.database.validate() {
            errors.push(e);
        }
        if let Err(e) = self.node.validate() {
            errors.push(e);
        }
        if let Err(e) = self.circuit_breaker.validate() {
            errors.push(e);
        }
        if let Err(e) = self.health.validate() {
            errors.push(e);
        }
        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple { errors }),
        }
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if BackendType::from_url(&self.url).is_err() {
            return Err(ValidationError::InvalidDatabaseUrl {
                url: self.url.clone(),
            });
        }

        if self.pool_size == 0 || self.pool_size > 100 {
            return Err(ValidationError::InvalidPoolSize {
                size: self.pool_size,
            });
        }

        Ok(())
    }
}

impl Validate for NodeSection {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "node.id",
                reason: "must not be empty".into(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "node.name",
                reason: "must not be empty".into(),
            });
        }
        if self.api_key.is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "node.api_key",
                reason: "must not be empty".into(),
            });
        }
        if self.api_key == PLACEHOLDER_API_KEY {
            return Err(ValidationError::InvalidValue {
                field: "node.api_key",
                reason: "still the shipped placeholder; set HOMEFLEET_API_KEY".into(),
            });
        }
        if let Some(endpoint) = &self.api_endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ValidationError::InvalidValue {
                    field: "node.api_endpoint",
                    reason: format!("'{}' is not an http(s) URL", endpoint),
                });
            }
        }
        Ok(())
    }
}

impl Validate for CircuitBreakerSection {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::InvalidValue {
                field: "circuit_breaker.failure_threshold",
                reason: "must be at least 1".into(),
            });
        }
        if self.half_open_successes == 0 {
            return Err(ValidationError::InvalidValue {
                field: "circuit_breaker.half_open_successes",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

impl Validate for HealthSection {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.offline_after < 1 {
            return Err(ValidationError::InvalidValue {
                field: "health.offline_after",
                reason: "must be at least 1".into(),
            });
        }
        if self.interval_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "health.interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

impl Validate for LoggingSection {
    fn validate(&self) -> Result<(), ValidationError> {
        match self.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ValidationError::InvalidLogLevel {
                level: self.level.clone(),
            }),
        }
    }
}
