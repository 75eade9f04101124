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

//! Configuration file handling for the `homefleet` binary.
//!
//! A TOML file is located via `--config`, `HOMEFLEET_CONFIG`, or the search
//! paths in [`ConfigLoader::new`]. `${VAR}`, `${VAR:-default}` and
//! `${VAR:?message}` references are expanded before parsing.

mod defaults;
mod error;
mod loader;
mod types;
mod validation;

pub use error::{ConfigError, ValidationError};
pub use loader::{ConfigLoader, CONFIG_ENV_VAR};
pub use types::*;
pub use validation::Validate;
