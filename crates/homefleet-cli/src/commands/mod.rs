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

//! Subcommand implementations.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use homefleet::{Database, DAL};
use tracing::debug;

use crate::config::{HomefleetConfig, Validate};

pub mod bootstrap;
pub mod jobs;
pub mod nodes;

/// Validates the configuration, opens the store and applies migrations.
pub async fn connect(config: &HomefleetConfig) -> Result<DAL> {
    config.validate().context("Invalid configuration")?;

    let database = Database::new(&config.database.url, config.database.pool_size)
        .context("Failed to connect to database")?;
    database
        .run_migrations()
        .await
        .context("Failed to run migrations")?;
    debug!(backend = database.backend().as_str(), "Database ready");

    Ok(DAL::new(database))
}

/// Parse a duration string like "30m", "24h", "1h30m" into a [`Duration`].
///
/// Supported units:
/// - `d` - days
/// - `h` - hours
/// - `m` - minutes
/// - `s` - seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    let mut total = Duration::ZERO;
    let mut current_num = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            current_num.push(c);
            continue;
        }
        if current_num.is_empty() {
            return Err(anyhow!(
                "Invalid duration format: expected number before '{}'",
                c
            ));
        }

        let num: u64 = current_num
            .parse()
            .with_context(|| format!("Invalid number in duration: {}", current_num))?;
        current_num.clear();

        let secs = match c {
            'd' => num.saturating_mul(86_400),
            'h' => num.saturating_mul(3_600),
            'm' => num.saturating_mul(60),
            's' => num,
            _ => return Err(anyhow!("Unknown duration unit: '{}'. Use d, h, m, or s", c)),
        };
        total = total.saturating_add(Duration::from_secs(secs));
    }

    if !current_num.is_empty() {
        return Err(anyhow!(
            "Duration '{}' is missing a unit. Use d (days), h (hours), m (minutes), or s (seconds)",
            s
        ));
    }

    if total.is_zero() {
        return Err(anyhow!("Duration must be greater than zero"));
    }

    Ok(total)
}
