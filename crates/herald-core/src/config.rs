// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

/// Herald core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Maximum database pool connections
    pub max_db_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `HERALD_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `HERALD_MAX_DB_CONNECTIONS`: Max pool connections (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("HERALD_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("HERALD_DATABASE_URL"))?;

        let max_db_connections: u32 = std::env::var("HERALD_MAX_DB_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("HERALD_MAX_DB_CONNECTIONS", "must be a positive integer")
            })?;

        Ok(Self {
            database_url,
            max_db_connections,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
