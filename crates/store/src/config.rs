//! ClickHouse store configuration.

use serde::{Deserialize, Serialize};

/// ClickHouse backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// ClickHouse HTTP URL
    pub url: String,
    /// Database name
    #[serde(default = "default_database")]
    pub database: String,
    /// Username (optional)
    pub username: Option<String>,
    /// Password (optional)
    pub password: Option<String>,
    /// Connection pool size reported to the arbiter
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_database() -> String {
    "atrium".to_string()
}

fn default_pool_size() -> u32 {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: default_database(),
            username: None,
            password: None,
            pool_size: default_pool_size(),
        }
    }
}
