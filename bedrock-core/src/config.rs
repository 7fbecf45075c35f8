//! # Configuration
//!
//! Bedrock keeps configuration as a flat string key/value store, set with
//! `set()` and read with `get()`. Applications layer it however they like;
//! the bundled helper reads environment variables with a prefix:
//!
//! ```rust
//! use bedrock_core::Config;
//!
//! let mut config = Config::new();
//! config.set("http.port", "8080");
//! assert_eq!(config.get("http.port"), Some("8080"));
//! ```
//!
//! `APP__DATABASE__URL=postgres://...` becomes `database.url` when loaded
//! with `Config::load_env("APP__")`.

use std::collections::HashMap;
use std::time::Duration;

/// Well-known configuration keys.
pub mod keys {
    pub const APP_NAME: &str = "app.name";
    pub const HTTP_HOST: &str = "http.host";
    pub const HTTP_PORT: &str = "http.port";
    pub const DATABASE_URL: &str = "database.url";
    pub const DATABASE_MAX_CONNECTIONS: &str = "database.max_connections";
    pub const DATABASE_CHANGELOG_PREFIX: &str = "database.changelog_prefix";
    pub const TENANTS_URL: &str = "tenants.url";
    pub const TENANT_FROM_HOST: &str = "tenant.from_host";
    pub const CACHE_URL: &str = "cache.url";
    pub const PUBSUB_URL: &str = "pubsub.url";
    pub const SECRETS_URL: &str = "secrets.url";
    pub const EMAIL_URL: &str = "email.url";
    pub const JWT_SECRET: &str = "auth.jwt.secret";
    pub const JWT_ISSUER: &str = "auth.jwt.issuer";
    pub const JWT_AUDIENCE: &str = "auth.jwt.audience";
    pub const JWT_EXPIRES_IN: &str = "auth.jwt.expires_in";
    pub const JWT_ALGORITHM: &str = "auth.jwt.algorithm";
    pub const AUTH_PROVIDER_URL: &str = "auth.provider.url";
    pub const IDEMPOTENCY_TTL: &str = "idempotency.ttl";
    pub const I18N_DEFAULT_LOCALE: &str = "i18n.default_locale";
    pub const ASSETS_DIR: &str = "assets.dir";
    pub const LOG_LEVEL: &str = "log.level";
    pub const LOG_FORMAT: &str = "log.format";
}

#[derive(Debug, Default, Clone)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Build a config from the process environment (see [`Config::load_env`]).
    pub fn from_env(prefix: &str) -> Self {
        let mut config = Self::new();
        config.load_env(prefix);
        config
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Set a key only when it is not present yet.
    pub fn set_default<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Import every `PREFIX`-ed environment variable.
    ///
    /// `APP__PAGINATE__DEFAULT` with prefix `APP__` becomes `paginate.default`.
    pub fn load_env(&mut self, prefix: &str) {
        self.load_vars(prefix, std::env::vars());
    }

    pub(crate) fn load_vars<I>(&mut self, prefix: &str, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                if !normalized.is_empty() {
                    self.set(normalized, value);
                }
            }
        }
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot::new(self.values.clone())
    }
}

/// Read-only view of the configuration handed to features and handlers.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    map: HashMap<String, String>,
}

impl ConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map
            .get(key)
            .map(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(|s| s.to_string())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.trim().parse::<u32>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
    }

    /// Durations use humantime syntax: `30s`, `15m`, `1h 30m`.
    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        self.get(key)
            .and_then(|v| humantime::parse_duration(v.trim()).ok())
    }

    /// Comma separated list, blanks dropped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
