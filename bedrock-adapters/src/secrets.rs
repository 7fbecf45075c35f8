//! Secret storage.
//!
//! Keys take the form `path#field`; the field defaults to `value`.
//! `memory` keeps secrets in process, `vault+https://TOKEN@host:8200?mount=kv`
//! talks to a Vault KV v2 engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bedrock_core::{ConnectionUrl, UrlError};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};

use crate::error::{AdapterError, AdapterResult};

pub const DEFAULT_FIELD: &str = "value";

/// Split `path#field` into its parts.
pub fn split_key(key: &str) -> (&str, &str) {
    match key.split_once('#') {
        Some((path, field)) if !field.is_empty() => (path, field),
        Some((path, _)) => (path, DEFAULT_FIELD),
        None => (key, DEFAULT_FIELD),
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> AdapterResult<String>;

    async fn set(&self, key: &str, value: &str) -> AdapterResult<()>;
}

#[derive(Default)]
pub struct MemorySecrets {
    entries: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecrets {
    async fn get(&self, key: &str) -> AdapterResult<String> {
        let (path, field) = split_key(key);
        self.entries
            .read()
            .get(path)
            .and_then(|fields| fields.get(field))
            .cloned()
            .ok_or_else(|| AdapterError::SecretNotFound {
                key: key.to_string(),
            })
    }

    async fn set(&self, key: &str, value: &str) -> AdapterResult<()> {
        let (path, field) = split_key(key);
        self.entries
            .write()
            .entry(path.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }
}

/// Vault KV version 2.
pub struct VaultSecrets {
    base: String,
    mount: String,
    token: String,
    client: reqwest::Client,
}

impl VaultSecrets {
    pub fn new(base: impl Into<String>, mount: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            mount: mount.into(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_url(url: &ConnectionUrl) -> AdapterResult<Self> {
        let transport = url.transport().unwrap_or("https");
        let host = url
            .host()
            .ok_or_else(|| AdapterError::config("vault", "missing host"))?;
        let base = match url.port() {
            Some(port) => format!("{transport}://{host}:{port}"),
            None => format!("{transport}://{host}"),
        };
        let token = url
            .username()
            .map(|t| t.to_string())
            .or_else(|| std::env::var("VAULT_TOKEN").ok())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AdapterError::config("vault", "no token in url and VAULT_TOKEN unset"))?;
        let mount = url.param("mount").unwrap_or("secret");
        Ok(Self::new(base, mount, token))
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}/data/{}",
            self.base,
            self.mount,
            path.trim_start_matches('/')
        )
    }

    async fn read(&self, path: &str) -> AdapterResult<Option<Map<String, Value>>> {
        let response = self
            .client
            .get(self.data_url(path))
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AdapterError::Upstream {
                service: "vault",
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response.json().await?;
        Ok(body
            .pointer("/data/data")
            .and_then(|d| d.as_object())
            .cloned())
    }
}

#[async_trait]
impl SecretStore for VaultSecrets {
    async fn get(&self, key: &str) -> AdapterResult<String> {
        let (path, field) = split_key(key);
        let value = self
            .read(path)
            .await?
            .and_then(|mut data| data.remove(field))
            .ok_or_else(|| AdapterError::SecretNotFound {
                key: key.to_string(),
            })?;
        Ok(match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    /// Read-modify-write so other fields of the path survive.
    async fn set(&self, key: &str, value: &str) -> AdapterResult<()> {
        let (path, field) = split_key(key);
        let mut data = self.read(path).await?.unwrap_or_default();
        data.insert(field.to_string(), Value::String(value.to_string()));

        let response = self
            .client
            .post(self.data_url(path))
            .header("X-Vault-Token", &self.token)
            .json(&json!({ "data": data }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AdapterError::Upstream {
                service: "vault",
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        tracing::debug!(path = path, field = field, "secret written");
        Ok(())
    }
}

/// `memory` or `vault+http(s)://...`.
pub fn secrets_from_url(raw: &str) -> AdapterResult<Arc<dyn SecretStore>> {
    let url = ConnectionUrl::parse(raw)?;
    match url.base_scheme() {
        "memory" => Ok(Arc::new(MemorySecrets::new())),
        "vault" => Ok(Arc::new(VaultSecrets::from_url(&url)?)),
        _ => Err(UrlError::UnsupportedScheme {
            kind: "secrets",
            scheme: url.scheme().to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_default_to_the_value_field() {
        assert_eq!(split_key("db/main"), ("db/main", "value"));
        assert_eq!(split_key("db/main#password"), ("db/main", "password"));
        assert_eq!(split_key("db/main#"), ("db/main", "value"));
    }

    #[tokio::test]
    async fn memory_round_trip_per_field() {
        let store = MemorySecrets::new();
        store.set("db/main#user", "app").await.unwrap();
        store.set("db/main#password", "s3cret").await.unwrap();

        assert_eq!(store.get("db/main#user").await.unwrap(), "app");
        assert_eq!(store.get("db/main#password").await.unwrap(), "s3cret");
        assert!(matches!(
            store.get("db/main").await,
            Err(AdapterError::SecretNotFound { .. })
        ));
    }

    #[test]
    fn vault_urls_carry_token_and_mount() {
        let url = ConnectionUrl::parse("vault+http://root@127.0.0.1:8200?mount=kv").unwrap();
        let vault = VaultSecrets::from_url(&url).unwrap();
        assert_eq!(vault.data_url("app/db"), "http://127.0.0.1:8200/v1/kv/data/app/db");
        assert_eq!(vault.token, "root");
    }
}
