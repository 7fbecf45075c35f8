//! Core multi-tenant types for Bedrock.
//!
//! A tenant is a customer or organization with its own database connection
//! (or its own schema). Tenants come from a [`TenantProvider`]: a JSON/YAML
//! file, an HTTP endpoint, or a static list.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dsn::{ConnectionUrl, UrlError};

/// Identifier of the tenant owning the default connection.
pub const DEFAULT_TENANT: &str = "default";

/// A tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_TENANT
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "database_url", skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

impl Tenant {
    pub fn new(id: impl Into<String>, slug: impl Into<String>) -> Self {
        let id = id.into();
        let slug = slug.into();
        Self {
            name: slug.clone(),
            id,
            slug,
            database_url: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn tenant_id(&self) -> TenantId {
        TenantId::new(self.id.clone())
    }

    /// True when `key` names this tenant by id or slug.
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || (!self.slug.is_empty() && self.slug == key)
    }
}

#[async_trait]
pub trait TenantProvider: Send + Sync {
    /// Every tenant currently known to the provider.
    async fn tenants(&self) -> Result<Vec<Tenant>>;

    /// Look up one tenant by id or slug.
    async fn find(&self, key: &str) -> Result<Option<Tenant>> {
        Ok(self.tenants().await?.into_iter().find(|t| t.matches(key)))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TenantDocument {
    List(Vec<Tenant>),
    Wrapped { tenants: Vec<Tenant> },
}

impl TenantDocument {
    fn into_tenants(self) -> Vec<Tenant> {
        let tenants = match self {
            TenantDocument::List(t) => t,
            TenantDocument::Wrapped { tenants } => tenants,
        };
        tenants
            .into_iter()
            .map(|mut t| {
                if t.slug.is_empty() {
                    t.slug = t.id.clone();
                }
                if t.name.is_empty() {
                    t.name = t.slug.clone();
                }
                t
            })
            .collect()
    }
}

/// A fixed set of tenants.
#[derive(Debug, Clone, Default)]
pub struct StaticTenantProvider {
    tenants: Vec<Tenant>,
}

impl StaticTenantProvider {
    pub fn new(tenants: Vec<Tenant>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl TenantProvider for StaticTenantProvider {
    async fn tenants(&self) -> Result<Vec<Tenant>> {
        Ok(self.tenants.clone())
    }
}

/// Reads tenants from a JSON or YAML file on every scan.
#[derive(Debug, Clone)]
pub struct FileTenantProvider {
    path: PathBuf,
}

impl FileTenantProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl TenantProvider for FileTenantProvider {
    async fn tenants(&self) -> Result<Vec<Tenant>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading tenant file {}", self.path.display()))?;

        let is_yaml = matches!(
            self.path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        let doc: TenantDocument = if is_yaml {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("parsing tenant file {}", self.path.display()))?
        } else {
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing tenant file {}", self.path.display()))?
        };

        Ok(doc.into_tenants())
    }
}

/// Fetches tenants with a GET request on every scan.
#[derive(Debug, Clone)]
pub struct HttpTenantProvider {
    url: String,
    client: reqwest::Client,
}

impl HttpTenantProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl TenantProvider for HttpTenantProvider {
    async fn tenants(&self) -> Result<Vec<Tenant>> {
        let doc: TenantDocument = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("fetching tenants from {}", crate::dsn::redact(&self.url)))?
            .error_for_status()?
            .json()
            .await
            .context("decoding tenant list")?;
        Ok(doc.into_tenants())
    }
}

/// Pick a tenant provider by URL scheme: `file://` or `http(s)://`.
pub fn tenant_provider_from_url(url: &str) -> Result<Arc<dyn TenantProvider>> {
    let parsed = ConnectionUrl::parse(url)?;
    match parsed.scheme() {
        "file" => {
            let path = url::Url::parse(url.trim())
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .unwrap_or_else(|| PathBuf::from(url.trim().trim_start_matches("file://")));
            Ok(Arc::new(FileTenantProvider::new(path)))
        }
        "http" | "https" => Ok(Arc::new(HttpTenantProvider::new(url.trim()))),
        other => Err(UrlError::UnsupportedScheme {
            kind: "tenant provider",
            scheme: other.to_string(),
        }
        .into()),
    }
}
