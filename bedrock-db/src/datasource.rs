//! The multi-tenant data source.
//!
//! Owns the default connection and one connection per tenant. Tenants are
//! registered under both their id and their slug and resolve to the same
//! [`Connection`]. Unknown keys trigger a single re-scan of the tenant
//! provider; re-scans are serialized.

use std::collections::HashMap;
use std::sync::Arc;

use bedrock_core::{Tenant, TenantProvider, DEFAULT_TENANT};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::connection::{ConnectOptions, Connection};
use crate::dsn::{DatabaseUrl, Dialect};
use crate::error::{DbError, DbResult};
use crate::migrations::{MigrationScope, MigrationSet, Migrator};

pub struct DataSourceOptions {
    pub url: String,
    pub connect: ConnectOptions,
    pub changelog_prefix: Option<String>,
    pub migrations: MigrationSet,
    pub tenants: Option<Arc<dyn TenantProvider>>,
}

impl DataSourceOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect: ConnectOptions::default(),
            changelog_prefix: None,
            migrations: MigrationSet::default(),
            tenants: None,
        }
    }

    pub fn with_migrations(mut self, migrations: MigrationSet) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn with_tenants(mut self, provider: Arc<dyn TenantProvider>) -> Self {
        self.tenants = Some(provider);
        self
    }

    pub fn with_changelog_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.changelog_prefix = Some(prefix.into());
        self
    }

    pub fn with_connect_options(mut self, connect: ConnectOptions) -> Self {
        self.connect = connect;
        self
    }
}

pub struct DataSource {
    default: Connection,
    default_url: DatabaseUrl,
    connect: ConnectOptions,
    migrations: MigrationSet,
    migrator: Migrator,
    provider: Option<Arc<dyn TenantProvider>>,
    tenants: RwLock<HashMap<String, Connection>>,
    known: RwLock<Vec<Tenant>>,
    rescan: Mutex<()>,
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("default", &self.default)
            .field("tenants", &self.tenant_ids())
            .finish()
    }
}

impl DataSource {
    /// Open the default connection, run shared migrations, then connect and
    /// migrate every tenant the provider knows. Any failure aborts.
    pub async fn init(options: DataSourceOptions) -> DbResult<Arc<Self>> {
        let default_url = DatabaseUrl::parse(&options.url)?;
        let migrator = Migrator::new(options.changelog_prefix.as_deref());

        let default = Connection::open(default_url.clone(), DEFAULT_TENANT, &options.connect).await?;
        migrator
            .run(&default, options.migrations.get(MigrationScope::Shared))
            .await?;

        let ds = Arc::new(Self {
            default,
            default_url,
            connect: options.connect,
            migrations: options.migrations,
            migrator,
            provider: options.tenants,
            tenants: RwLock::new(HashMap::new()),
            known: RwLock::new(Vec::new()),
            rescan: Mutex::new(()),
        });

        if ds.provider.is_some() {
            let added = ds.scan().await?;
            tracing::info!(tenants = added, "tenant connections ready");
        }
        Ok(ds)
    }

    pub fn default_connection(&self) -> &Connection {
        &self.default
    }

    pub fn provider(&self) -> Option<&Arc<dyn TenantProvider>> {
        self.provider.as_ref()
    }

    /// Connection for a tenant id or slug. The default tenant maps to the
    /// default connection. Unknown keys re-scan the provider once and yield
    /// `None` if still absent.
    pub async fn connection(&self, key: &str) -> DbResult<Option<Connection>> {
        if key == DEFAULT_TENANT {
            return Ok(Some(self.default.clone()));
        }
        if let Some(conn) = self.try_connection(key) {
            return Ok(Some(conn));
        }
        if self.provider.is_none() {
            return Ok(None);
        }

        let _guard = self.rescan.lock().await;
        // Another request may have finished the scan while we waited.
        if let Some(conn) = self.try_connection(key) {
            return Ok(Some(conn));
        }
        tracing::debug!(tenant = key, "unknown tenant, rescanning provider");
        self.scan_locked().await?;
        Ok(self.try_connection(key))
    }

    /// Lookup without touching the provider.
    pub fn try_connection(&self, key: &str) -> Option<Connection> {
        self.tenants.read().get(key).cloned()
    }

    /// Tenant metadata for an id or slug, from the last scan.
    pub fn tenant(&self, key: &str) -> Option<Tenant> {
        self.known.read().iter().find(|t| t.matches(key)).cloned()
    }

    /// Ids of every connected tenant, sorted.
    pub fn tenant_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.known.read().iter().map(|t| t.id.clone()).collect();
        ids.sort();
        ids
    }

    /// Pick up tenants added to the provider since the last scan.
    pub async fn refresh(&self) -> DbResult<usize> {
        let _guard = self.rescan.lock().await;
        self.scan_locked().await
    }

    async fn scan(&self) -> DbResult<usize> {
        let _guard = self.rescan.lock().await;
        self.scan_locked().await
    }

    async fn scan_locked(&self) -> DbResult<usize> {
        let Some(provider) = &self.provider else {
            return Ok(0);
        };
        let tenants = provider.tenants().await.map_err(DbError::Provider)?;

        let mut added = 0;
        for tenant in tenants {
            if tenant.id == DEFAULT_TENANT || self.is_known(&tenant.id) {
                continue;
            }
            self.check_keys(&tenant)?;
            let conn = self.connect_tenant(&tenant).await?;

            {
                let mut map = self.tenants.write();
                map.insert(tenant.id.clone(), conn.clone());
                if !tenant.slug.is_empty() && tenant.slug != tenant.id {
                    map.insert(tenant.slug.clone(), conn);
                }
            }
            self.known.write().push(tenant);
            added += 1;
        }
        Ok(added)
    }

    fn is_known(&self, id: &str) -> bool {
        self.known.read().iter().any(|t| t.id == id)
    }

    /// A tenant's id and slug must not resolve to anyone else.
    fn check_keys(&self, tenant: &Tenant) -> DbResult<()> {
        let keys = std::iter::once(tenant.id.as_str())
            .chain((!tenant.slug.is_empty()).then_some(tenant.slug.as_str()));
        for key in keys {
            let owner = if key == DEFAULT_TENANT {
                Some(DEFAULT_TENANT.to_string())
            } else {
                self.known
                    .read()
                    .iter()
                    .find(|t| t.matches(key))
                    .map(|t| t.id.clone())
            };
            if let Some(owner) = owner {
                return Err(DbError::TenantKeyConflict {
                    tenant: tenant.id.clone(),
                    key: key.to_string(),
                    owner,
                });
            }
        }
        Ok(())
    }

    async fn connect_tenant(&self, tenant: &Tenant) -> DbResult<Connection> {
        let url = match tenant.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(raw) => DatabaseUrl::parse(raw)?,
            None => self.derive_url(tenant)?,
        };

        let conn = Connection::open(url, &tenant.id, &self.connect).await?;
        self.migrator
            .run(&conn, self.migrations.get(MigrationScope::for_tenant(&tenant.id)))
            .await?;

        tracing::info!(tenant = %tenant.id, slug = %tenant.slug, "tenant connected");
        Ok(conn)
    }

    /// Tenants without their own URL share the default Postgres database
    /// under schema `tenant_<id>`.
    fn derive_url(&self, tenant: &Tenant) -> DbResult<DatabaseUrl> {
        match self.default_url.dialect() {
            Dialect::Postgres => self.default_url.with_schema(&format!("tenant_{}", tenant.id)),
            Dialect::Sqlite => Err(DbError::NoTenantUrl {
                tenant: tenant.id.clone(),
                dialect: Dialect::Sqlite.to_string(),
            }),
        }
    }

    pub async fn close(&self) {
        let conns: Vec<Connection> = self.tenants.read().values().cloned().collect();
        for conn in conns {
            conn.close().await;
        }
        self.default.close().await;
    }
}
