use std::sync::Arc;

use bedrock_core::AppError;

use crate::connection::Connection;
use crate::datasource::DataSource;

/// Connections attached to one request.
///
/// Inside the transaction middleware these are transaction-scoped
/// connections; elsewhere they are plain pool handles.
#[derive(Debug, Clone, Default)]
pub struct DbContext {
    pub default: Option<Connection>,
    pub tenant: Option<Connection>,
}

impl DbContext {
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.tenant.is_none()
    }
}

/// Picks the connection that applies to a request.
#[derive(Debug, Clone, Default)]
pub struct EntityManager {
    ds: Option<Arc<DataSource>>,
}

impl EntityManager {
    pub fn new(ds: Option<Arc<DataSource>>) -> Self {
        Self { ds }
    }

    pub fn data_source(&self) -> Option<&Arc<DataSource>> {
        self.ds.as_ref()
    }

    /// The tenant connection of the request, else its default connection,
    /// else the data source's default connection, else `None`.
    pub fn current(&self, ctx: &DbContext) -> Option<Connection> {
        ctx.tenant
            .clone()
            .or_else(|| ctx.default.clone())
            .or_else(|| self.default())
    }

    pub fn default(&self) -> Option<Connection> {
        self.ds.as_ref().map(|ds| ds.default_connection().clone())
    }

    /// Look a tenant connection up by id or slug.
    pub async fn tenant(&self, key: &str) -> anyhow::Result<Option<Connection>> {
        let ds = self
            .ds
            .as_ref()
            .ok_or_else(|| AppError::internal("no data source configured").into_anyhow())?;
        ds.connection(key)
            .await
            .map_err(|e| AppError::from(e).into_anyhow())
    }
}
