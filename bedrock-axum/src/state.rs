use std::sync::Arc;

use bedrock_adapters::IdempotencyStore;
use bedrock_auth::{AuthProvider, TokenProvider};
use bedrock_core::{ConfigSnapshot, Container, TenantProvider, Translator};
use bedrock_db::{Connection, DataSource, EntityManager};

use crate::context::RequestContext;

/// Shared router state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<StateInner>,
}

pub(crate) struct StateInner {
    pub config: ConfigSnapshot,
    pub container: Container,
    pub data_source: Option<Arc<DataSource>>,
    pub entity_manager: EntityManager,
    pub tenants: Option<Arc<dyn TenantProvider>>,
    pub auth_provider: Option<Arc<dyn AuthProvider>>,
    pub tokens: Option<Arc<TokenProvider>>,
    pub translator: Arc<Translator>,
    pub idempotency: Option<IdempotencyStore>,
    pub tenant_from_host: bool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("container", &self.inner.container)
            .field("data_source", &self.inner.data_source.is_some())
            .field("tenants", &self.inner.tenants.is_some())
            .field("auth_provider", &self.inner.auth_provider.is_some())
            .field("tokens", &self.inner.tokens.is_some())
            .finish()
    }
}

impl AppState {
    pub(crate) fn new(inner: StateInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.inner.config
    }

    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    pub fn data_source(&self) -> Option<&Arc<DataSource>> {
        self.inner.data_source.as_ref()
    }

    pub fn entity_manager(&self) -> &EntityManager {
        &self.inner.entity_manager
    }

    pub fn tenants(&self) -> Option<&Arc<dyn TenantProvider>> {
        self.inner.tenants.as_ref()
    }

    pub fn auth_provider(&self) -> Option<&Arc<dyn AuthProvider>> {
        self.inner.auth_provider.as_ref()
    }

    pub fn tokens(&self) -> Option<&Arc<TokenProvider>> {
        self.inner.tokens.as_ref()
    }

    pub fn translator(&self) -> &Translator {
        &self.inner.translator
    }

    pub fn idempotency(&self) -> Option<&IdempotencyStore> {
        self.inner.idempotency.as_ref()
    }

    pub fn tenant_from_host(&self) -> bool {
        self.inner.tenant_from_host
    }

    /// The connection a handler should use: tenant, then default.
    pub fn connection(&self, ctx: &RequestContext) -> Option<Connection> {
        self.inner.entity_manager.current(&ctx.db)
    }

    /// Like [`AppState::connection`], but a missing database is an internal error.
    pub fn require_connection(&self, ctx: &RequestContext) -> anyhow::Result<Connection> {
        self.connection(ctx).ok_or_else(|| {
            bedrock_core::AppError::internal("no database configured").into_anyhow()
        })
    }

    pub fn translate(&self, ctx: &RequestContext, key: &str, args: &[(&str, &str)]) -> String {
        self.inner.translator.translate(&ctx.locale, key, args)
    }
}
