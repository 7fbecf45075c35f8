//! bedrock-core: framework-agnostic core for Bedrock.
//!
//! Holds everything the other crates agree on: the error type, the
//! key/value configuration, the dependency-injection container, the
//! feature loader, tenants and their providers, and connection URLs.

pub mod auth;
pub mod config;
pub mod container;
pub mod dsn;
pub mod errors;
pub mod features;
pub mod i18n;
pub mod tenant;

pub use auth::Authentication;
pub use config::{Config, ConfigSnapshot};
pub use container::{Container, ContainerBuilder};
pub use dsn::{ConnectionUrl, UrlError};
pub use errors::{AppError, AppResult, ErrorKind};
pub use features::{resolve_order, Feature, FeatureBuilder, FeatureError};
pub use i18n::Translator;
pub use tenant::{
    tenant_provider_from_url, FileTenantProvider, HttpTenantProvider, StaticTenantProvider,
    Tenant, TenantId, TenantProvider, DEFAULT_TENANT,
};
