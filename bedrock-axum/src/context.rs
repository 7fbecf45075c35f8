use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use bedrock_core::errors::AppError;
use bedrock_core::{Authentication, Tenant};
use bedrock_db::DbContext;

/// Per-request state filled in by the middleware pipeline.
///
/// Handlers take it as an extractor. Outside the pipeline (a bare router in
/// a test) it extracts as an empty context.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub locale: String,
    pub tenant: Option<Tenant>,
    pub auth: Option<Authentication>,
    pub db: DbContext,
}

impl RequestContext {
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant.as_ref().map(|t| t.id.as_str())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.auth.as_ref().map(|a| a.user_id.as_str())
    }

    pub fn require_auth(&self) -> anyhow::Result<&Authentication> {
        self.auth
            .as_ref()
            .ok_or_else(|| AppError::unauthorized("authentication required").into_anyhow())
    }

    pub fn require_tenant(&self) -> anyhow::Result<&Tenant> {
        self.tenant
            .as_ref()
            .ok_or_else(|| AppError::bad_request("tenant is required").into_anyhow())
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Take the context out of a request for editing; put it back with
/// `req.extensions_mut().insert(ctx)`.
pub(crate) fn take_context(req: &mut axum::extract::Request) -> RequestContext {
    req.extensions_mut()
        .remove::<RequestContext>()
        .unwrap_or_default()
}
