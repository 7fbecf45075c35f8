//! Route registration for features.
//!
//! Every route registered through [`Routes`] gets the per-route part of the
//! request pipeline, innermost last:
//!
//! 1. tenant resolution
//! 2. auth/permission guard
//! 3. idempotent replay (POST/PUT/PATCH with `Idempotency-Key`)
//! 4. per-request transaction (unless disabled)
//!
//! Routers merged or nested as-is keep only the global layers.

use std::collections::HashSet;
use std::sync::Arc;

use axum::handler::Handler;
use axum::http::Method;
use axum::middleware::from_fn_with_state;
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::Router;
use serde::Serialize;

use crate::mcp::{Tool, ToolSet};
use crate::middlewares::{guard, idempotency, tenant, transaction, RouteState};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOptions {
    pub authenticated: bool,
    pub permissions: Vec<String>,
    pub tenant_required: bool,
    pub transactional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            authenticated: false,
            permissions: Vec::new(),
            tenant_required: false,
            transactional: true,
            summary: None,
        }
    }
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    /// Require a permission; implies an authenticated caller.
    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.authenticated = true;
        self.permissions.push(permission.into());
        self
    }

    pub fn tenant_required(mut self) -> Self {
        self.tenant_required = true;
        self
    }

    pub fn without_transaction(mut self) -> Self {
        self.transactional = false;
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

/// What the OpenAPI document is generated from.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDoc {
    pub method: String,
    pub path: String,
    pub feature: Option<String>,
    pub options: RouteOptions,
}

pub struct Routes {
    state: AppState,
    router: Router<AppState>,
    docs: Vec<RouteDoc>,
    seen: HashSet<(String, String)>,
    tools: ToolSet,
    feature: Option<String>,
    errors: Vec<String>,
}

impl Routes {
    pub(crate) fn new(state: AppState) -> Self {
        Self {
            state,
            router: Router::new(),
            docs: Vec::new(),
            seen: HashSet::new(),
            tools: ToolSet::default(),
            feature: None,
            errors: Vec::new(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn get<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route_with(Method::GET, path, RouteOptions::default(), handler)
    }

    pub fn post<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route_with(Method::POST, path, RouteOptions::default(), handler)
    }

    pub fn put<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route_with(Method::PUT, path, RouteOptions::default(), handler)
    }

    pub fn patch<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route_with(Method::PATCH, path, RouteOptions::default(), handler)
    }

    pub fn delete<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route_with(Method::DELETE, path, RouteOptions::default(), handler)
    }

    pub fn get_with<H, T>(&mut self, path: &str, options: RouteOptions, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route_with(Method::GET, path, options, handler)
    }

    pub fn post_with<H, T>(&mut self, path: &str, options: RouteOptions, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route_with(Method::POST, path, options, handler)
    }

    pub fn put_with<H, T>(&mut self, path: &str, options: RouteOptions, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route_with(Method::PUT, path, options, handler)
    }

    pub fn patch_with<H, T>(&mut self, path: &str, options: RouteOptions, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route_with(Method::PATCH, path, options, handler)
    }

    pub fn delete_with<H, T>(&mut self, path: &str, options: RouteOptions, handler: H) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route_with(Method::DELETE, path, options, handler)
    }

    /// Register a handler for one method. A second registration of the same
    /// method and path is reported when the app is built.
    pub fn route_with<H, T>(
        &mut self,
        method: Method,
        path: &str,
        options: RouteOptions,
        handler: H,
    ) -> &mut Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        let filter = match MethodFilter::try_from(method.clone()) {
            Ok(filter) => filter,
            Err(_) => {
                self.errors.push(format!("unsupported method {method} for {path}"));
                return self;
            }
        };
        if !self.seen.insert((method.to_string(), path.to_string())) {
            self.errors.push(format!("route registered twice: {method} {path}"));
            return self;
        }

        self.docs.push(RouteDoc {
            method: method.to_string(),
            path: path.to_string(),
            feature: self.feature.clone(),
            options: options.clone(),
        });

        let endpoint = self.pipeline(on(filter, handler), options);
        self.router = std::mem::take(&mut self.router).route(path, endpoint);
        tracing::debug!(%method, path, feature = ?self.feature, "route registered");
        self
    }

    fn pipeline(&self, endpoint: MethodRouter<AppState>, options: RouteOptions) -> MethodRouter<AppState> {
        let route = RouteState {
            app: self.state.clone(),
            options: Arc::new(options),
        };

        let mut endpoint: MethodRouter<AppState> = endpoint;
        if route.options.transactional {
            endpoint = endpoint.layer(from_fn_with_state(route.clone(), transaction::transaction));
        }
        endpoint = endpoint.layer(from_fn_with_state(route.clone(), idempotency::idempotency));
        endpoint = endpoint.layer(from_fn_with_state(route.clone(), guard::guard));
        endpoint.layer(from_fn_with_state(route, tenant::tenant))
    }

    /// Merge a plain axum router. Its routes skip the per-route pipeline.
    pub fn merge(&mut self, router: Router<AppState>) -> &mut Self {
        self.router = std::mem::take(&mut self.router).merge(router);
        self
    }

    /// Nest a plain axum router under `path`. Its routes skip the per-route pipeline.
    pub fn nest(&mut self, path: &str, router: Router<AppState>) -> &mut Self {
        self.router = std::mem::take(&mut self.router).nest(path, router);
        self
    }

    /// Expose a tool on the `/mcp` endpoint.
    pub fn tool<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool + 'static,
    {
        let name = tool.name().to_string();
        if !self.tools.insert(Arc::new(tool)) {
            self.errors.push(format!("tool registered twice: {name}"));
        }
        self
    }

    pub fn docs(&self) -> &[RouteDoc] {
        &self.docs
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub(crate) fn set_feature(&mut self, feature: Option<&str>) {
        self.feature = feature.map(str::to_string);
    }

    pub(crate) fn errors(&self) -> &[String] {
        &self.errors
    }

    pub(crate) fn into_parts(self) -> (Router<AppState>, Vec<RouteDoc>, ToolSet) {
        (self.router, self.docs, self.tools)
    }
}
