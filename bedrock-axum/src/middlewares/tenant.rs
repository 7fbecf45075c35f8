use std::collections::HashMap;

use axum::extract::rejection::RawPathParamsRejection;
use axum::extract::{Query, RawPathParams, Request, State};
use axum::http::header::HOST;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bedrock_core::{AppError, Tenant, DEFAULT_TENANT};
use bedrock_db::Connection;

use super::{RouteState, TENANT_HEADER};
use crate::context::take_context;
use crate::error::ApiError;
use crate::state::AppState;

const TENANT_PARAMS: [&str; 2] = ["tenantId", "tenant"];

/// Resolve the tenant of the request and attach its connection.
///
/// Sources, first match wins: path param, `tenantId` query param,
/// `X-TenantId` header, host subdomain (when enabled), the caller's token.
pub async fn tenant(
    State(route): State<RouteState>,
    params: Result<RawPathParams, RawPathParamsRejection>,
    mut req: Request,
    next: Next,
) -> Response {
    let mut ctx = take_context(&mut req);
    let key = tenant_key(
        params.as_ref().ok(),
        &req,
        route.app.tenant_from_host(),
        ctx.auth.as_ref().and_then(|a| a.tenant_id.as_deref()),
    );

    match key {
        Some(key) if key != DEFAULT_TENANT => match resolve(&route.app, &key).await {
            Ok((tenant, connection)) => {
                if let Some(claimed) = ctx.auth.as_ref().and_then(|a| a.tenant_id.as_deref()) {
                    if !tenant.matches(claimed) {
                        tracing::debug!(tenant = %tenant.id, claimed, "tenant does not match the caller");
                        return ApiError::from(AppError::forbidden("tenant not accessible")).into_response();
                    }
                }
                tracing::trace!(tenant = %tenant.id, "tenant resolved");
                ctx.tenant = Some(tenant);
                ctx.db.tenant = connection;
            }
            Err(e) => return ApiError(e).into_response(),
        },
        _ if route.options.tenant_required => {
            return ApiError::from(AppError::bad_request("tenant is required")).into_response();
        }
        _ => {}
    }

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

fn tenant_key(
    params: Option<&RawPathParams>,
    req: &Request,
    from_host: bool,
    claimed: Option<&str>,
) -> Option<String> {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };

    if let Some(params) = params {
        for (name, value) in params.iter() {
            if TENANT_PARAMS.contains(&name) {
                if let Some(v) = non_empty(value) {
                    return Some(v);
                }
            }
        }
    }

    if let Ok(Query(query)) = Query::<HashMap<String, String>>::try_from_uri(req.uri()) {
        if let Some(v) = query.get("tenantId").and_then(|v| non_empty(v.as_str())) {
            return Some(v);
        }
    }

    if let Some(v) = req
        .headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(non_empty)
    {
        return Some(v);
    }

    if from_host {
        if let Some(sub) = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .and_then(subdomain)
        {
            return Some(sub);
        }
    }

    claimed.and_then(non_empty)
}

/// `acme.example.com:8080` -> `acme`. Bare hosts and IPs have none.
fn subdomain(host: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host);
    if host.parse::<std::net::Ipv4Addr>().is_ok() {
        return None;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 || labels[0].is_empty() || labels[0] == "www" {
        return None;
    }
    Some(labels[0].to_string())
}

/// Known tenants come from the data source, which only asks the provider
/// again on a miss. Without a data source the provider is asked directly.
async fn resolve(app: &AppState, key: &str) -> anyhow::Result<(Tenant, Option<Connection>)> {
    let unknown = || AppError::not_found(format!("unknown tenant '{key}'")).into_anyhow();

    if let Some(ds) = app.data_source() {
        let connection = ds
            .connection(key)
            .await
            .map_err(AppError::from)?
            .ok_or_else(unknown)?;
        let tenant = ds.tenant(key).ok_or_else(unknown)?;
        return Ok((tenant, Some(connection)));
    }

    let found = match app.tenants() {
        Some(provider) => provider.find(key).await?,
        None => None,
    };
    Ok((found.ok_or_else(unknown)?, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomains_are_taken_from_qualified_hosts() {
        assert_eq!(subdomain("acme.example.com"), Some("acme".to_string()));
        assert_eq!(subdomain("acme.example.com:8080"), Some("acme".to_string()));
        assert_eq!(subdomain("example.com"), None);
        assert_eq!(subdomain("www.example.com"), None);
        assert_eq!(subdomain("127.0.0.1:3000"), None);
        assert_eq!(subdomain("localhost"), None);
    }
}
