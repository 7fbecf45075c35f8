use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bedrock_adapters::{IdempotencyScope, StoredResponse};
use bedrock_core::AppError;

use super::{RouteState, IDEMPOTENCY_KEY_HEADER, IDEMPOTENT_REPLAYED_HEADER};
use crate::context::RequestContext;
use crate::error::ApiError;

const MAX_STORED_BODY: usize = 1024 * 1024;

/// Replay the stored response for a repeated `Idempotency-Key`.
///
/// Only POST, PUT and PATCH take part, and only 2xx responses are stored.
/// Keys are scoped by tenant, caller, method and path.
pub async fn idempotency(State(route): State<RouteState>, req: Request, next: Next) -> Response {
    let Some(store) = route.app.idempotency() else {
        return next.run(req).await;
    };
    if !matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH) {
        return next.run(req).await;
    }
    let Some(key) = req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
    else {
        return next.run(req).await;
    };
    let ctx = req.extensions().get::<RequestContext>().cloned().unwrap_or_default();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let scope = IdempotencyScope {
        tenant: ctx.tenant_id(),
        user: ctx.user_id(),
        method: &method,
        path: &path,
    };

    match store.get(&scope, &key).await {
        Ok(Some(stored)) => {
            tracing::debug!(key, tenant = ?scope.tenant, path, "replaying idempotent response");
            return replay(stored);
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, key, "idempotency lookup failed"),
    }

    let response = next.run(req).await;
    if !response.status().is_success() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_STORED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ApiError::from(AppError::internal(format!("reading response body: {e}")))
                .into_response()
        }
    };

    match std::str::from_utf8(&bytes) {
        Ok(text) => {
            let stored = StoredResponse {
                status: parts.status.as_u16(),
                content_type: parts
                    .headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                body: text.to_string(),
            };
            if let Err(e) = store.put(&scope, &key, &stored).await {
                tracing::warn!(error = %e, key, "idempotent response not stored");
            }
        }
        Err(_) => tracing::debug!(key, "binary response not stored for replay"),
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn replay(stored: StoredResponse) -> Response {
    let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK);
    let mut response = (status, stored.body).into_response();
    if let Some(ct) = stored.content_type.as_deref().and_then(|ct| HeaderValue::from_str(ct).ok()) {
        response.headers_mut().insert(CONTENT_TYPE, ct);
    }
    response
        .headers_mut()
        .insert(IDEMPOTENT_REPLAYED_HEADER, HeaderValue::from_static("true"));
    response
}
