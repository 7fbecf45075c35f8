use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bedrock_core::AppError;

use super::RouteState;
use crate::context::RequestContext;
use crate::error::ApiError;

/// 401 without a caller on protected routes, 403 without the permissions.
pub async fn guard(State(route): State<RouteState>, req: Request, next: Next) -> Response {
    let options = &route.options;
    if options.authenticated || !options.permissions.is_empty() {
        let auth = req
            .extensions()
            .get::<RequestContext>()
            .and_then(|ctx| ctx.auth.as_ref());

        match auth {
            None => {
                return ApiError::from(AppError::unauthorized("authentication required")).into_response();
            }
            Some(auth) if !auth.has_all(&options.permissions) => {
                tracing::debug!(user = %auth.user_id, required = ?options.permissions, "permission denied");
                return ApiError::from(AppError::forbidden("insufficient permissions")).into_response();
            }
            Some(_) => {}
        }
    }

    next.run(req).await
}
