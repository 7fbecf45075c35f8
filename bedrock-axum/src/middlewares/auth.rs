use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bedrock_auth::{extract_bearer_token, AuthResult};
use bedrock_core::{AppError, Authentication};

use crate::context::take_context;
use crate::error::ApiError;
use crate::state::AppState;

/// Verify a bearer token, if one was sent.
///
/// An invalid token leaves the request anonymous; route guards decide
/// whether that is acceptable. A provider that cannot be reached is a 500.
pub async fn authenticate(State(app): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = extract_bearer_token(req.headers()).map(str::to_string);

    if let Some(token) = token {
        match verify(&app, &token).await {
            Ok(Some(auth)) => {
                tracing::debug!(user = %auth.user_id, "request authenticated");
                let mut ctx = take_context(&mut req);
                ctx.auth = Some(auth);
                req.extensions_mut().insert(ctx);
            }
            Ok(None) => tracing::debug!("bearer token ignored: no auth provider configured"),
            Err(e) if e.is_technical() => {
                return ApiError::from(AppError::from(e)).into_response();
            }
            Err(e) => tracing::debug!(error = %e, "bearer token rejected"),
        }
    }

    next.run(req).await
}

async fn verify(app: &AppState, token: &str) -> AuthResult<Option<Authentication>> {
    if let Some(provider) = app.auth_provider() {
        return provider.authenticate(token).await.map(Some);
    }
    if let Some(tokens) = app.tokens() {
        return tokens.verify_access_token(token).map(Some);
    }
    Ok(None)
}
