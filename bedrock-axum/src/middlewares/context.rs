use axum::extract::{Request, State};
use axum::http::header::ACCEPT_LANGUAGE;
use axum::middleware::Next;
use axum::response::Response;
use bedrock_db::DbContext;

use super::REQUEST_ID_HEADER;
use crate::context::RequestContext;
use crate::state::AppState;

/// Seed the request with an empty context: no tenant, no caller, the
/// default connection and the negotiated locale.
pub async fn context(State(app): State<AppState>, mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let accept_language = req
        .headers()
        .get(ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok());
    let locale = app.translator().negotiate(accept_language);

    let db = DbContext {
        default: app.data_source().map(|ds| ds.default_connection().clone()),
        tenant: None,
    };

    req.extensions_mut().insert(RequestContext {
        request_id,
        locale,
        tenant: None,
        auth: None,
        db,
    });
    next.run(req).await
}
