use axum::{
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use bedrock_core::errors::AppError;
use serde_json::{json, Value};

/// Handler error. Anything that converts into `anyhow::Error` can be
/// returned with `?`; an `AppError` anywhere in the chain decides the status.
#[derive(Debug)]
pub struct ApiError(pub anyhow::Error);

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

/// The client-safe error carried on an error response until the recover
/// middleware wraps it into the full envelope.
#[derive(Debug, Clone)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl ErrorPayload {
    pub fn from_app_error(err: &AppError) -> Self {
        let safe = err.sanitize_for_client();
        Self {
            code: safe.code(),
            message: safe.message,
            details: safe.details,
        }
    }

    fn error_json(&self) -> Value {
        let mut error = json!({ "code": self.code, "message": self.message });
        if let Some(details) = &self.details {
            error["details"] = details.clone();
        }
        error
    }
}

/// `{requestId, timestamp, uri, error: {code, message}, success: false}`
pub fn envelope(payload: &ErrorPayload, request_id: Option<&str>, uri: &Uri) -> Value {
    json!({
        "requestId": request_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uri": uri.to_string(),
        "error": payload.error_json(),
        "success": false,
    })
}

/// Build an error response from an `AppError`.
pub fn error_response(err: &AppError) -> Response {
    let payload = ErrorPayload::from_app_error(err);
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({ "error": payload.error_json(), "success": false });
    let mut response = (status, Json(body)).into_response();
    response.extensions_mut().insert(payload);
    response
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let app = AppError::normalize(self.0);
        if app.kind.is_technical() {
            tracing::error!(error = ?app, "request failed");
        } else {
            tracing::debug!(code = app.code(), message = %app.message, "request rejected");
        }
        error_response(&app)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
