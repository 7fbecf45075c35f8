use std::any::Any;
use std::panic::AssertUnwindSafe;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{ACCEPT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::Response;
use bedrock_core::{AppError, ErrorKind};
use futures::FutureExt;

use super::transaction::AfterCommit;
use super::REQUEST_ID_HEADER;
use crate::error::{envelope, error_response, ErrorPayload};
use crate::state::AppState;

const MAX_REJECTION_BODY: usize = 64 * 1024;

/// Outermost pipeline stage.
///
/// Turns a panic anywhere below into a 500, and wraps every error response
/// into the `{requestId, timestamp, uri, error, success}` envelope with a
/// message translated into the caller's locale when a bundle has it.
/// Successful responses first run their [`AfterCommit`] work.
pub async fn recover(State(app): State<AppState>, req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let locale = app.translator().negotiate(
        req.headers()
            .get(ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok()),
    );
    let uri = req.uri().clone();

    let mut response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(request_id = ?request_id, %uri, panic = %message, "handler panicked");
            error_response(&AppError::internal(message))
        }
    };

    let after_commit = response.extensions_mut().remove::<AfterCommit>();
    if response.status().is_success() {
        if let Some(after_commit) = after_commit {
            after_commit.run().await;
        }
    }

    let (response, mut payload) = match response.extensions().get::<ErrorPayload>().cloned() {
        Some(payload) => (response, payload),
        None if is_error(response.status()) => untyped_payload(response).await,
        None => return response,
    };
    payload.message = app.translator().translate(&locale, &payload.message, &[]);
    wrap(response, &payload, request_id.as_deref(), &uri)
}

fn is_error(status: StatusCode) -> bool {
    status.is_client_error() || status.is_server_error()
}

/// Errors raised outside [`crate::ApiError`], such as extractor rejections
/// and axum's own 405s. The status is kept; the plain-text body becomes the
/// message.
async fn untyped_payload(response: Response) -> (Response, ErrorPayload) {
    let status = response.status();
    let (parts, body) = response.into_parts();
    let text = axum::body::to_bytes(body, MAX_REJECTION_BODY)
        .await
        .ok()
        .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    let kind = ErrorKind::from_status(status.as_u16());
    let message = text
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| kind.code().to_string());
    tracing::debug!(%status, message, "request rejected before the handler");

    let payload = ErrorPayload::from_app_error(&AppError::new(kind, message));
    (Response::from_parts(parts, Body::empty()), payload)
}

fn wrap(response: Response, payload: &ErrorPayload, request_id: Option<&str>, uri: &Uri) -> Response {
    let body = envelope(payload, request_id, uri);
    let bytes = match serde_json::to_vec(&body) {
        Ok(bytes) => bytes,
        Err(_) => return response,
    };
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(CONTENT_LENGTH);
    parts
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Response::from_parts(parts, Body::from(bytes))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn panic_payloads_become_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(boxed.as_ref()), "owned boom");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked");
    }

    #[tokio::test]
    async fn plain_rejections_get_a_payload_from_their_status() {
        let response = (StatusCode::UNPROCESSABLE_ENTITY, "missing field `title`").into_response();
        let (response, payload) = untyped_payload(response).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(payload.code, "BAD_REQUEST");
        assert_eq!(payload.message, "missing field `title`");

        let (_, payload) = untyped_payload(StatusCode::METHOD_NOT_ALLOWED.into_response()).await;
        assert_eq!(payload.message, "Method Not Allowed");

        let (_, payload) = untyped_payload((StatusCode::BAD_GATEWAY, "upstream secret").into_response()).await;
        assert_eq!(payload.code, "INTERNAL_ERROR");
        assert_eq!(payload.message, "internal server error");
    }
}
