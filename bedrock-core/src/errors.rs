//! # Errors
//!
//! Bedrock uses one flat, structured error for everything that can reach
//! a client. Core goals:
//! - a stable machine code plus an HTTP status per kind
//! - can be carried through `anyhow::Error` (handlers, features, adapters)
//! - transport-agnostic (the server crate decides how to serialize)

use std::fmt;

use anyhow::Error as AnyError;
use serde_json::Value;

/// A convenience result type for Bedrock APIs.
pub type AppResult<T> = std::result::Result<T, AnyError>;

/// Error kinds and the HTTP status codes they map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,   // 400
    Unauthorized, // 401
    Forbidden,    // 403
    NotFound,     // 404
    Conflict,     // 409
    Internal,     // 500
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Internal => 500,
        }
    }

    /// Machine-readable code used in the `error.code` field of responses.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// Inverse of [`ErrorKind::status_code`]; unknown statuses collapse by class.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::BadRequest,
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            s if (400..500).contains(&s) => ErrorKind::BadRequest,
            _ => ErrorKind::Internal,
        }
    }

    pub fn is_technical(&self) -> bool {
        matches!(self, ErrorKind::Internal)
    }
}

/// A structured Bedrock error that can live inside `anyhow::Error`.
#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
    pub source: Option<AnyError>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn status(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Convert into `anyhow::Error` so it flows through handler and feature code.
    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// Find an `AppError` anywhere in an `anyhow` chain (contexts included).
    pub fn find(err: &AnyError) -> Option<&AppError> {
        err.chain().find_map(|e| e.downcast_ref::<AppError>())
    }

    /// Turn any error into an AppError:
    /// - if it already is one, keep it (lossless)
    /// - otherwise wrap it as Internal
    pub fn normalize(err: AnyError) -> AppError {
        match err.downcast::<AppError>() {
            Ok(app) => app,
            Err(other) => match AppError::find(&other) {
                Some(inner) => AppError {
                    kind: inner.kind,
                    message: inner.message.clone(),
                    details: inner.details.clone(),
                    source: Some(other),
                },
                None => AppError::new(ErrorKind::Internal, other.to_string()).with_source(other),
            },
        }
    }

    /// A version suitable for clients: technical messages are replaced and the
    /// source chain is dropped.
    pub fn sanitize_for_client(&self) -> AppError {
        let message = if self.kind.is_technical() {
            "internal server error".to_string()
        } else {
            self.message.clone()
        };
        AppError {
            kind: self.kind,
            message,
            details: if self.kind.is_technical() { None } else { self.details.clone() },
            source: None,
        }
    }

    /// JSON body of the `error` member of the response envelope.
    pub fn to_json(&self) -> Value {
        let mut base = serde_json::json!({
            "code": self.code(),
            "message": self.message,
        });
        if let Some(d) = &self.details {
            base["details"] = d.clone();
        }
        base
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, msg)
    }
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code(), self.status(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience helper for "bail with AppError".
#[macro_export]
macro_rules! bail_app {
    ($ctor:ident, $msg:expr) => {
        return Err($crate::errors::AppError::$ctor($msg).into_anyhow())
    };
    ($ctor:ident, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::errors::AppError::$ctor(format!($fmt, $($arg)*)).into_anyhow())
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn status_codes_follow_the_flat_taxonomy() {
        assert_eq!(AppError::bad_request("x").status(), 400);
        assert_eq!(AppError::unauthorized("x").status(), 401);
        assert_eq!(AppError::forbidden("x").status(), 403);
        assert_eq!(AppError::not_found("x").status(), 404);
        assert_eq!(AppError::conflict("x").status(), 409);
        assert_eq!(AppError::internal("x").status(), 500);
    }

    #[test]
    fn normalize_finds_app_error_behind_context() {
        let err = Err::<(), _>(AppError::not_found("no such note").into_anyhow())
            .context("loading note")
            .unwrap_err();
        let app = AppError::normalize(err);
        assert_eq!(app.kind, ErrorKind::NotFound);
        assert_eq!(app.message, "no such note");
    }

    #[test]
    fn foreign_errors_become_internal_and_are_hidden_from_clients() {
        let app = AppError::normalize(anyhow::anyhow!("connection refused"));
        assert_eq!(app.kind, ErrorKind::Internal);
        let safe = app.sanitize_for_client();
        assert_eq!(safe.message, "internal server error");
        assert!(safe.source.is_none());
    }

    #[test]
    fn unknown_client_statuses_collapse_to_bad_request() {
        assert_eq!(ErrorKind::from_status(422), ErrorKind::BadRequest);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::Internal);
    }
}
