use bedrock_core::{AppError, UrlError};
use thiserror::Error;

/// Result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    Url(#[from] UrlError),

    #[error("invalid {kind} configuration: {message}")]
    Config { kind: &'static str, message: String },

    #[error("secret not found: {key}")]
    SecretNotFound { key: String },

    #[error("{service} responded with {status}: {body}")]
    Upstream {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AdapterError {
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    pub fn config(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            kind,
            message: message.into(),
        }
    }
}

impl From<redis::RedisError> for AdapterError {
    fn from(err: redis::RedisError) -> Self {
        Self::backend(err)
    }
}

impl From<AdapterError> for AppError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::SecretNotFound { key } => {
                AppError::not_found(format!("secret not found: {key}"))
            }
            other => {
                let message = other.to_string();
                AppError::internal(message).with_source(other.into())
            }
        }
    }
}
