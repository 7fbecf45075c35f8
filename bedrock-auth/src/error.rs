use bedrock_core::AppError;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("JWT secret is not configured")]
    MissingSecret,

    #[error("invalid auth configuration: {0}")]
    InvalidConfig(String),

    #[error("JWT support is disabled (enable one of: jwt-aws-lc-rs, jwt-rust-crypto)")]
    Disabled,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("expected a {expected} token, got {found}")]
    WrongTokenType { expected: &'static str, found: String },

    #[error("csrf token does not match the session")]
    CsrfMismatch,

    #[error("auth provider rejected the token ({status})")]
    Rejected { status: u16 },

    #[error("auth provider failed: {0}")]
    Provider(#[from] reqwest::Error),
}

impl AuthError {
    /// Errors caused by server configuration rather than the caller.
    pub fn is_technical(&self) -> bool {
        matches!(
            self,
            AuthError::MissingSecret | AuthError::InvalidConfig(_) | AuthError::Disabled | AuthError::Provider(_)
        )
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        if err.is_technical() {
            let message = err.to_string();
            return AppError::internal(message).with_source(err.into());
        }
        AppError::unauthorized(err.to_string())
    }
}
