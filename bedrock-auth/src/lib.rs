//! bedrock-auth: bearer authentication for Bedrock.
//!
//! [`TokenProvider`] signs and verifies JWT access tokens and
//! session-bound CSRF tokens. [`AuthProvider`] is the seam the HTTP layer
//! calls with a bearer token; both the token provider and
//! [`HttpAuthProvider`] (a remote userinfo endpoint) implement it.

pub mod error;
pub mod options;
pub mod provider;
pub mod token;

pub use error::{AuthError, AuthResult};
pub use options::{JwtAlgorithm, JwtOptions};
pub use provider::{extract_bearer_token, AuthProvider, HttpAuthProvider};
pub use token::{Claims, JwtCodec, TokenProvider, ACCESS_TOKEN, CSRF_TOKEN};
