// Auth providers: turn a bearer token into an Authentication.

use async_trait::async_trait;
use bedrock_core::Authentication;
use http::HeaderMap;
use serde::Deserialize;

use crate::error::{AuthError, AuthResult};
use crate::token::TokenProvider;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> AuthResult<Authentication>;
}

#[async_trait]
impl AuthProvider for TokenProvider {
    async fn authenticate(&self, token: &str) -> AuthResult<Authentication> {
        self.verify_access_token(token)
    }
}

/// `Authorization: Bearer <token>`; the scheme is matched case-insensitively.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    #[serde(alias = "sub", alias = "id", alias = "user_id")]
    user_id: String,
    #[serde(default, alias = "aud")]
    audience: Audience,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "tenant_id")]
    tenant_id: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(untagged)]
enum Audience {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl From<Audience> for Vec<String> {
    fn from(aud: Audience) -> Self {
        match aud {
            Audience::None => Vec::new(),
            Audience::One(a) => vec![a],
            Audience::Many(a) => a,
        }
    }
}

/// Delegates verification to a userinfo endpoint, forwarding the token.
#[derive(Debug, Clone)]
pub struct HttpAuthProvider {
    url: String,
    client: reqwest::Client,
}

impl HttpAuthProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn authenticate(&self, token: &str) -> AuthResult<Authentication> {
        let response = self.client.get(&self.url).bearer_auth(token).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
            });
        }
        let info: UserInfo = response.error_for_status()?.json().await?;
        if info.user_id.is_empty() {
            return Err(AuthError::InvalidToken("userinfo has no subject".to_string()));
        }

        Ok(Authentication {
            user_id: info.user_id,
            audience: info.audience.into(),
            permissions: info.permissions,
            email: info.email,
            tenant_id: info.tenant_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(http::header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn bearer_tokens_are_extracted() {
        assert_eq!(extract_bearer_token(&headers("Bearer abc.def")), Some("abc.def"));
        assert_eq!(extract_bearer_token(&headers("bearer   xyz ")), Some("xyz"));
        assert_eq!(extract_bearer_token(&headers("Basic dXNlcg==")), None);
        assert_eq!(extract_bearer_token(&headers("Bearer ")), None);
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }
}
