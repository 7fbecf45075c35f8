// Access and CSRF tokens.

use bedrock_core::Authentication;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::options::JwtOptions;

#[cfg(any(feature = "jwt-aws-lc-rs", feature = "jwt-rust-crypto"))]
use crate::options::JwtAlgorithm;

pub const ACCESS_TOKEN: &str = "access";
pub const CSRF_TOKEN: &str = "csrf";

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub aud: Vec<String>,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub typ: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl Claims {
    pub fn into_authentication(self) -> Authentication {
        Authentication {
            user_id: self.sub,
            audience: self.aud,
            permissions: self.permissions,
            email: self.email,
            tenant_id: self.tenant_id,
        }
    }
}

pub trait JwtCodec: Send + Sync {
    fn sign(&self, jwt: &JwtOptions, claims: &Claims) -> AuthResult<String>;

    fn verify(&self, jwt: &JwtOptions, token: &str) -> AuthResult<Claims>;
}

#[cfg(not(any(feature = "jwt-aws-lc-rs", feature = "jwt-rust-crypto")))]
struct NoJwtCodec;

#[cfg(not(any(feature = "jwt-aws-lc-rs", feature = "jwt-rust-crypto")))]
impl JwtCodec for NoJwtCodec {
    fn sign(&self, _jwt: &JwtOptions, _claims: &Claims) -> AuthResult<String> {
        Err(AuthError::Disabled)
    }

    fn verify(&self, _jwt: &JwtOptions, _token: &str) -> AuthResult<Claims> {
        Err(AuthError::Disabled)
    }
}

#[cfg(any(feature = "jwt-aws-lc-rs", feature = "jwt-rust-crypto"))]
struct JsonwebtokenCodec;

#[cfg(any(feature = "jwt-aws-lc-rs", feature = "jwt-rust-crypto"))]
impl JsonwebtokenCodec {
    fn algorithm(alg: JwtAlgorithm) -> jsonwebtoken::Algorithm {
        match alg {
            JwtAlgorithm::HS256 => jsonwebtoken::Algorithm::HS256,
            JwtAlgorithm::HS384 => jsonwebtoken::Algorithm::HS384,
            JwtAlgorithm::HS512 => jsonwebtoken::Algorithm::HS512,
        }
    }
}

#[cfg(any(feature = "jwt-aws-lc-rs", feature = "jwt-rust-crypto"))]
impl JwtCodec for JsonwebtokenCodec {
    fn sign(&self, jwt: &JwtOptions, claims: &Claims) -> AuthResult<String> {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let secret = jwt.secret.as_ref().ok_or(AuthError::MissingSecret)?;
        let header = Header::new(Self::algorithm(jwt.algorithm));
        encode(&header, claims, &EncodingKey::from_secret(secret.as_bytes()))
            .map_err(|e| AuthError::InvalidConfig(e.to_string()))
    }

    fn verify(&self, jwt: &JwtOptions, token: &str) -> AuthResult<Claims> {
        use jsonwebtoken::errors::ErrorKind;
        use jsonwebtoken::{decode, DecodingKey, Validation};

        let secret = jwt.secret.as_ref().ok_or(AuthError::MissingSecret)?;

        let mut validation = Validation::new(Self::algorithm(jwt.algorithm));
        validation.set_issuer(&[jwt.issuer.as_str()]);
        validation.set_audience(&jwt.audience);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.leeway = 0;

        decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

fn default_codec() -> Box<dyn JwtCodec> {
    #[cfg(any(feature = "jwt-aws-lc-rs", feature = "jwt-rust-crypto"))]
    {
        Box::new(JsonwebtokenCodec)
    }
    #[cfg(not(any(feature = "jwt-aws-lc-rs", feature = "jwt-rust-crypto")))]
    {
        Box::new(NoJwtCodec)
    }
}

/// Issues and verifies access and CSRF tokens with one set of options.
pub struct TokenProvider {
    options: JwtOptions,
    codec: Box<dyn JwtCodec>,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("algorithm", &self.options.algorithm)
            .field("issuer", &self.options.issuer)
            .field("audience", &self.options.audience)
            .finish()
    }
}

impl TokenProvider {
    pub fn new(options: JwtOptions) -> AuthResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            codec: default_codec(),
        })
    }

    pub fn options(&self) -> &JwtOptions {
        &self.options
    }

    fn claims(&self, sub: &str, typ: &str, ttl: std::time::Duration) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: sub.to_string(),
            aud: self.options.audience.clone(),
            iss: self.options.issuer.clone(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
            jti: Uuid::new_v4().to_string(),
            typ: typ.to_string(),
            ..Claims::default()
        }
    }

    pub fn create_access_token(&self, auth: &Authentication) -> AuthResult<String> {
        let mut claims = self.claims(&auth.user_id, ACCESS_TOKEN, self.options.access_token_expires_in);
        claims.email = auth.email.clone();
        claims.tenant_id = auth.tenant_id.clone();
        claims.permissions = auth.permissions.clone();
        self.codec.sign(&self.options, &claims)
    }

    pub fn verify_access_token(&self, token: &str) -> AuthResult<Authentication> {
        let claims = self.codec.verify(&self.options, token)?;
        if claims.typ != ACCESS_TOKEN {
            return Err(AuthError::WrongTokenType {
                expected: ACCESS_TOKEN,
                found: claims.typ,
            });
        }
        Ok(claims.into_authentication())
    }

    /// A CSRF token bound to `session`.
    pub fn create_csrf_token(&self, session: &str) -> AuthResult<String> {
        let claims = self.claims(session, CSRF_TOKEN, self.options.csrf_token_expires_in);
        self.codec.sign(&self.options, &claims)
    }

    pub fn verify_csrf_token(&self, token: &str, session: &str) -> AuthResult<()> {
        let claims = self.codec.verify(&self.options, token)?;
        if claims.typ != CSRF_TOKEN {
            return Err(AuthError::WrongTokenType {
                expected: CSRF_TOKEN,
                found: claims.typ,
            });
        }
        if claims.sub != session {
            return Err(AuthError::CsrfMismatch);
        }
        Ok(())
    }
}
