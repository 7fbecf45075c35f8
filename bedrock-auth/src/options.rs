// Token configuration.

use std::time::Duration;

use bedrock_core::config::{keys, ConfigSnapshot};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// JWT signing algorithms
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum JwtAlgorithm {
    /// HMAC using SHA-256
    #[default]
    HS256,
    /// HMAC using SHA-384
    HS384,
    /// HMAC using SHA-512
    HS512,
}

impl std::str::FromStr for JwtAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            other => Err(AuthError::InvalidConfig(format!("unsupported algorithm '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwtOptions {
    pub algorithm: JwtAlgorithm,
    /// Token issuer (iss claim)
    pub issuer: String,
    /// Token audience (aud claim)
    pub audience: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub access_token_expires_in: Duration,
    #[serde(with = "humantime_serde")]
    pub csrf_token_expires_in: Duration,
    /// HMAC signing secret
    pub secret: Option<String>,
}

impl Default for JwtOptions {
    fn default() -> Self {
        Self {
            algorithm: JwtAlgorithm::default(),
            issuer: "bedrock".to_string(),
            audience: vec!["bedrock-api".to_string()],
            access_token_expires_in: Duration::from_secs(3600), // 1 hour
            csrf_token_expires_in: Duration::from_secs(1800),
            secret: None,
        }
    }
}

impl JwtOptions {
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Read `auth.jwt.*` keys, keeping defaults for anything unset.
    pub fn from_config(config: &ConfigSnapshot) -> AuthResult<Self> {
        let mut options = Self::default();
        options.secret = config.get_string(keys::JWT_SECRET);
        if let Some(issuer) = config.get_string(keys::JWT_ISSUER) {
            options.issuer = issuer;
        }
        let audience = config.get_list(keys::JWT_AUDIENCE);
        if !audience.is_empty() {
            options.audience = audience;
        }
        if let Some(expires) = config.get_duration(keys::JWT_EXPIRES_IN) {
            options.access_token_expires_in = expires;
        }
        if let Some(alg) = config.get(keys::JWT_ALGORITHM) {
            options.algorithm = alg.parse()?;
        }
        Ok(options)
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.issuer.is_empty() {
            return Err(AuthError::InvalidConfig("JWT issuer cannot be empty".to_string()));
        }
        if self.audience.is_empty() {
            return Err(AuthError::InvalidConfig("JWT audience cannot be empty".to_string()));
        }
        match &self.secret {
            None => return Err(AuthError::MissingSecret),
            Some(s) if s.len() < 16 => {
                return Err(AuthError::InvalidConfig(
                    "JWT secret must be at least 16 bytes".to_string(),
                ))
            }
            Some(_) => {}
        }
        if self.access_token_expires_in.as_secs() == 0 || self.csrf_token_expires_in.as_secs() == 0 {
            return Err(AuthError::InvalidConfig(
                "token expiration must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
