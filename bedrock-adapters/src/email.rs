//! Outgoing email.
//!
//! `resend://API_KEY?sender=noreply@example.com` posts to the Resend API;
//! `faker://` records messages in memory.

use std::sync::Arc;

use async_trait::async_trait;
use bedrock_core::{ConnectionUrl, UrlError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterResult};

pub const RESEND_ENDPOINT: &str = "https://api.resend.com";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Email {
    pub fn new(to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            to: vec![to.into()],
            subject: subject.into(),
            ..Self::default()
        }
    }

    pub fn sender(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one message and return the provider's message id.
    async fn send(&self, email: Email) -> AdapterResult<String>;
}

fn check(email: &Email) -> AdapterResult<()> {
    if email.to.is_empty() {
        return Err(AdapterError::config("email", "no recipients"));
    }
    if email.from.is_empty() {
        return Err(AdapterError::config("email", "no sender"));
    }
    if email.html.is_none() && email.text.is_none() {
        return Err(AdapterError::config("email", "empty body"));
    }
    Ok(())
}

pub struct ResendMailer {
    api_key: String,
    sender: Option<String>,
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ResendResponse {
    id: String,
}

impl ResendMailer {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            sender: None,
            endpoint: RESEND_ENDPOINT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn from_url(url: &ConnectionUrl) -> AdapterResult<Self> {
        let api_key = url
            .host()
            .or_else(|| url.username())
            .ok_or_else(|| AdapterError::config("resend", "missing api key"))?;
        let mut mailer = Self::new(api_key);
        if let Some(sender) = url.param("sender") {
            mailer = mailer.with_sender(sender);
        }
        if let Some(endpoint) = url.param("endpoint") {
            mailer = mailer.with_endpoint(endpoint);
        }
        Ok(mailer)
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, mut email: Email) -> AdapterResult<String> {
        if email.from.is_empty() {
            email.from = self.sender.clone().unwrap_or_default();
        }
        check(&email)?;

        let response = self
            .client
            .post(format!("{}/emails", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&email)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AdapterError::Upstream {
                service: "resend",
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let sent: ResendResponse = response.json().await?;
        tracing::info!(id = %sent.id, recipients = email.to.len(), "email sent");
        Ok(sent.id)
    }
}

/// Keeps every message instead of sending it.
#[derive(Default)]
pub struct FakeMailer {
    sender: Option<String>,
    sent: Mutex<Vec<Email>>,
}

impl FakeMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sender(sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, mut email: Email) -> AdapterResult<String> {
        if email.from.is_empty() {
            email.from = self.sender.clone().unwrap_or_default();
        }
        check(&email)?;
        let id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(id = %id, subject = %email.subject, "email captured");
        self.sent.lock().push(email);
        Ok(id)
    }
}

/// `resend://KEY?sender=...` or `faker://`.
pub fn mailer_from_url(raw: &str) -> AdapterResult<Arc<dyn Mailer>> {
    let url = ConnectionUrl::parse(raw)?;
    match url.scheme() {
        "resend" => Ok(Arc::new(ResendMailer::from_url(&url)?)),
        "faker" | "fake" => Ok(Arc::new(match url.param("sender") {
            Some(sender) => FakeMailer::with_sender(sender),
            None => FakeMailer::new(),
        })),
        other => Err(UrlError::UnsupportedScheme {
            kind: "email",
            scheme: other.to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_mailer_fills_the_default_sender() {
        let mailer = FakeMailer::with_sender("noreply@bedrock.dev");
        mailer
            .send(Email::new("ada@example.com", "Welcome").text("hi"))
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "noreply@bedrock.dev");
    }

    #[tokio::test]
    async fn messages_need_a_body_and_sender() {
        let mailer = FakeMailer::new();
        assert!(mailer.send(Email::new("a@b.c", "x").text("y")).await.is_err());
        assert!(mailer
            .send(Email::new("a@b.c", "x").sender("me@b.c"))
            .await
            .is_err());
    }

    #[test]
    fn resend_urls_carry_key_and_sender() {
        let url = ConnectionUrl::parse("resend://re_123?sender=team@acme.io").unwrap();
        let mailer = ResendMailer::from_url(&url).unwrap();
        assert_eq!(mailer.api_key, "re_123");
        assert_eq!(mailer.sender.as_deref(), Some("team@acme.io"));
        assert_eq!(mailer.endpoint, RESEND_ENDPOINT);
    }
}
