//! Topic based publish/subscribe.
//!
//! `fake://`, `faker://`, `dummy://` and `memory` deliver in process;
//! `redis://host?appName=notes` uses Redis channels prefixed with the app
//! name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bedrock_core::{ConnectionUrl, UrlError};
use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::cache::redis_url;
use crate::error::AdapterResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> AdapterResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

pub type Handler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |msg| Box::pin(f(msg)))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubSubStats {
    pub sent: u64,
    pub received: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PubSubStats {
        PubSubStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> AdapterResult<()>;

    async fn subscribe(&self, topic: &str, handler: Handler) -> AdapterResult<()>;

    fn stats(&self) -> PubSubStats;
}

/// JSON helpers available on every pubsub, trait objects included.
#[async_trait]
pub trait PubSubExt: PubSub {
    async fn publish_json<T>(&self, topic: &str, value: &T) -> AdapterResult<()>
    where
        T: Serialize + Sync,
    {
        self.publish(topic, serde_json::to_vec(value)?).await
    }
}

impl<P: PubSub + ?Sized> PubSubExt for P {}

/// In-process pubsub. Handlers run inline, before `publish` returns.
#[derive(Default)]
pub struct FakePubSub {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
    counters: Counters,
}

impl FakePubSub {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSub for FakePubSub {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> AdapterResult<()> {
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .get(topic)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            handler(Message {
                topic: topic.to_string(),
                payload: payload.clone(),
            })
            .await;
            self.counters.received.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Handler) -> AdapterResult<()> {
        self.handlers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    fn stats(&self) -> PubSubStats {
        self.counters.snapshot()
    }
}

pub struct RedisPubSub {
    client: redis::Client,
    conn: ConnectionManager,
    prefix: String,
    counters: Arc<Counters>,
}

impl RedisPubSub {
    pub async fn connect(url: &ConnectionUrl) -> AdapterResult<Self> {
        let client = redis::Client::open(redis_url(url)?.as_str())?;
        let conn = client.get_connection_manager().await?;
        let prefix = url
            .param("appName")
            .map(|app| format!("{app}:"))
            .unwrap_or_default();
        tracing::info!(url = %url.redacted(), prefix = %prefix, "redis pubsub connected");
        Ok(Self {
            client,
            conn,
            prefix,
            counters: Arc::new(Counters::default()),
        })
    }

    fn channel(&self, topic: &str) -> String {
        format!("{}{topic}", self.prefix)
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> AdapterResult<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(self.channel(topic), payload).await?;
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Handler) -> AdapterResult<()> {
        let channel = self.channel(topic);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;

        let topic = topic.to_string();
        let counters = Arc::clone(&self.counters);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(p) => p,
                    Err(err) => {
                        tracing::warn!(topic = %topic, error = %err, "dropping undecodable message");
                        continue;
                    }
                };
                counters.received.fetch_add(1, Ordering::Relaxed);
                handler(Message {
                    topic: topic.clone(),
                    payload,
                })
                .await;
            }
            tracing::debug!(topic = %topic, "subscription closed");
        });
        Ok(())
    }

    fn stats(&self) -> PubSubStats {
        self.counters.snapshot()
    }
}

/// `fake|faker|dummy://`, `memory` or `redis://...`.
pub async fn pubsub_from_url(raw: &str) -> AdapterResult<Arc<dyn PubSub>> {
    let url = ConnectionUrl::parse(raw)?;
    match url.scheme() {
        "fake" | "faker" | "dummy" | "memory" => Ok(Arc::new(FakePubSub::new())),
        "redis" | "rediss" => Ok(Arc::new(RedisPubSub::connect(&url).await?)),
        other => Err(UrlError::UnsupportedScheme {
            kind: "pubsub",
            scheme: other.to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn publishing_without_subscribers_only_counts_sent() {
        let bus = FakePubSub::new();
        bus.publish("orders", b"{}".to_vec()).await.unwrap();
        assert_eq!(bus.stats(), PubSubStats { sent: 1, received: 0 });
    }

    #[tokio::test]
    async fn subscribers_receive_their_topic_only() {
        let bus = FakePubSub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            "orders",
            handler(move |msg| {
                let sink = Arc::clone(&sink);
                async move { sink.lock().push(msg) }
            }),
        )
        .await
        .unwrap();

        bus.publish_json("orders", &serde_json::json!({"id": 1})).await.unwrap();
        bus.publish("invoices", b"x".to_vec()).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].topic, "orders");
        assert_eq!(seen[0].json::<serde_json::Value>().unwrap()["id"], 1);
        assert_eq!(bus.stats(), PubSubStats { sent: 2, received: 1 });
    }

    #[tokio::test]
    async fn fake_aliases_resolve() {
        for url in ["fake://", "faker://local", "dummy://", "memory"] {
            let bus = pubsub_from_url(url).await.unwrap();
            assert_eq!(bus.stats(), PubSubStats::default());
            bus.publish_json("orders", &serde_json::json!({"id": 2})).await.unwrap();
            assert_eq!(bus.stats().sent, 1);
        }
        assert!(pubsub_from_url("kafka://broker").await.is_err());
    }
}
