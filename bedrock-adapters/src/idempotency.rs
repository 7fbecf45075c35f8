use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{Cache, CacheExt};
use crate::error::AdapterResult;

/// A response captured for replay under an `Idempotency-Key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub body: String,
}

/// Where a keyed request was sent and by whom. A key only replays inside
/// the scope it was first stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyScope<'a> {
    pub tenant: Option<&'a str>,
    pub user: Option<&'a str>,
    pub method: &'a str,
    pub path: &'a str,
}

#[derive(Clone)]
pub struct IdempotencyStore {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn cache_key(scope: &IdempotencyScope<'_>, key: &str) -> String {
        // JSON keeps the parts apart even when they contain ':'.
        let parts = serde_json::json!([scope.tenant, scope.user, scope.method, scope.path, key]);
        format!("idempotency:{parts}")
    }

    /// A miss is `Ok(None)`.
    pub async fn get(&self, scope: &IdempotencyScope<'_>, key: &str) -> AdapterResult<Option<StoredResponse>> {
        self.cache.get_json(&Self::cache_key(scope, key)).await
    }

    pub async fn put(
        &self,
        scope: &IdempotencyScope<'_>,
        key: &str,
        response: &StoredResponse,
    ) -> AdapterResult<()> {
        self.cache
            .set_json(&Self::cache_key(scope, key), response, Some(self.ttl))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn store() -> IdempotencyStore {
        IdempotencyStore::new(Arc::new(MemoryCache::new()), Duration::from_secs(60))
    }

    fn scope<'a>(tenant: Option<&'a str>, user: Option<&'a str>, path: &'a str) -> IdempotencyScope<'a> {
        IdempotencyScope {
            tenant,
            user,
            method: "POST",
            path,
        }
    }

    fn created() -> StoredResponse {
        StoredResponse {
            status: 201,
            content_type: Some("application/json".to_string()),
            body: r#"{"id":1}"#.to_string(),
        }
    }

    #[tokio::test]
    async fn misses_are_none_not_errors() {
        let acme = scope(Some("acme"), None, "/notes");
        assert_eq!(store().get(&acme, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn responses_are_scoped_per_tenant() {
        let store = store();
        store.put(&scope(Some("acme"), None, "/notes"), "k1", &created()).await.unwrap();

        assert_eq!(
            store.get(&scope(Some("acme"), None, "/notes"), "k1").await.unwrap(),
            Some(created())
        );
        assert_eq!(store.get(&scope(Some("demo"), None, "/notes"), "k1").await.unwrap(), None);
        assert_eq!(store.get(&scope(None, None, "/notes"), "k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn responses_are_scoped_per_caller_and_endpoint() {
        let store = store();
        store
            .put(&scope(Some("acme"), Some("ada"), "/notes"), "k1", &created())
            .await
            .unwrap();

        assert_eq!(store.get(&scope(Some("acme"), Some("bob"), "/notes"), "k1").await.unwrap(), None);
        assert_eq!(store.get(&scope(Some("acme"), Some("ada"), "/notes/fail"), "k1").await.unwrap(), None);
        let put = IdempotencyScope {
            method: "PUT",
            ..scope(Some("acme"), Some("ada"), "/notes")
        };
        assert_eq!(store.get(&put, "k1").await.unwrap(), None);
    }

    #[test]
    fn separators_inside_parts_do_not_collide() {
        let a = IdempotencyStore::cache_key(&scope(Some("a:b"), None, "/x"), "k");
        let b = IdempotencyStore::cache_key(&scope(Some("a"), Some("b"), "/x"), "k");
        assert_ne!(a, b);
    }
}
