//! A tenant-bound database connection.
//!
//! [`Connection`] wraps a sqlx `AnyPool` together with its dialect, optional
//! Postgres schema and owning tenant. [`Connection::begin`] returns a
//! transaction-scoped connection that shares the pool with its parent but
//! commits or rolls back on its own.

use std::sync::Arc;
use std::time::Duration;

use sqlx::any::{AnyArguments, AnyPoolOptions, AnyQueryResult, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Executor, Transaction};
use tokio::sync::Mutex;

use crate::dsn::{DatabaseUrl, Dialect};
use crate::error::{DbError, DbResult};

pub type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectOptions {
    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }
}

#[derive(Debug)]
struct Shared {
    pool: AnyPool,
    url: DatabaseUrl,
    tenant_id: String,
}

type TxSlot = Arc<Mutex<Option<Transaction<'static, Any>>>>;

#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    tx: Option<TxSlot>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("tenant_id", &self.shared.tenant_id)
            .field("url", &self.shared.url.redacted())
            .field("in_transaction", &self.tx.is_some())
            .finish()
    }
}

impl Connection {
    /// Open a pool for `url` on behalf of `tenant_id`.
    pub async fn open(url: DatabaseUrl, tenant_id: &str, options: &ConnectOptions) -> DbResult<Self> {
        sqlx::any::install_default_drivers();

        let mut pool_options = AnyPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout);

        // Every in-memory SQLite connection is its own database.
        if url.dialect() == Dialect::Sqlite && url.is_memory() {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        if let Some(schema) = url.schema() {
            let ident = quote_ident(schema);
            let setup = format!("CREATE SCHEMA IF NOT EXISTS {ident}; SET search_path TO {ident}");
            pool_options = pool_options.after_connect(move |conn, _meta| {
                let setup = setup.clone();
                Box::pin(async move {
                    conn.execute(sqlx::raw_sql(&setup)).await?;
                    Ok(())
                })
            });
        }

        let pool = pool_options.connect(url.driver_url()).await?;

        tracing::info!(
            tenant = tenant_id,
            dialect = %url.dialect(),
            schema = url.schema().unwrap_or(""),
            url = %url,
            "database connection opened"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                pool,
                url,
                tenant_id: tenant_id.to_string(),
            }),
            tx: None,
        })
    }

    pub fn database_url(&self) -> &str {
        self.shared.url.as_str()
    }

    pub fn url(&self) -> &DatabaseUrl {
        &self.shared.url
    }

    pub fn tenant_id(&self) -> &str {
        &self.shared.tenant_id
    }

    pub fn dialect(&self) -> Dialect {
        self.shared.url.dialect()
    }

    pub fn schema(&self) -> Option<&str> {
        self.shared.url.schema()
    }

    pub fn pool(&self) -> &AnyPool {
        &self.shared.pool
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// True when both handles come from the same pool.
    pub fn same_pool(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub async fn ping(&self) -> DbResult<()> {
        self.execute("SELECT 1").await.map(|_| ())
    }

    /// Start a transaction. The returned connection routes every statement
    /// through it until `commit` or `rollback`.
    pub async fn begin(&self) -> DbResult<Connection> {
        if self.tx.is_some() {
            return Err(DbError::Sqlx(sqlx::Error::Protocol(
                "nested transactions are not supported".to_string(),
            )));
        }
        let tx = self.shared.pool.begin().await?;
        tracing::trace!(tenant = %self.shared.tenant_id, "transaction started");
        Ok(Self {
            shared: Arc::clone(&self.shared),
            tx: Some(Arc::new(Mutex::new(Some(tx)))),
        })
    }

    async fn take_tx(&self) -> DbResult<Transaction<'static, Any>> {
        let slot = self.tx.as_ref().ok_or(DbError::NotInTransaction)?;
        slot.lock().await.take().ok_or(DbError::TransactionFinished)
    }

    pub async fn commit(&self) -> DbResult<()> {
        self.take_tx().await?.commit().await?;
        tracing::trace!(tenant = %self.shared.tenant_id, "transaction committed");
        Ok(())
    }

    pub async fn rollback(&self) -> DbResult<()> {
        self.take_tx().await?.rollback().await?;
        tracing::trace!(tenant = %self.shared.tenant_id, "transaction rolled back");
        Ok(())
    }

    /// Whether `commit`/`rollback` already ran on this transaction.
    pub async fn is_finished(&self) -> bool {
        match &self.tx {
            Some(slot) => slot.lock().await.is_none(),
            None => false,
        }
    }

    /// Run one or more statements without bind parameters.
    pub async fn execute(&self, sql: &str) -> DbResult<u64> {
        let result: AnyQueryResult = match &self.tx {
            Some(slot) => {
                let mut guard = slot.lock().await;
                let tx = guard.as_mut().ok_or(DbError::TransactionFinished)?;
                (&mut **tx).execute(sqlx::raw_sql(sql)).await?
            }
            None => self.shared.pool.execute(sqlx::raw_sql(sql)).await?,
        };
        Ok(result.rows_affected())
    }

    pub async fn fetch_all(&self, sql: &str) -> DbResult<Vec<AnyRow>> {
        self.fetch_query(sqlx::query(sql)).await
    }

    pub async fn execute_query(&self, query: AnyQuery<'_>) -> DbResult<u64> {
        let result = match &self.tx {
            Some(slot) => {
                let mut guard = slot.lock().await;
                let tx = guard.as_mut().ok_or(DbError::TransactionFinished)?;
                query.execute(&mut **tx).await?
            }
            None => query.execute(&self.shared.pool).await?,
        };
        Ok(result.rows_affected())
    }

    pub async fn fetch_query(&self, query: AnyQuery<'_>) -> DbResult<Vec<AnyRow>> {
        let rows = match &self.tx {
            Some(slot) => {
                let mut guard = slot.lock().await;
                let tx = guard.as_mut().ok_or(DbError::TransactionFinished)?;
                query.fetch_all(&mut **tx).await?
            }
            None => query.fetch_all(&self.shared.pool).await?,
        };
        Ok(rows)
    }

    pub async fn fetch_optional_query(&self, query: AnyQuery<'_>) -> DbResult<Option<AnyRow>> {
        let row = match &self.tx {
            Some(slot) => {
                let mut guard = slot.lock().await;
                let tx = guard.as_mut().ok_or(DbError::TransactionFinished)?;
                query.fetch_optional(&mut **tx).await?
            }
            None => query.fetch_optional(&self.shared.pool).await?,
        };
        Ok(row)
    }

    pub async fn close(&self) {
        self.shared.pool.close().await;
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    async fn memory() -> Connection {
        let url = DatabaseUrl::parse("sqlite::memory:").unwrap();
        Connection::open(url, "default", &ConnectOptions::default()).await.unwrap()
    }

    async fn count(conn: &Connection) -> i64 {
        let rows = conn.fetch_all("SELECT COUNT(*) AS n FROM items").await.unwrap();
        rows[0].try_get::<i64, _>("n").unwrap()
    }

    #[tokio::test]
    async fn ping_and_metadata() {
        let conn = memory().await;
        conn.ping().await.unwrap();
        assert_eq!(conn.dialect(), Dialect::Sqlite);
        assert_eq!(conn.tenant_id(), "default");
        assert_eq!(conn.database_url(), "sqlite::memory:");
        assert!(!conn.in_transaction());
    }

    #[tokio::test]
    async fn rollback_discards_and_commit_keeps() {
        let conn = memory().await;
        conn.execute("CREATE TABLE items (name TEXT NOT NULL)").await.unwrap();

        let tx = conn.begin().await.unwrap();
        assert!(tx.same_pool(&conn));
        tx.execute_query(sqlx::query("INSERT INTO items (name) VALUES (?)").bind("lost"))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(count(&conn).await, 0);

        let tx = conn.begin().await.unwrap();
        tx.execute("INSERT INTO items (name) VALUES ('kept')").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(count(&conn).await, 1);
    }

    #[tokio::test]
    async fn finished_transactions_reject_further_work() {
        let conn = memory().await;
        let tx = conn.begin().await.unwrap();
        tx.commit().await.unwrap();

        assert!(tx.is_finished().await);
        assert!(matches!(tx.execute("SELECT 1").await, Err(DbError::TransactionFinished)));
        assert!(matches!(tx.rollback().await, Err(DbError::TransactionFinished)));
        assert!(matches!(conn.commit().await, Err(DbError::NotInTransaction)));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("tenant_acme"), "\"tenant_acme\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
