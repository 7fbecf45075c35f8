use std::sync::Arc;

use async_trait::async_trait;
use bedrock_core::{StaticTenantProvider, Tenant, TenantProvider};
use bedrock_db::{
    DataSource, DataSourceOptions, DbContext, DbError, EntityManager, Migration, MigrationScope,
    MigrationSet, Row,
};
use parking_lot::Mutex;

fn sqlite_url(dir: &tempfile::TempDir, name: &str) -> String {
    format!("sqlite://{}/{name}.db", dir.path().display())
}

fn migrations() -> MigrationSet {
    let mut set = MigrationSet::new();
    set.add(
        MigrationScope::Shared,
        Migration::new("001_accounts.sql", "CREATE TABLE accounts (id TEXT PRIMARY KEY)"),
    )
    .unwrap();
    set.add(
        MigrationScope::Tenant,
        Migration::new("001_notes.sql", "CREATE TABLE notes (id INTEGER PRIMARY KEY, title TEXT)"),
    )
    .unwrap();
    set
}

fn acme_and_demo(dir: &tempfile::TempDir) -> Vec<Tenant> {
    vec![
        Tenant::new("acme", "acme-corp").with_database_url(sqlite_url(dir, "acme")),
        Tenant::new("demo", "demo-org").with_database_url(sqlite_url(dir, "demo")),
    ]
}

async fn table_exists(conn: &bedrock_db::Connection, table: &str) -> bool {
    let sql = format!("SELECT name FROM sqlite_master WHERE type='table' AND name='{table}'");
    !conn.fetch_all(&sql).await.unwrap().is_empty()
}

#[tokio::test]
async fn ids_and_slugs_share_one_live_connection() {
    let dir = tempfile::tempdir().unwrap();
    let ds = DataSource::init(
        DataSourceOptions::new(sqlite_url(&dir, "main"))
            .with_migrations(migrations())
            .with_tenants(Arc::new(StaticTenantProvider::new(acme_and_demo(&dir)))),
    )
    .await
    .unwrap();

    let acme = ds.connection("acme").await.unwrap().unwrap();
    let acme_corp = ds.connection("acme-corp").await.unwrap().unwrap();
    let demo = ds.connection("demo").await.unwrap().unwrap();

    acme.ping().await.unwrap();
    acme_corp.ping().await.unwrap();
    demo.ping().await.unwrap();

    assert_eq!(acme.database_url(), acme_corp.database_url());
    assert!(acme.same_pool(&acme_corp));
    assert_eq!(acme.tenant_id(), "acme");
    assert_ne!(acme.database_url(), demo.database_url());
    assert_eq!(ds.tenant_ids(), vec!["acme", "demo"]);
}

#[tokio::test]
async fn unknown_tenants_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let ds = DataSource::init(
        DataSourceOptions::new(sqlite_url(&dir, "main"))
            .with_tenants(Arc::new(StaticTenantProvider::new(acme_and_demo(&dir)))),
    )
    .await
    .unwrap();

    assert!(ds.connection("nonexistent").await.unwrap().is_none());
}

#[tokio::test]
async fn shared_and_tenant_migrations_go_to_their_connections() {
    let dir = tempfile::tempdir().unwrap();
    let ds = DataSource::init(
        DataSourceOptions::new(sqlite_url(&dir, "main"))
            .with_migrations(migrations())
            .with_tenants(Arc::new(StaticTenantProvider::new(acme_and_demo(&dir)))),
    )
    .await
    .unwrap();

    let default = ds.default_connection();
    assert!(table_exists(default, "accounts").await);
    assert!(!table_exists(default, "notes").await);

    let acme = ds.connection("acme").await.unwrap().unwrap();
    assert!(table_exists(&acme, "notes").await);
    assert!(!table_exists(&acme, "accounts").await);

    let rows = acme
        .fetch_all("SELECT filename FROM database_changelog")
        .await
        .unwrap();
    let names: Vec<String> = rows.iter().map(|r| r.get::<String, _>("filename")).collect();
    assert_eq!(names, vec!["001_notes.sql"]);
}

#[tokio::test]
async fn reopening_does_not_rerun_migrations() {
    let dir = tempfile::tempdir().unwrap();
    for _ in 0..2 {
        let ds = DataSource::init(
            DataSourceOptions::new(sqlite_url(&dir, "main"))
                .with_migrations(migrations())
                .with_changelog_prefix("app_"),
        )
        .await
        .unwrap();
        let rows = ds
            .default_connection()
            .fetch_all("SELECT COUNT(*) AS n FROM app_database_changelog")
            .await
            .unwrap();
        assert_eq!(rows[0].get::<i64, _>("n"), 1);
        ds.close().await;
    }
}

struct GrowingProvider {
    tenants: Mutex<Vec<Tenant>>,
    scans: Mutex<usize>,
}

#[async_trait]
impl TenantProvider for GrowingProvider {
    async fn tenants(&self) -> anyhow::Result<Vec<Tenant>> {
        *self.scans.lock() += 1;
        Ok(self.tenants.lock().clone())
    }
}

#[tokio::test]
async fn misses_rescan_the_provider_once() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(GrowingProvider {
        tenants: Mutex::new(Vec::new()),
        scans: Mutex::new(0),
    });
    let ds = DataSource::init(
        DataSourceOptions::new(sqlite_url(&dir, "main")).with_tenants(provider.clone()),
    )
    .await
    .unwrap();
    assert_eq!(*provider.scans.lock(), 1);

    provider
        .tenants
        .lock()
        .push(Tenant::new("late", "late-co").with_database_url(sqlite_url(&dir, "late")));

    let late = ds.connection("late-co").await.unwrap();
    assert!(late.is_some());
    assert_eq!(*provider.scans.lock(), 2);

    // Known tenants never hit the provider again.
    ds.connection("late").await.unwrap().unwrap();
    assert_eq!(*provider.scans.lock(), 2);
}

#[tokio::test]
async fn sqlite_tenants_need_their_own_url() {
    let dir = tempfile::tempdir().unwrap();
    let err = DataSource::init(
        DataSourceOptions::new(sqlite_url(&dir, "main"))
            .with_tenants(Arc::new(StaticTenantProvider::new(vec![Tenant::new("acme", "acme-corp")]))),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DbError::NoTenantUrl { .. }));
}

#[tokio::test]
async fn entity_manager_prefers_the_tenant_connection() {
    let dir = tempfile::tempdir().unwrap();
    let ds = DataSource::init(
        DataSourceOptions::new(sqlite_url(&dir, "main"))
            .with_tenants(Arc::new(StaticTenantProvider::new(acme_and_demo(&dir)))),
    )
    .await
    .unwrap();
    let em = EntityManager::new(Some(ds.clone()));

    let fallback = em.current(&DbContext::default()).unwrap();
    assert_eq!(fallback.tenant_id(), "default");

    let acme = em.tenant("acme-corp").await.unwrap().unwrap();
    let ctx = DbContext {
        default: Some(ds.default_connection().clone()),
        tenant: Some(acme),
    };
    assert_eq!(em.current(&ctx).unwrap().tenant_id(), "acme");

    let empty = EntityManager::new(None);
    assert!(empty.current(&DbContext::default()).is_none());
    assert!(empty.tenant("acme").await.is_err());
}

#[tokio::test]
async fn slugs_cannot_take_over_another_tenants_key() {
    let dir = tempfile::tempdir().unwrap();
    let tenants = vec![
        Tenant::new("acme", "acme-corp").with_database_url(sqlite_url(&dir, "acme")),
        Tenant::new("impostor", "acme").with_database_url(sqlite_url(&dir, "impostor")),
    ];
    let err = DataSource::init(
        DataSourceOptions::new(sqlite_url(&dir, "main"))
            .with_tenants(Arc::new(StaticTenantProvider::new(tenants))),
    )
    .await
    .unwrap_err();

    match err {
        DbError::TenantKeyConflict { tenant, key, owner } => {
            assert_eq!(tenant, "impostor");
            assert_eq!(key, "acme");
            assert_eq!(owner, "acme");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn late_tenants_cannot_reuse_a_known_slug() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(GrowingProvider {
        tenants: Mutex::new(acme_and_demo(&dir)),
        scans: Mutex::new(0),
    });
    let ds = DataSource::init(
        DataSourceOptions::new(sqlite_url(&dir, "main")).with_tenants(provider.clone()),
    )
    .await
    .unwrap();

    provider
        .tenants
        .lock()
        .push(Tenant::new("acme-corp", "other").with_database_url(sqlite_url(&dir, "other")));

    let err = ds.connection("other").await.unwrap_err();
    assert!(matches!(err, DbError::TenantKeyConflict { .. }));

    let acme = ds.connection("acme-corp").await.unwrap().unwrap();
    assert_eq!(acme.tenant_id(), "acme");
}
