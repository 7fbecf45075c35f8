//! Changelog-tracked SQL migrations.
//!
//! Every feature may ship `migrations/shared/*.sql` (run against the default
//! connection) and `migrations/tenant/*.sql` (run against each tenant
//! connection). Applied filenames are recorded in `database_changelog`,
//! optionally prefixed, so each file runs once per connection.

use std::collections::HashSet;
use std::path::Path;

use sqlx::Row;

use crate::connection::Connection;
use crate::dsn::Dialect;
use crate::error::{DbError, DbResult};

pub const CHANGELOG_TABLE: &str = "database_changelog";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationScope {
    Shared,
    Tenant,
}

impl MigrationScope {
    pub fn dir_name(&self) -> &'static str {
        match self {
            MigrationScope::Shared => "shared",
            MigrationScope::Tenant => "tenant",
        }
    }

    /// The default tenant runs shared migrations, everyone else tenant ones.
    pub fn for_tenant(tenant_id: &str) -> Self {
        if tenant_id == bedrock_core::DEFAULT_TENANT {
            MigrationScope::Shared
        } else {
            MigrationScope::Tenant
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub name: String,
    pub sql: String,
}

impl Migration {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// Ordered migrations for both scopes.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    shared: Vec<Migration>,
    tenant: Vec<Migration>,
}

impl MigrationSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn scope_mut(&mut self, scope: MigrationScope) -> &mut Vec<Migration> {
        match scope {
            MigrationScope::Shared => &mut self.shared,
            MigrationScope::Tenant => &mut self.tenant,
        }
    }

    pub fn get(&self, scope: MigrationScope) -> &[Migration] {
        match scope {
            MigrationScope::Shared => &self.shared,
            MigrationScope::Tenant => &self.tenant,
        }
    }

    pub fn add(&mut self, scope: MigrationScope, migration: Migration) -> DbResult<&mut Self> {
        let list = self.scope_mut(scope);
        if list.iter().any(|m| m.name == migration.name) {
            return Err(DbError::DuplicateMigration {
                name: migration.name,
            });
        }
        list.push(migration);
        Ok(self)
    }

    /// Append the `.sql` files of `<dir>/shared` and `<dir>/tenant`, each
    /// sorted by filename. Missing sub-directories are skipped.
    pub fn load_dir(&mut self, dir: &Path) -> DbResult<usize> {
        let mut loaded = 0;
        for scope in [MigrationScope::Shared, MigrationScope::Tenant] {
            let sub = dir.join(scope.dir_name());
            if !sub.is_dir() {
                continue;
            }
            for migration in read_sql_files(&sub)? {
                tracing::debug!(migration = %migration.name, scope = scope.dir_name(), "migration found");
                self.add(scope, migration)?;
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.tenant.is_empty()
    }
}

fn read_sql_files(dir: &Path) -> DbResult<Vec<Migration>> {
    let io_err = |source| DbError::MigrationIo {
        path: dir.display().to_string(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let sql = std::fs::read_to_string(&path).map_err(|source| DbError::MigrationIo {
            path: path.display().to_string(),
            source,
        })?;
        files.push(Migration::new(name, sql));
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Applies pending migrations to one connection.
#[derive(Debug, Clone, Default)]
pub struct Migrator {
    table: String,
}

impl Migrator {
    pub fn new(prefix: Option<&str>) -> Self {
        Self {
            table: format!("{}{CHANGELOG_TABLE}", prefix.unwrap_or("")),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn ensure_table(&self, conn: &Connection) -> DbResult<()> {
        let table = crate::connection::quote_ident(&self.table);
        let ddl = match conn.dialect() {
            Dialect::Postgres => format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 id BIGSERIAL PRIMARY KEY, \
                 filename TEXT NOT NULL UNIQUE, \
                 applied_at TEXT NOT NULL)"
            ),
            Dialect::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 filename TEXT NOT NULL UNIQUE, \
                 applied_at TEXT NOT NULL)"
            ),
        };
        conn.execute(&ddl).await?;
        Ok(())
    }

    /// Filenames already recorded in the changelog.
    pub async fn applied(&self, conn: &Connection) -> DbResult<HashSet<String>> {
        self.ensure_table(conn).await?;
        let sql = format!(
            "SELECT filename FROM {}",
            crate::connection::quote_ident(&self.table)
        );
        conn.fetch_all(&sql)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("filename").map_err(DbError::from))
            .collect()
    }

    /// Run every migration not yet in the changelog, each in its own
    /// transaction. Returns the names that were applied.
    pub async fn run(&self, conn: &Connection, migrations: &[Migration]) -> DbResult<Vec<String>> {
        let applied = self.applied(conn).await?;
        let insert = format!(
            "INSERT INTO {} (filename, applied_at) VALUES ({}, {})",
            crate::connection::quote_ident(&self.table),
            conn.dialect().placeholder(1),
            conn.dialect().placeholder(2),
        );

        let mut ran = Vec::new();
        for migration in migrations.iter().filter(|m| !applied.contains(&m.name)) {
            let tx = conn.begin().await?;
            let outcome = async {
                tx.execute(&migration.sql).await?;
                tx.execute_query(
                    sqlx::query(&insert)
                        .bind(migration.name.clone())
                        .bind(chrono::Utc::now().to_rfc3339()),
                )
                .await?;
                Ok::<_, DbError>(())
            }
            .await;

            match outcome {
                Ok(()) => tx.commit().await?,
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(error = %rollback_err, "rollback after failed migration failed");
                    }
                    let source = match err {
                        DbError::Sqlx(e) => e,
                        other => sqlx::Error::Protocol(other.to_string()),
                    };
                    return Err(DbError::migration(&migration.name, source));
                }
            }

            tracing::info!(
                tenant = conn.tenant_id(),
                migration = %migration.name,
                "migration applied"
            );
            ran.push(migration.name.clone());
        }
        Ok(ran)
    }
}
