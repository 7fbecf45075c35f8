//! bedrock-db: the multi-tenant database layer of Bedrock.
//!
//! A [`DataSource`] owns the default [`Connection`] plus one connection per
//! tenant, each migrated once from the features' SQL files. The
//! [`EntityManager`] picks the connection that applies to a request.

pub mod connection;
pub mod datasource;
pub mod dsn;
pub mod entity_manager;
pub mod error;
pub mod migrations;

pub use connection::{AnyQuery, ConnectOptions, Connection};
pub use datasource::{DataSource, DataSourceOptions};
pub use dsn::{DatabaseUrl, Dialect};
pub use entity_manager::{DbContext, EntityManager};
pub use error::{DbError, DbResult};
pub use migrations::{Migration, MigrationScope, MigrationSet, Migrator, CHANGELOG_TABLE};

pub use sqlx::any::AnyRow;
pub use sqlx::Row;

/// The sqlx version queries are built with (`bedrock_db::sqlx::query(..)`).
pub use sqlx;
