use bedrock_core::{AppError, UrlError};
use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("unsupported database dialect: {scheme}")]
    UnsupportedDialect { scheme: String },

    #[error(transparent)]
    Url(#[from] UrlError),

    #[error("tenant '{tenant}' has no database url and '{dialect}' cannot derive one")]
    NoTenantUrl { tenant: String, dialect: String },

    #[error("transaction already finished")]
    TransactionFinished,

    #[error("not inside a transaction")]
    NotInTransaction,

    #[error("duplicate migration '{name}'")]
    DuplicateMigration { name: String },

    #[error("migration '{name}' failed: {source}")]
    Migration {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("reading migrations from {path}: {source}")]
    MigrationIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tenant '{tenant}' cannot use key '{key}', it belongs to tenant '{owner}'")]
    TenantKeyConflict {
        tenant: String,
        key: String,
        owner: String,
    },

    #[error("tenant provider failed: {0}")]
    Provider(#[source] anyhow::Error),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl DbError {
    pub fn migration(name: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Migration {
            name: name.into(),
            source,
        }
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        if matches!(err, DbError::Sqlx(sqlx::Error::RowNotFound)) {
            return AppError::not_found("record not found").with_source(err.into());
        }
        let message = err.to_string();
        AppError::internal(message).with_source(err.into())
    }
}
