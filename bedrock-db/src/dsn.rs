use std::fmt;

use bedrock_core::ConnectionUrl;

use crate::error::{DbError, DbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Bind placeholder for the `n`th (1-based) parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Sqlite => "?".to_string(),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A database URL split into what sqlx sees and what Bedrock handles itself.
///
/// `schema` is a Bedrock option (Postgres only) and is removed before the
/// URL is handed to the driver. File-backed SQLite URLs get `mode=rwc` so
/// a missing database file is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUrl {
    original: String,
    driver_url: String,
    dialect: Dialect,
    schema: Option<String>,
}

impl DatabaseUrl {
    pub fn parse(raw: &str) -> DbResult<Self> {
        let url = ConnectionUrl::parse(raw)?;
        let dialect = match url.scheme() {
            "postgres" | "postgresql" => Dialect::Postgres,
            "sqlite" => Dialect::Sqlite,
            other => {
                return Err(DbError::UnsupportedDialect {
                    scheme: other.to_string(),
                })
            }
        };

        let schema = url.param("schema").map(|s| s.to_string());
        let mut driver_url = url.without_params(&["schema"]);

        if dialect == Dialect::Sqlite && !is_memory(&driver_url) && url.param("mode").is_none() {
            let sep = if driver_url.contains('?') { '&' } else { '?' };
            driver_url = format!("{driver_url}{sep}mode=rwc");
        }

        Ok(Self {
            original: raw.trim().to_string(),
            driver_url,
            dialect,
            schema: schema.filter(|_| dialect == Dialect::Postgres),
        })
    }

    /// The URL as configured, `schema` included.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn driver_url(&self) -> &str {
        &self.driver_url
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn is_memory(&self) -> bool {
        is_memory(&self.driver_url)
    }

    /// Same server and database, different Postgres schema.
    pub fn with_schema(&self, schema: &str) -> DbResult<Self> {
        if self.dialect != Dialect::Postgres {
            return Err(DbError::UnsupportedDialect {
                scheme: format!("{} (schema per tenant)", self.dialect),
            });
        }
        let base = ConnectionUrl::parse(&self.original)?.without_params(&["schema"]);
        let sep = if base.contains('?') { '&' } else { '?' };
        Self::parse(&format!("{base}{sep}schema={schema}"))
    }

    pub fn redacted(&self) -> String {
        bedrock_core::dsn::redact(&self.original)
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

fn is_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
