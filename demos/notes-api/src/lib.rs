//! A small multi-tenant notes service.
//!
//! `accounts` owns the shared `accounts` table and answers `/me`. `notes`
//! depends on it and keeps one `notes` table per tenant database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bedrock_axum::{App, Feature};
use bedrock_core::Config;
use bedrock_db::Connection;

pub mod accounts;
pub mod notes;

/// Resource bundles shipped with the crate.
pub fn resources_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources")
}

pub fn features(resources: &Path) -> Vec<Arc<Feature>> {
    let accounts = accounts::feature(resources.join("accounts"));
    let notes = notes::feature(resources.join("notes"), &accounts);
    vec![accounts, notes]
}

pub async fn build(config: Config) -> anyhow::Result<App> {
    App::builder(config)
        .features(features(&resources_dir()))
        .build()
        .await
}

/// `?, ?, ?` on SQLite, `$1, $2, $3` on Postgres.
pub(crate) fn placeholders(conn: &Connection, count: usize) -> String {
    let dialect = conn.dialect();
    (1..=count)
        .map(|n| dialect.placeholder(n))
        .collect::<Vec<_>>()
        .join(", ")
}
