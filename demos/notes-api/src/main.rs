use anyhow::Result;
use bedrock_axum::init_tracing;
use bedrock_core::config::keys;
use bedrock_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::new();
    config.set(keys::APP_NAME, "notes-api");
    config.set(keys::HTTP_HOST, "127.0.0.1");
    config.set(keys::HTTP_PORT, "3036");
    config.set(keys::DATABASE_URL, "sqlite://data/main.db");
    config.set(
        keys::TENANTS_URL,
        format!("file://{}", notes_api::resources_dir().join("tenants.json").display()),
    );
    // APP__DATABASE__URL=... and friends override the defaults above.
    config.load_env("APP__");

    init_tracing(&config.snapshot());
    std::fs::create_dir_all("data")?;

    let app = notes_api::build(config).await?;
    tracing::info!(addr = %app.address(), "notes-api starting");
    app.listen().await
}
