use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::Router;
use bedrock_adapters::{
    cache_from_url, mailer_from_url, pubsub_from_url, secrets_from_url, Cache, IdempotencyStore, Mailer,
    PubSub, SecretStore,
};
use bedrock_auth::{AuthProvider, HttpAuthProvider, JwtOptions, TokenProvider};
use bedrock_core::config::{keys, Config, ConfigSnapshot};
use bedrock_core::{
    resolve_order, tenant_provider_from_url, AppError, Container, ContainerBuilder, TenantProvider, Translator,
};
use bedrock_db::{ConnectOptions, DataSource, DataSourceOptions, EntityManager, MigrationSet};
use tokio::net::TcpListener;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::assets::{self, AssetDirs};
use crate::error::ApiError;
use crate::mcp;
use crate::middlewares::{auth, context, recover};
use crate::routes::{RouteOptions, Routes};
use crate::state::{AppState, StateInner};
use crate::swagger;

/// A feature of an axum-served Bedrock app.
pub type Feature = bedrock_core::Feature<InitContext, Routes>;

const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// What a feature's `init` hook sees.
pub struct InitContext {
    config: ConfigSnapshot,
    feature: String,
    services: ContainerBuilder,
    data_source: Option<Arc<DataSource>>,
    translator: Arc<Translator>,
}

impl InitContext {
    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    /// Name of the feature being initialized.
    pub fn feature(&self) -> &str {
        &self.feature
    }

    /// Register services for handlers and later features.
    pub fn services(&mut self) -> &mut ContainerBuilder {
        &mut self.services
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services.get::<T>()
    }

    pub fn data_source(&self) -> Option<&Arc<DataSource>> {
        self.data_source.as_ref()
    }

    pub fn entity_manager(&self) -> EntityManager {
        EntityManager::new(self.data_source.clone())
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }
}

pub struct AppBuilder {
    config: Config,
    features: Vec<Arc<Feature>>,
    tenants: Option<Arc<dyn TenantProvider>>,
    auth_provider: Option<Arc<dyn AuthProvider>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            features: Vec::new(),
            tenants: None,
            auth_provider: None,
        }
    }

    pub fn feature(mut self, feature: Arc<Feature>) -> Self {
        self.features.push(feature);
        self
    }

    pub fn features<I>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = Arc<Feature>>,
    {
        self.features.extend(features);
        self
    }

    /// Use this provider instead of the one named by `tenants.url`.
    pub fn tenant_provider(mut self, provider: Arc<dyn TenantProvider>) -> Self {
        self.tenants = Some(provider);
        self
    }

    /// Use this provider instead of the one named by `auth.provider.url`.
    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Bootstrap: order features, connect adapters and databases, run
    /// migrations, initialize features and register their routes.
    ///
    /// Any failure aborts the build; nothing is served half-initialized.
    pub async fn build(self) -> anyhow::Result<App> {
        let config = self.config.snapshot();

        let features = resolve_order(&self.features).context("resolving feature order")?;
        tracing::info!(
            features = ?features.iter().map(|f| f.name()).collect::<Vec<_>>(),
            "features ordered"
        );

        let tenants = match self.tenants {
            Some(provider) => Some(provider),
            None => match config.get(keys::TENANTS_URL) {
                Some(url) => Some(tenant_provider_from_url(url).context("tenant provider")?),
                None => None,
            },
        };

        let mut translator = Translator::new(config.get_or(keys::I18N_DEFAULT_LOCALE, "en"));
        let mut migrations = MigrationSet::new();
        let mut asset_dirs: Vec<PathBuf> = config.get(keys::ASSETS_DIR).map(PathBuf::from).into_iter().collect();
        for feature in &features {
            if let Some(dir) = feature.resource_dir("i18n") {
                let n = translator
                    .load_dir(&dir)
                    .with_context(|| format!("loading i18n bundles of feature '{}'", feature.name()))?;
                tracing::debug!(feature = feature.name(), bundles = n, "i18n bundles loaded");
            }
            if let Some(dir) = feature.resource_dir("migrations") {
                migrations
                    .load_dir(&dir)
                    .with_context(|| format!("loading migrations of feature '{}'", feature.name()))?;
            }
            if let Some(dir) = feature.resource_dir("assets") {
                asset_dirs.push(dir);
            }
        }
        let translator = Arc::new(translator);

        let data_source = match config.get(keys::DATABASE_URL) {
            Some(url) => {
                let mut connect = ConnectOptions::default();
                if let Some(n) = config.get_u32(keys::DATABASE_MAX_CONNECTIONS) {
                    connect = connect.max_connections(n);
                }
                let mut options = DataSourceOptions::new(url)
                    .with_migrations(migrations)
                    .with_connect_options(connect);
                if let Some(prefix) = config.get(keys::DATABASE_CHANGELOG_PREFIX) {
                    options = options.with_changelog_prefix(prefix);
                }
                if let Some(provider) = &tenants {
                    options = options.with_tenants(Arc::clone(provider));
                }
                Some(DataSource::init(options).await.context("initializing the data source")?)
            }
            None => {
                if !migrations.is_empty() {
                    tracing::warn!("features ship migrations but database.url is not set");
                }
                None
            }
        };

        let cache = cache_from_url(&config.get_or(keys::CACHE_URL, "memory"))
            .await
            .context("cache")?;
        let pubsub = match config.get(keys::PUBSUB_URL) {
            Some(url) => Some(pubsub_from_url(url).await.context("pubsub")?),
            None => None,
        };
        let secrets = match config.get(keys::SECRETS_URL) {
            Some(url) => Some(secrets_from_url(url).context("secrets")?),
            None => None,
        };
        let mailer = match config.get(keys::EMAIL_URL) {
            Some(url) => Some(mailer_from_url(url).context("email")?),
            None => None,
        };

        let tokens = match config.get(keys::JWT_SECRET) {
            Some(_) => {
                let options = JwtOptions::from_config(&config).context("jwt options")?;
                Some(Arc::new(TokenProvider::new(options).context("token provider")?))
            }
            None => None,
        };
        let auth_provider = match self.auth_provider {
            Some(provider) => Some(provider),
            None => config
                .get(keys::AUTH_PROVIDER_URL)
                .map(|url| Arc::new(HttpAuthProvider::new(url)) as Arc<dyn AuthProvider>),
        };

        let idempotency = IdempotencyStore::new(
            Arc::clone(&cache),
            config
                .get_duration(keys::IDEMPOTENCY_TTL)
                .unwrap_or(DEFAULT_IDEMPOTENCY_TTL),
        );

        let mut services = ContainerBuilder::new();
        services.provide::<dyn Cache>(Arc::clone(&cache));
        services.provide(Arc::new(config.clone()));
        services.provide(Arc::clone(&translator));
        services.provide(Arc::new(idempotency.clone()));
        if let Some(pubsub) = &pubsub {
            services.provide::<dyn PubSub>(Arc::clone(pubsub));
        }
        if let Some(secrets) = &secrets {
            services.provide::<dyn SecretStore>(Arc::clone(secrets));
        }
        if let Some(mailer) = &mailer {
            services.provide::<dyn Mailer>(Arc::clone(mailer));
        }
        if let Some(tokens) = &tokens {
            services.provide(Arc::clone(tokens));
        }
        if let Some(ds) = &data_source {
            services.provide(Arc::clone(ds));
        }
        if let Some(provider) = &tenants {
            services.provide::<dyn TenantProvider>(Arc::clone(provider));
        }

        let mut init = InitContext {
            config: config.clone(),
            feature: String::new(),
            services,
            data_source: data_source.clone(),
            translator: Arc::clone(&translator),
        };
        for feature in &features {
            init.feature = feature.name().to_string();
            feature
                .init(&mut init)
                .with_context(|| format!("initializing feature '{}'", feature.name()))?;
            tracing::debug!(feature = feature.name(), "feature initialized");
        }
        let container: Container = init.services.build();

        let state = AppState::new(StateInner {
            tenant_from_host: config.get_bool(keys::TENANT_FROM_HOST).unwrap_or(false),
            config: config.clone(),
            container,
            entity_manager: EntityManager::new(data_source.clone()),
            data_source,
            tenants,
            auth_provider,
            tokens,
            translator,
            idempotency: Some(idempotency),
        });

        let mut routes = Routes::new(state.clone());
        for feature in &features {
            routes.set_feature(Some(feature.name()));
            feature
                .init_routes(&mut routes)
                .with_context(|| format!("registering routes of feature '{}'", feature.name()))?;
        }
        routes.set_feature(None);
        let tools = routes.tools().clone();
        routes.post_with(
            "/mcp",
            RouteOptions::new().summary("Model Context Protocol (JSON-RPC 2.0)"),
            mcp::handler(tools),
        );
        if let Some(problem) = routes.errors().first() {
            return Err(AppError::internal(problem.clone()).into_anyhow()).context("registering routes");
        }

        let (router, docs, tools) = routes.into_parts();
        let title = config.get_or(keys::APP_NAME, "bedrock");
        let document = swagger::openapi(&title, env!("CARGO_PKG_VERSION"), &docs);
        tracing::info!(routes = docs.len(), tools = tools.len(), "routes registered");

        let router = router
            .merge(swagger::router(document))
            .merge(assets::router(AssetDirs::new(asset_dirs)))
            .fallback(fallback)
            .layer(from_fn_with_state(state.clone(), auth::authenticate))
            .layer(from_fn_with_state(state.clone(), context::context))
            .layer(from_fn_with_state(state.clone(), recover::recover))
            .with_state(state.clone())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

        Ok(App { state, router })
    }
}

async fn fallback() -> Response {
    ApiError::from(AppError::not_found("route not found")).into_response()
}

pub struct App {
    state: AppState,
    router: Router,
}

impl App {
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The fully layered router, for `oneshot` tests or custom servers.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// `http.host:http.port`, defaulting to `0.0.0.0:8080`.
    pub fn address(&self) -> String {
        let config = self.state.config();
        format!(
            "{}:{}",
            config.get_or(keys::HTTP_HOST, "0.0.0.0"),
            config.get_or(keys::HTTP_PORT, "8080")
        )
    }

    pub async fn listen(self) -> anyhow::Result<()> {
        let addr = self.address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        self.serve(listener).await
    }

    /// Serve until Ctrl-C, then drain in-flight requests and close the
    /// database pools.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        tracing::info!(addr = ?listener.local_addr().ok(), "listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        if let Some(ds) = self.state.data_source() {
            ds.close().await;
        }
        tracing::info!("server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for the shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
