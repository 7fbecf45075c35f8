//! bedrock-axum: serve Bedrock features over axum.
//!
//! [`AppBuilder::build`] turns configuration plus a list of features into a
//! layered router:
//!
//! ```text
//! SetRequestId -> Trace -> PropagateRequestId
//!   -> recover -> context -> auth            (every request)
//!   -> tenant -> guard -> idempotency -> tx  (routes registered via Routes)
//!   -> handler
//! ```
//!
//! ```rust,no_run
//! use bedrock_axum::{App, Feature, RequestContext};
//! use bedrock_core::Config;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let hello = Feature::builder("hello")
//!     .on_routes(|routes| {
//!         routes.get("/hello", |ctx: RequestContext| async move {
//!             format!("hello from {}", ctx.tenant_id().unwrap_or("default"))
//!         });
//!         Ok(())
//!     })
//!     .build();
//!
//! App::builder(Config::from_env("APP__"))
//!     .feature(hello)
//!     .build()
//!     .await?
//!     .listen()
//!     .await
//! # }
//! ```

pub mod app;
pub mod assets;
pub mod context;
mod error;
pub mod logging;
pub mod mcp;
pub mod middlewares;
pub mod routes;
pub mod state;
pub mod swagger;

pub use app::{App, AppBuilder, Feature, InitContext};
pub use context::RequestContext;
pub use error::{envelope, error_response, ApiError, ApiResult, ErrorPayload};
pub use logging::init_tracing;
pub use mcp::{FnTool, Tool, ToolSet};
pub use middlewares::transaction::AfterCommit;
pub use routes::{RouteDoc, RouteOptions, Routes};
pub use state::AppState;

pub use axum;
