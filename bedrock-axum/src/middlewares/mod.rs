//! The request pipeline.
//!
//! Global, outermost first: [`recover`], [`context`], [`auth`].
//! Per route, outermost first: [`tenant`], [`guard`], [`idempotency`],
//! [`transaction`].

use std::sync::Arc;

use crate::routes::RouteOptions;
use crate::state::AppState;

pub mod auth;
pub mod context;
pub mod guard;
pub mod idempotency;
pub mod recover;
pub mod tenant;
pub mod transaction;

/// State handed to the per-route middlewares.
#[derive(Clone)]
pub struct RouteState {
    pub app: AppState,
    pub options: Arc<RouteOptions>,
}

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const TENANT_HEADER: &str = "x-tenantid";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENT_REPLAYED_HEADER: &str = "idempotent-replayed";
