use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bedrock_core::AppError;
use bedrock_db::Connection;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use super::RouteState;
use crate::context::take_context;
use crate::error::ApiError;

/// Work a handler defers until its request has committed, such as
/// publishing an event about a row it inserted.
///
/// Attach it to the response with `Extension(after_commit)`. The recover
/// middleware runs it once the response is known to be a success, which is
/// after every transaction below it committed. Error responses and failed
/// commits drop it.
#[derive(Clone, Default)]
pub struct AfterCommit {
    jobs: Arc<Mutex<Vec<BoxFuture<'static, ()>>>>,
}

impl AfterCommit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<F>(self, job: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.jobs.lock().push(Box::pin(job));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub(crate) async fn run(self) {
        let jobs = std::mem::take(&mut *self.jobs.lock());
        for job in jobs {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                tracing::error!("after-commit job panicked");
            }
        }
    }
}

/// Run the handler inside transactions on the default connection and, when
/// a tenant was resolved, on the tenant connection.
///
/// A panic or an error status (>= 400) rolls both back; the panic is then
/// resumed for the recover middleware. Otherwise both are committed, and a
/// failed commit turns the response into a 500.
pub async fn transaction(State(route): State<RouteState>, mut req: Request, next: Next) -> Response {
    let Some(ds) = route.app.data_source().cloned() else {
        return next.run(req).await;
    };

    let mut ctx = take_context(&mut req);
    let mut open: Vec<Connection> = Vec::with_capacity(2);

    let default = ctx
        .db
        .default
        .clone()
        .unwrap_or_else(|| ds.default_connection().clone());
    match default.begin().await {
        Ok(tx) => {
            ctx.db.default = Some(tx.clone());
            open.push(tx);
        }
        Err(e) => return ApiError::from(AppError::from(e)).into_response(),
    }

    if let Some(tenant) = ctx.db.tenant.clone() {
        if tenant.same_pool(&default) {
            ctx.db.tenant = ctx.db.default.clone();
        } else {
            match tenant.begin().await {
                Ok(tx) => {
                    ctx.db.tenant = Some(tx.clone());
                    open.push(tx);
                }
                Err(e) => {
                    rollback_all(&open).await;
                    return ApiError::from(AppError::from(e)).into_response();
                }
            }
        }
    }

    req.extensions_mut().insert(ctx);

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Err(panic) => {
            rollback_all(&open).await;
            std::panic::resume_unwind(panic)
        }
        Ok(response) if response.status().is_client_error() || response.status().is_server_error() => {
            rollback_all(&open).await;
            response
        }
        Ok(response) => {
            for (i, tx) in open.iter().enumerate() {
                if let Err(e) = tx.commit().await {
                    tracing::error!(tenant = %tx.tenant_id(), error = %e, "commit failed");
                    rollback_all(&open[i + 1..]).await;
                    return ApiError::from(AppError::internal("commit failed").with_source(e.into()))
                        .into_response();
                }
            }
            response
        }
    }
}

async fn rollback_all(open: &[Connection]) {
    for tx in open {
        if let Err(e) = tx.rollback().await {
            tracing::warn!(tenant = %tx.tenant_id(), error = %e, "rollback failed");
        }
    }
}
