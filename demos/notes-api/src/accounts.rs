use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use bedrock_axum::{ApiResult, AppState, Feature, RequestContext, RouteOptions};
use bedrock_core::AppError;
use bedrock_db::{sqlx, Connection, Row};
use serde::Serialize;

use crate::placeholders;

pub fn feature(resources: PathBuf) -> Arc<Feature> {
    Feature::builder("accounts")
        .resources(resources)
        .on_routes(|routes| {
            routes
                .get_with(
                    "/me",
                    RouteOptions::new()
                        .authenticated()
                        .without_transaction()
                        .summary("Who the caller is"),
                    me,
                )
                .put_with(
                    "/me",
                    RouteOptions::new()
                        .authenticated()
                        .summary("Record the caller in the shared accounts table"),
                    register,
                );
            Ok(())
        })
        .build()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Me {
    pub user_id: String,
    pub email: Option<String>,
    pub tenant_id: Option<String>,
    pub permissions: Vec<String>,
    pub greeting: String,
    pub registered: bool,
}

async fn me(State(app): State<AppState>, ctx: RequestContext) -> ApiResult<Json<Me>> {
    let auth = ctx.require_auth()?;
    let registered = match shared_connection(&app, &ctx) {
        Some(conn) => is_registered(&conn, &auth.user_id).await?,
        None => false,
    };

    Ok(Json(Me {
        user_id: auth.user_id.clone(),
        email: auth.email.clone(),
        tenant_id: auth.tenant_id.clone(),
        permissions: auth.permissions.clone(),
        greeting: app.translate(&ctx, "accounts.welcome", &[("user", &auth.user_id)]),
        registered,
    }))
}

async fn register(State(app): State<AppState>, ctx: RequestContext) -> ApiResult<Json<Me>> {
    let auth = ctx.require_auth()?;
    let conn = shared_connection(&app, &ctx)
        .ok_or_else(|| AppError::internal("no database configured"))?;

    let now = chrono::Utc::now().to_rfc3339();
    let sql = format!(
        "INSERT INTO accounts (user_id, email, tenant_id, created_at, updated_at) VALUES ({}) \
         ON CONFLICT (user_id) DO UPDATE SET email = excluded.email, \
         tenant_id = excluded.tenant_id, updated_at = excluded.updated_at",
        placeholders(&conn, 5)
    );
    conn.execute_query(
        sqlx::query(&sql)
            .bind(auth.user_id.clone())
            .bind(auth.email.clone())
            .bind(auth.tenant_id.clone())
            .bind(now.clone())
            .bind(now),
    )
    .await
    .map_err(AppError::from)?;
    tracing::info!(user = %auth.user_id, "account registered");

    Ok(Json(Me {
        user_id: auth.user_id.clone(),
        email: auth.email.clone(),
        tenant_id: auth.tenant_id.clone(),
        permissions: auth.permissions.clone(),
        greeting: app.translate(&ctx, "accounts.welcome", &[("user", &auth.user_id)]),
        registered: true,
    }))
}

/// Accounts live in the default database, whatever tenant the request is for.
fn shared_connection(app: &AppState, ctx: &RequestContext) -> Option<Connection> {
    ctx.db
        .default
        .clone()
        .or_else(|| app.entity_manager().default())
}

async fn is_registered(conn: &Connection, user_id: &str) -> anyhow::Result<bool> {
    let sql = format!(
        "SELECT COUNT(*) AS n FROM accounts WHERE user_id = {}",
        placeholders(conn, 1)
    );
    let row = conn
        .fetch_optional_query(sqlx::query(&sql).bind(user_id.to_string()))
        .await
        .map_err(AppError::from)?;
    let count = match row {
        Some(row) => row.try_get::<i64, _>("n")?,
        None => 0,
    };
    Ok(count > 0)
}
