use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use bedrock_adapters::{PubSub, PubSubExt};
use bedrock_axum::{AfterCommit, ApiResult, AppState, Feature, FnTool, RequestContext, RouteOptions};
use bedrock_core::AppError;
use bedrock_db::{sqlx, AnyRow, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use crate::placeholders;

pub const NOTE_CREATED_TOPIC: &str = "notes.created";

pub fn feature(resources: PathBuf, accounts: &Arc<Feature>) -> Arc<Feature> {
    Feature::builder("notes")
        .resources(resources)
        .depends_on(accounts)
        .on_init(|ctx| {
            let events = NoteEvents {
                pubsub: ctx.get::<dyn PubSub>(),
            };
            ctx.services().provide(Arc::new(events));
            Ok(())
        })
        .on_routes(|routes| {
            let read = || RouteOptions::new().tenant_required();
            let write = || RouteOptions::new().tenant_required().permission("notes:write");

            routes
                .get_with("/notes", read().without_transaction().summary("List notes"), list)
                .post_with("/notes", write().summary("Create a note"), create)
                .get_with("/notes/{id}", read().without_transaction().summary("Fetch a note"), fetch)
                .delete_with("/notes/{id}", write().summary("Delete a note"), remove)
                .tool(
                    FnTool::new("notes_count", "Count the notes of the current tenant", |app, ctx, _| async move {
                        let conn = tenant_connection(&app, &ctx)?;
                        Ok::<_, anyhow::Error>(json!({ "count": count(&conn).await? }))
                    }),
                )
                .tool(
                    FnTool::new("notes_search", "Find notes whose title contains a text", |app, ctx, args| async move {
                        let text = args
                            .get("text")
                            .and_then(Value::as_str)
                            .ok_or_else(|| AppError::bad_request("text is required").into_anyhow())?;
                        let conn = tenant_connection(&app, &ctx)?;
                        let notes = search(&conn, text, 20).await?;
                        Ok::<_, anyhow::Error>(serde_json::to_value(notes)?)
                    })
                    .with_schema(json!({
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"]
                    })),
                );
            Ok(())
        })
        .build()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub pinned: bool,
    pub created_at: String,
}

impl Note {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            body: row.try_get("body")?,
            author: row.try_get("author")?,
            pinned: row.try_get::<i64, _>("pinned")? != 0,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewNote {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 10000))]
    pub body: String,
    #[serde(default)]
    pub pinned: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub q: Option<String>,
    pub limit: Option<i64>,
}

/// Publishes note events when a pubsub backend is configured.
pub struct NoteEvents {
    pubsub: Option<Arc<dyn PubSub>>,
}

impl NoteEvents {
    /// Delivered once the insert has committed, at most once.
    async fn created(&self, tenant: &str, note: &Note) {
        let Some(pubsub) = &self.pubsub else {
            return;
        };
        let payload = json!({ "tenant": tenant, "note": note });
        if let Err(e) = pubsub.publish_json(NOTE_CREATED_TOPIC, &payload).await {
            tracing::warn!(tenant, note = note.id, error = %e, "note event not published");
        }
    }
}

fn tenant_connection(app: &AppState, ctx: &RequestContext) -> anyhow::Result<Connection> {
    ctx.require_tenant()?;
    app.require_connection(ctx)
}

async fn list(
    State(app): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Note>>> {
    let conn = tenant_connection(&app, &ctx)?;
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let notes = match params.q.as_deref().filter(|q| !q.is_empty()) {
        Some(q) => search(&conn, q, limit).await?,
        None => {
            let sql = format!(
                "SELECT id, title, body, author, pinned, created_at FROM notes \
                 ORDER BY pinned DESC, id LIMIT {}",
                placeholders(&conn, 1)
            );
            let rows = conn
                .fetch_query(sqlx::query(&sql).bind(limit))
                .await
                .map_err(AppError::from)?;
            rows.iter().map(Note::from_row).collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(Json(notes))
}

async fn create(
    State(app): State<AppState>,
    ctx: RequestContext,
    Json(input): Json<NewNote>,
) -> ApiResult<(StatusCode, Extension<AfterCommit>, Json<Note>)> {
    input.validate().map_err(|e| {
        AppError::bad_request("validation failed").with_details(json!(e))
    })?;
    let tenant = ctx.require_tenant()?.id.clone();
    let conn = tenant_connection(&app, &ctx)?;

    let created_at = chrono::Utc::now().to_rfc3339();
    let sql = format!(
        "INSERT INTO notes (title, body, author, pinned, created_at) VALUES ({}) \
         RETURNING id, title, body, author, pinned, created_at",
        placeholders(&conn, 5)
    );
    let row = conn
        .fetch_optional_query(
            sqlx::query(&sql)
                .bind(input.title.trim().to_string())
                .bind(input.body)
                .bind(ctx.user_id().map(str::to_string))
                .bind(i64::from(input.pinned))
                .bind(created_at),
        )
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::internal("insert returned no row"))?;
    let note = Note::from_row(&row)?;
    tracing::info!(tenant = %tenant, note = note.id, "note created");

    let mut after_commit = AfterCommit::new();
    if let Some(events) = app.container().get::<NoteEvents>() {
        let note = note.clone();
        after_commit = after_commit.then(async move { events.created(&tenant, &note).await });
    }
    Ok((StatusCode::CREATED, Extension(after_commit), Json(note)))
}

async fn fetch(
    State(app): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> ApiResult<Json<Note>> {
    let conn = tenant_connection(&app, &ctx)?;
    let sql = format!(
        "SELECT id, title, body, author, pinned, created_at FROM notes WHERE id = {}",
        placeholders(&conn, 1)
    );
    let row = conn
        .fetch_optional_query(sqlx::query(&sql).bind(id))
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::not_found("note not found"))?;
    Ok(Json(Note::from_row(&row)?))
}

async fn remove(
    State(app): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let conn = tenant_connection(&app, &ctx)?;
    let sql = format!("DELETE FROM notes WHERE id = {}", placeholders(&conn, 1));
    let deleted = conn
        .execute_query(sqlx::query(&sql).bind(id))
        .await
        .map_err(AppError::from)?;
    if deleted == 0 {
        return Err(AppError::not_found("note not found").into());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn count(conn: &Connection) -> anyhow::Result<i64> {
    let rows = conn
        .fetch_all("SELECT COUNT(*) AS n FROM notes")
        .await
        .map_err(AppError::from)?;
    match rows.first() {
        Some(row) => Ok(row.try_get::<i64, _>("n")?),
        None => Ok(0),
    }
}

async fn search(conn: &Connection, text: &str, limit: i64) -> anyhow::Result<Vec<Note>> {
    let sql = format!(
        "SELECT id, title, body, author, pinned, created_at FROM notes \
         WHERE LOWER(title) LIKE {} ORDER BY pinned DESC, id LIMIT {}",
        conn.dialect().placeholder(1),
        conn.dialect().placeholder(2)
    );
    let pattern = format!("%{}%", text.to_lowercase());
    let rows = conn
        .fetch_query(sqlx::query(&sql).bind(pattern).bind(limit))
        .await
        .map_err(AppError::from)?;
    Ok(rows.iter().map(Note::from_row).collect::<Result<Vec<_>, _>>()?)
}
