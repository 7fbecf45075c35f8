use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bedrock_adapters::{handler, PubSub};
use bedrock_axum::App;
use bedrock_core::config::keys;
use bedrock_core::{Authentication, Config};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

struct Demo {
    _dir: tempfile::TempDir,
    app: App,
}

async fn demo() -> Demo {
    let dir = tempfile::tempdir().unwrap();
    let db = |name: &str| format!("sqlite://{}/{name}.db", dir.path().display());

    let tenants = json!([
        { "id": "acme", "slug": "acme-corp", "name": "Acme Corp", "databaseUrl": db("acme") },
        { "id": "demo", "slug": "demo-org", "name": "Demo Org", "database_url": db("demo") }
    ]);
    let tenants_file = dir.path().join("tenants.json");
    std::fs::write(&tenants_file, tenants.to_string()).unwrap();

    let mut config = Config::new();
    config.set(keys::APP_NAME, "notes-api");
    config.set(keys::DATABASE_URL, db("main"));
    config.set(keys::TENANTS_URL, format!("file://{}", tenants_file.display()));
    config.set(keys::JWT_SECRET, "notes-api-test-secret");
    config.set(keys::PUBSUB_URL, "fake://");

    let app = notes_api::build(config).await.unwrap();
    Demo { _dir: dir, app }
}

impl Demo {
    fn token(&self, auth: Authentication) -> String {
        self.app
            .state()
            .tokens()
            .unwrap()
            .create_access_token(&auth)
            .unwrap()
    }

    fn writer(&self) -> String {
        self.token(
            Authentication::new("ada")
                .with_email("ada@example.com")
                .with_permissions(["notes:write"]),
        )
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let res = self.app.router().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn create(&self, tenant: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri("/notes")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", self.writer()))
                .header("x-tenantid", tenant)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn list(&self, uri: &str, tenant: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .uri(uri)
                .header("x-tenantid", tenant)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

#[tokio::test]
async fn notes_stay_inside_their_tenant() {
    let d = demo().await;

    let (status, note) = d.create("acme", json!({ "title": "Quarterly plan", "pinned": true })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(note["title"], "Quarterly plan");
    assert_eq!(note["author"], "ada");
    assert_eq!(note["pinned"], true);

    let (status, _) = d.create("demo-org", json!({ "title": "Hello demo" })).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, acme) = d.list("/notes", "acme-corp").await;
    let titles: Vec<&str> = acme.as_array().unwrap().iter().map(|n| n["title"].as_str().unwrap()).collect();
    assert_eq!(titles, ["Quarterly plan"]);

    let (_, demo) = d.list("/notes", "demo").await;
    assert_eq!(demo.as_array().unwrap().len(), 1);
    assert_eq!(demo[0]["title"], "Hello demo");
}

#[tokio::test]
async fn writing_needs_the_write_permission() {
    let d = demo().await;
    let reader = d.token(Authentication::new("bob"));

    let (status, body) = d
        .send(
            Request::builder()
                .method("POST")
                .uri("/notes")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {reader}"))
                .header("x-tenantid", "acme")
                .body(Body::from(r#"{"title":"nope"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (status, _) = d
        .send(
            Request::builder()
                .method("POST")
                .uri("/notes")
                .header("content-type", "application/json")
                .header("x-tenantid", "acme")
                .body(Body::from(r#"{"title":"nope"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_notes_are_rejected_with_details() {
    let d = demo().await;
    let (status, body) = d.create("acme", json!({ "title": "" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(body["error"]["message"], "validation failed");
    assert!(body["error"]["details"]["title"].is_array());
}

#[tokio::test]
async fn missing_notes_are_404_in_the_callers_language() {
    let d = demo().await;
    let (status, body) = d
        .send(
            Request::builder()
                .uri("/notes/42")
                .header("x-tenantid", "acme")
                .header("accept-language", "de")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "Notiz nicht gefunden");
}

#[tokio::test]
async fn notes_can_be_fetched_searched_and_deleted() {
    let d = demo().await;
    let (_, first) = d.create("acme", json!({ "title": "Buy milk" })).await;
    d.create("acme", json!({ "title": "Call the bank" })).await;
    let id = first["id"].as_i64().unwrap();

    let (status, note) = d.list(&format!("/notes/{id}"), "acme").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(note["title"], "Buy milk");

    let (_, found) = d.list("/notes?q=BANK", "acme").await;
    assert_eq!(found.as_array().unwrap().len(), 1);
    assert_eq!(found[0]["title"], "Call the bank");

    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri(format!("/notes/{id}"))
            .header("authorization", format!("Bearer {}", d.writer()))
            .header("x-tenantid", "acme")
            .body(Body::empty())
            .unwrap()
    };
    let (status, _) = d.send(delete()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = d.send(delete()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn created_notes_are_published() {
    let d = demo().await;
    let pubsub = d.app.state().container().get::<dyn PubSub>().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    pubsub
        .subscribe(
            notes_api::notes::NOTE_CREATED_TOPIC,
            handler(move |msg| {
                let sink = Arc::clone(&sink);
                async move { sink.lock().unwrap().push(msg.json::<Value>().unwrap()) }
            }),
        )
        .await
        .unwrap();

    d.create("acme", json!({ "title": "Ship it" })).await;
    let (status, _) = d.create("acme", json!({ "title": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(pubsub.stats().sent, 1);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["tenant"], "acme");
    assert_eq!(seen[0]["note"]["title"], "Ship it");
}

#[tokio::test]
async fn accounts_are_registered_in_the_shared_database() {
    let d = demo().await;
    let token = d.token(
        Authentication::new("grace")
            .with_email("grace@example.com")
            .with_tenant("demo"),
    );
    let me = |method: &str| {
        Request::builder()
            .method(method)
            .uri("/me")
            .header("authorization", format!("Bearer {token}"))
            .header("accept-language", "de-DE")
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = d.send(me("GET")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], "grace");
    assert_eq!(body["tenantId"], "demo");
    assert_eq!(body["registered"], false);
    assert_eq!(body["greeting"], "Willkommen zurück, grace");

    let (status, _) = d.send(me("PUT")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = d.send(me("PUT")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = d.send(me("GET")).await;
    assert_eq!(body["registered"], true);
}

#[tokio::test]
async fn tools_see_the_request_tenant() {
    let d = demo().await;
    d.create("demo", json!({ "title": "Tool visible" })).await;

    let (status, body) = d
        .send(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .header("x-tenantid", "demo")
                .body(Body::from(
                    r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"notes_count"}}"#,
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["structuredContent"]["count"], 1);

    let (_, body) = d
        .send(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .header("x-tenantid", "acme")
                .body(Body::from(
                    r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"notes_search","arguments":{"text":"tool"}}}"#,
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(body["result"]["structuredContent"], json!([]));
}

#[tokio::test]
async fn migrations_are_recorded_per_database() {
    let d = demo().await;
    let ds = d.app.state().data_source().unwrap();

    let rows = ds
        .default_connection()
        .fetch_all("SELECT filename FROM database_changelog ORDER BY filename")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let acme = ds.connection("acme-corp").await.unwrap().unwrap();
    let rows = acme
        .fetch_all("SELECT filename FROM database_changelog ORDER BY filename")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}
