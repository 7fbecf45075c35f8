use bedrock_core::{tenant_provider_from_url, FileTenantProvider, HttpTenantProvider, TenantProvider};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn file_provider_reads_json_arrays() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("tenants.json");
    std::fs::write(
        &file,
        r#"[{"id":"acme","slug":"acme-corp","name":"Acme","databaseUrl":"sqlite://acme.db"},
            {"id":"demo","slug":"demo-org"}]"#,
    )
    .unwrap();

    let provider = FileTenantProvider::new(&file);
    let tenants = provider.tenants().await.unwrap();
    assert_eq!(tenants.len(), 2);
    assert_eq!(tenants[0].database_url.as_deref(), Some("sqlite://acme.db"));
    assert_eq!(tenants[1].name, "demo-org");

    let found = provider.find("acme-corp").await.unwrap().unwrap();
    assert_eq!(found.id, "acme");
    assert!(provider.find("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn file_provider_reads_yaml_documents() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("tenants.yaml");
    std::fs::write(
        &file,
        "tenants:\n  - id: acme\n    slug: acme-corp\n    database_url: sqlite://acme.db\n",
    )
    .unwrap();

    let url = format!("file://{}", file.display());
    let provider = tenant_provider_from_url(&url).unwrap();
    let tenants = provider.tenants().await.unwrap();
    assert_eq!(tenants[0].slug, "acme-corp");
}

#[tokio::test]
async fn missing_files_are_errors() {
    let provider = FileTenantProvider::new("/definitely/not/here.json");
    assert!(provider.tenants().await.is_err());
}

#[tokio::test]
async fn http_provider_fetches_tenant_lists() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tenants"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tenants": [{"id": "demo", "slug": "demo-org"}]
        })))
        .mount(&server)
        .await;

    let provider = HttpTenantProvider::new(format!("{}/tenants", server.uri()));
    let found = provider.find("demo-org").await.unwrap().unwrap();
    assert_eq!(found.id, "demo");
}

#[tokio::test]
async fn http_provider_surfaces_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let provider = HttpTenantProvider::new(format!("{}/tenants", server.uri()));
    assert!(provider.tenants().await.is_err());
}
