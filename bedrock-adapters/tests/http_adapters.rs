use bedrock_adapters::{
    mailer_from_url, secrets_from_url, AdapterError, Email, Mailer, ResendMailer, SecretStore,
    VaultSecrets,
};
use bedrock_core::ConnectionUrl;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn vault_for(server: &MockServer) -> VaultSecrets {
    let url = format!("vault+{}?mount=kv", server.uri().replace("://", "://root@"));
    VaultSecrets::from_url(&ConnectionUrl::parse(&url).unwrap()).unwrap()
}

#[tokio::test]
async fn vault_reads_kv2_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/data/app/db"))
        .and(header("X-Vault-Token", "root"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"data": {"value": "main", "password": "s3cret"}, "metadata": {"version": 2}}
        })))
        .mount(&server)
        .await;

    let vault = vault_for(&server);
    assert_eq!(vault.get("app/db").await.unwrap(), "main");
    assert_eq!(vault.get("app/db#password").await.unwrap(), "s3cret");
    assert!(matches!(
        vault.get("app/db#user").await,
        Err(AdapterError::SecretNotFound { .. })
    ));
}

#[tokio::test]
async fn vault_missing_paths_are_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
        .mount(&server)
        .await;

    let vault = vault_for(&server);
    assert!(matches!(
        vault.get("nope").await,
        Err(AdapterError::SecretNotFound { .. })
    ));
}

#[tokio::test]
async fn vault_writes_merge_existing_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/data/app/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"data": {"value": "old"}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/kv/data/app/api"))
        .and(body_partial_json(json!({"data": {"value": "old", "token": "abc"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"version": 3}})))
        .expect(1)
        .mount(&server)
        .await;

    vault_for(&server).set("app/api#token", "abc").await.unwrap();
}

#[tokio::test]
async fn resend_posts_emails_with_the_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("authorization", "Bearer re_test"))
        .and(body_partial_json(json!({
            "from": "team@acme.io",
            "to": ["ada@example.com"],
            "subject": "Welcome"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
        .expect(1)
        .mount(&server)
        .await;

    let mailer = mailer_from_url(&format!(
        "resend://re_test?sender=team@acme.io&endpoint={}",
        server.uri()
    ))
    .unwrap();
    let id = mailer
        .send(Email::new("ada@example.com", "Welcome").html("<p>hi</p>"))
        .await
        .unwrap();
    assert_eq!(id, "msg_1");
}

#[tokio::test]
async fn resend_errors_carry_the_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid from"))
        .mount(&server)
        .await;

    let mailer = ResendMailer::new("re_test").with_endpoint(server.uri());
    let err = mailer
        .send(Email::new("ada@example.com", "x").sender("bad").text("y"))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Upstream { status: 422, .. }));
}

#[test]
fn secret_factories_dispatch_on_scheme() {
    assert!(secrets_from_url("memory").is_ok());
    assert!(secrets_from_url("vault+https://tok@vault.local:8200").is_ok());
    assert!(secrets_from_url("aws://secrets").is_err());
}
