use bedrock_auth::{AuthError, AuthProvider, HttpAuthProvider, JwtOptions, TokenProvider};
use bedrock_core::Authentication;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn token_provider_is_an_auth_provider() {
    let tokens = TokenProvider::new(JwtOptions::default().with_secret("integration-secret-0001")).unwrap();
    let token = tokens
        .create_access_token(&Authentication::new("u-9").with_tenant("demo"))
        .unwrap();

    let provider: &dyn AuthProvider = &tokens;
    let auth = provider.authenticate(&token).await.unwrap();
    assert_eq!(auth.user_id, "u-9");
    assert_eq!(auth.tenant_id.as_deref(), Some("demo"));
    assert!(provider.authenticate("garbage").await.is_err());
}

#[tokio::test]
async fn userinfo_endpoints_map_to_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer opaque-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "auth0|42",
            "email": "ada@example.com",
            "aud": "notes-api",
            "permissions": ["notes:read", "notes:write"],
            "tenant_id": "acme"
        })))
        .mount(&server)
        .await;

    let provider = HttpAuthProvider::new(format!("{}/userinfo", server.uri()));
    let auth = provider.authenticate("opaque-token").await.unwrap();

    assert_eq!(auth.user_id, "auth0|42");
    assert_eq!(auth.audience, vec!["notes-api"]);
    assert_eq!(auth.email.as_deref(), Some("ada@example.com"));
    assert_eq!(auth.tenant_id.as_deref(), Some("acme"));
    assert!(auth.has_permission("notes:write"));
}

#[tokio::test]
async fn rejected_tokens_are_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let provider = HttpAuthProvider::new(format!("{}/userinfo", server.uri()));
    let err = provider.authenticate("expired").await.unwrap_err();
    assert!(matches!(err, AuthError::Rejected { status: 401 }));
    assert!(!err.is_technical());
}
