use grantor::{
    client_auth::{AuthStyleCache, ClientIdentity},
    endpoint::AuthStyle,
    grants::ClientCredentials,
    ClientId, ClientSecret, ErrorCode, HttpClient,
};
use serde_json::json;
use wiremock::{
    matchers::{body_string_contains, header, header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn credentials(server: &MockServer, cache: &AuthStyleCache) -> ClientCredentials {
    ClientCredentials::new(
        HttpClient::from(reqwest::Client::new()),
        ClientIdentity::new(ClientId::from("CLIENT_ID"))
            .with_secret(ClientSecret::from("CLIENT_SECRET")),
        format!("{}/token", server.uri()).parse().unwrap(),
    )
    .with_scopes(["scope1"])
    .with_auth_style_cache(cache.clone())
}

#[tokio::test]
async fn detection_falls_back_to_form_and_is_remembered() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header_exists("authorization"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "error": "invalid_client" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("client_secret=CLIENT_SECRET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "access_token=ok&token_type=bearer&expires_in=3600",
            "application/x-www-form-urlencoded",
        ))
        .expect(2)
        .mount(&server)
        .await;

    let cache = AuthStyleCache::new();
    let token_url = format!("{}/token", server.uri());

    let first = credentials(&server, &cache).token().await.unwrap();
    assert_eq!(first.access_token().as_str(), "ok");
    assert_eq!(cache.get(&token_url), Some(AuthStyle::InParams));

    let second = credentials(&server, &cache).token().await.unwrap();
    assert_eq!(second.access_token().as_str(), "ok");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    assert!(requests[2].headers.get("authorization").is_none());
}

#[tokio::test]
async fn separate_caches_detect_independently() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "basic",
            "expires_in": 60,
        })))
        .expect(2)
        .mount(&server)
        .await;

    for _ in 0..2 {
        let cache = AuthStyleCache::new();
        let token = credentials(&server, &cache).token().await.unwrap();
        assert_eq!(token.access_token().as_str(), "basic");
    }
}

#[tokio::test]
async fn non_client_errors_do_not_trigger_fallback() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_scope",
            "error_description": "scope1 is not allowed",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cache = AuthStyleCache::new();
    let err = credentials(&server, &cache).token().await.unwrap_err();

    assert_eq!(err.error_code(), Some(&ErrorCode::InvalidScope));
    assert_eq!(
        err.to_string(),
        r#"authority returned "invalid_scope" "scope1 is not allowed""#
    );
    assert_eq!(cache.get(&format!("{}/token", server.uri())), None);
}
