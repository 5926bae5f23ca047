use nimbus::config::NimbusConfig;
use tokio::time::{sleep, Duration};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral")
        .local_addr()
        .expect("local addr")
        .port()
}

fn loopback_config(port: u16) -> NimbusConfig {
    let mut config = NimbusConfig::default();
    config.gateway.bind = "127.0.0.1".to_string();
    config.gateway.port = port;
    config
}

async fn wait_for_health(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/health");

    for _ in 0..80 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }

    panic!("gateway did not become healthy at {url}");
}

async fn spawn_gateway() -> (u16, tokio::task::JoinHandle<()>) {
    let port = free_port();
    let config = loopback_config(port);
    let handle = tokio::spawn(async move {
        let _ = nimbus::gateway::run(config).await;
    });
    wait_for_health(port).await;
    (port, handle)
}

async fn signup_and_login(client: &reqwest::Client, port: u16, user: &str, pw: &str) -> String {
    let resp = client
        .post(format!("http://127.0.0.1:{port}/signup"))
        .json(&serde_json::json!({ "username": user, "password": pw }))
        .send()
        .await
        .expect("signup response");
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    let resp = client
        .post(format!("http://127.0.0.1:{port}/token"))
        .form(&[("username", user), ("password", pw)])
        .send()
        .await
        .expect("token response");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let body: serde_json::Value = resp.json().await.expect("token body");
    assert_eq!(body["token_type"], "bearer");
    body["access_token"].as_str().expect("token").to_string()
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let (port, gateway) = spawn_gateway().await;

    let response = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("health response");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.expect("body"), "ok");

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn signup_login_and_duplicate_rejection() {
    let (port, gateway) = spawn_gateway().await;
    let client = reqwest::Client::new();

    let token = signup_and_login(&client, port, "alice", "hunter2").await;
    assert_eq!(token, "alice");

    let resp = client
        .post(format!("http://127.0.0.1:{port}/signup"))
        .json(&serde_json::json!({ "username": "alice", "password": "other" }))
        .send()
        .await
        .expect("signup response");
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let (port, gateway) = spawn_gateway().await;
    let client = reqwest::Client::new();

    signup_and_login(&client, port, "bob", "right").await;

    let resp = client
        .post(format!("http://127.0.0.1:{port}/token"))
        .form(&[("username", "bob"), ("password", "wrong")])
        .send()
        .await
        .expect("token response");
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn protected_routes_require_valid_token() {
    let (port, gateway) = spawn_gateway().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://127.0.0.1:{port}/chat-history"))
        .send()
        .await
        .expect("history response");
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    let resp = client
        .post(format!("http://127.0.0.1:{port}/api/chat"))
        .header("Authorization", "Bearer nobody")
        .json(&serde_json::json!({ "query": "weather?" }))
        .send()
        .await
        .expect("chat response");
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn empty_chat_query_is_rejected() {
    let (port, gateway) = spawn_gateway().await;
    let client = reqwest::Client::new();

    let token = signup_and_login(&client, port, "carol", "pw123").await;

    let resp = client
        .post(format!("http://127.0.0.1:{port}/api/chat"))
        .header("Authorization", format!("Bearer {token}"))
        .json(&serde_json::json!({ "query": "   " }))
        .send()
        .await
        .expect("chat response");
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body = resp.text().await.expect("body");
    assert!(body.contains("invalid input"));

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn users_can_only_delete_themselves() {
    let (port, gateway) = spawn_gateway().await;
    let client = reqwest::Client::new();

    let alice = signup_and_login(&client, port, "alice", "pw1").await;
    signup_and_login(&client, port, "eve", "pw2").await;

    let resp = client
        .delete(format!("http://127.0.0.1:{port}/users/eve"))
        .header("Authorization", format!("Bearer {alice}"))
        .send()
        .await
        .expect("delete response");
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

    let resp = client
        .delete(format!("http://127.0.0.1:{port}/users/alice"))
        .header("Authorization", format!("Bearer {alice}"))
        .send()
        .await
        .expect("delete response");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    // Token no longer resolves once the account is gone
    let resp = client
        .get(format!("http://127.0.0.1:{port}/chat-history"))
        .header("Authorization", format!("Bearer {alice}"))
        .send()
        .await
        .expect("history response");
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn prompt_listing_shows_known_template_ids() {
    let (port, gateway) = spawn_gateway().await;
    let client = reqwest::Client::new();

    let token = signup_and_login(&client, port, "admin", "pw").await;

    let resp = client
        .get(format!("http://127.0.0.1:{port}/prompts"))
        .header("Authorization", format!("Bearer {token}"))
        .send()
        .await
        .expect("prompts response");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let body: serde_json::Value = resp.json().await.expect("prompts body");
    // No registry configured: the entry exists but holds no template
    assert_eq!(body["weather_agent"]["type"], "none");

    // Bulk refresh reports the failed pull per ID rather than erroring
    let resp = client
        .post(format!("http://127.0.0.1:{port}/prompts/refresh"))
        .header("Authorization", format!("Bearer {token}"))
        .send()
        .await
        .expect("refresh response");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.expect("refresh body");
    assert_eq!(body["weather_agent"], false);

    gateway.abort();
    let _ = gateway.await;
}
