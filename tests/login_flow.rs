//! Login Flow Integration Tests
//!
//! Logs in against a spawned gateway process and uses the session.

mod integration_harness;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use integration_harness::{TestConfig, build_binaries, cleanup, spawn_gateway, wait_for_port};
use serde_json::Value;
use std::time::Duration;

/// Test: basic login, a one-shot channel, and logout
#[tokio::test]
#[ignore] // Run with: cargo test --test login_flow -- --ignored
async fn test_login_channel_logout() {
    let config = TestConfig {
        gateway_bind: "127.0.0.1:39091".parse().unwrap(),
        metrics_bind: "127.0.0.1:39191".parse().unwrap(),
    };
    build_binaries().expect("Failed to build binaries");

    let mut gateway = spawn_gateway(&config, "login").expect("Failed to spawn gateway");
    assert!(
        wait_for_port(config.gateway_bind, Duration::from_secs(30)).await,
        "Gateway did not start in time"
    );

    let base = format!("http://{}", config.gateway_bind);
    let client = reqwest::Client::new();

    let credentials = STANDARD.encode("me:this is the password");
    let response = client
        .post(format!("{}/cockpit/login", base))
        .header("Authorization", format!("Basic {}", credentials))
        .send()
        .await
        .expect("Login request failed");
    assert_eq!(response.status(), 200);

    let cookie = response
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .expect("No session cookie")
        .to_string();
    let body: Value = response.json().await.expect("Login body is not JSON");
    let token = body["csrf-token"].as_str().expect("No CSRF token").to_string();

    let open = STANDARD.encode(r#"{"command":"open","payload":"echo"}"#);
    let response = client
        .get(format!("{}/cockpit/channel/{}?{}", base, token, open))
        .header("Cookie", &cookie)
        .send()
        .await
        .expect("Channel request failed");
    assert_eq!(response.status(), 200);

    let response = client
        .get(format!("{}/cockpit/logout", base))
        .header("Cookie", &cookie)
        .send()
        .await
        .expect("Logout request failed");
    assert_eq!(response.status(), 200);

    // The session is gone, so its channels are too
    let response = client
        .get(format!("{}/cockpit/channel/{}?{}", base, token, open))
        .header("Cookie", &cookie)
        .send()
        .await
        .expect("Channel request failed");
    assert_eq!(response.status(), 404);

    let _ = gateway.kill();
    cleanup("login");
}
