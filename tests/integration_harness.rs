//! Integration Test Harness
#![allow(dead_code)]
//!
//! Provides shared utilities for building and spawning the gateway and
//! managing test fixtures.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::sleep;

/// Test configuration
pub struct TestConfig {
    pub gateway_bind: SocketAddr,
    pub metrics_bind: SocketAddr,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            gateway_bind: "127.0.0.1:39090".parse().unwrap(),
            metrics_bind: "127.0.0.1:39190".parse().unwrap(),
        }
    }
}

/// Directory holding the workspace's debug binaries
fn target_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("target")
        .join("debug")
}

/// Build the gateway and verifier binaries
pub fn build_binaries() -> std::io::Result<()> {
    let status = Command::new("cargo")
        .args(["build", "-p", "wsgate-daemon", "--bins"])
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other("cargo build failed"))
    }
}

/// Spawn a gateway process whose logins run the reference verifier with
/// `cat` as the bridge
pub fn spawn_gateway(config: &TestConfig, name: &str) -> std::io::Result<Child> {
    let verifier = target_dir().join("wsgate-verify");
    let config_content = format!(
        r#"
[server]
bind = "{}"

[auth.schemes.basic]
command = "{}"
args = ["--bridge", "cat"]

[auth.schemes.testscheme]
command = "{}"
args = ["--bridge", "cat"]

[web]
login_to = false

[monitoring]
prometheus_bind = "{}"
"#,
        config.gateway_bind,
        verifier.display(),
        verifier.display(),
        config.metrics_bind
    );

    // Write temp config
    let config_path = format!("tests/gateway_{}.toml", name);
    std::fs::write(&config_path, config_content)?;

    Command::new(target_dir().join("wsgated"))
        .args(["--config", &config_path])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
}

/// Wait for a TCP port to become available
pub async fn wait_for_port(addr: SocketAddr, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }
    false
}

/// Cleanup test artifacts
pub fn cleanup(name: &str) {
    let _ = std::fs::remove_file(format!("tests/gateway_{}.toml", name));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = TestConfig::default();
        assert_eq!(config.gateway_bind.port(), 39090);
        assert_ne!(config.gateway_bind, config.metrics_bind);
    }
}
