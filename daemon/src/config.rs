//! Gateway configuration

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Login negotiation configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Login page and resource configuration
    #[serde(default)]
    pub web: WebConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl GatewayConfig {
    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: GatewayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load and merge configuration from file (incremental update)
    pub async fn load_merge(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let content = tokio::fs::read_to_string(path).await?;
        let other: GatewayConfig = toml::from_str(&content)?;
        self.merge(other);
        Ok(())
    }

    /// Merge another config into this one
    ///
    /// Rules:
    /// - Scalar values: overwrite if the new value differs from default
    /// - Option values: overwrite if Some
    /// - Schemes: merged by name, the new definition wins
    pub fn merge(&mut self, other: GatewayConfig) {
        // Server
        if other.server.bind != default_bind() {
            self.server.bind = other.server.bind;
        }
        if other.server.max_connections != default_max_connections() {
            self.server.max_connections = other.server.max_connections;
        }

        // Auth
        self.auth.schemes.extend(other.auth.schemes);
        if other.auth.default_host != default_host() {
            self.auth.default_host = other.auth.default_host;
        }
        if other.auth.login_timeout != default_login_timeout() {
            self.auth.login_timeout = other.auth.login_timeout;
        }
        if other.auth.conversation_timeout != default_conversation_timeout() {
            self.auth.conversation_timeout = other.auth.conversation_timeout;
        }

        // Session
        if other.session.secret.is_some() {
            self.session.secret = other.session.secret;
        }
        if other.session.bridge_program != default_bridge_program() {
            self.session.bridge_program = other.session.bridge_program;
        }

        // Web
        if other.web.login_html.is_some() {
            self.web.login_html = other.web.login_html;
        }
        if other.web.static_root.is_some() {
            self.web.static_root = other.web.static_root;
        }
        if other.web.shell_path != default_shell_path() {
            self.web.shell_path = other.web.shell_path;
        }
        if other.web.login_title.is_some() {
            self.web.login_title = other.web.login_title;
        }
        if other.web.login_to.is_some() {
            self.web.login_to = other.web.login_to;
        }
        if other.web.require_host {
            self.web.require_host = true;
        }
        if other.web.allow_multihost {
            self.web.allow_multihost = true;
        }
        if other.web.for_cockpit_client {
            self.web.for_cockpit_client = true;
        }
        if other.web.channel_timeout != default_channel_timeout() {
            self.web.channel_timeout = other.web.channel_timeout;
        }
        if other.web.hostname.is_some() {
            self.web.hostname = other.web.hostname;
        }

        // Monitoring
        if other.monitoring.prometheus_bind != default_prometheus_bind() {
            self.monitoring.prometheus_bind = other.monitoring.prometheus_bind;
        }
        if !other.monitoring.prometheus_enabled {
            self.monitoring.prometheus_enabled = false;
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_max_connections() -> usize {
    1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_connections: default_max_connections(),
        }
    }
}

/// Verifier program for one authorization scheme
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchemeConfig {
    /// Program to spawn; the target host is appended to `args`
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,
}

/// Login negotiation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Authorization type (lowercase) -> verifier
    #[serde(default)]
    pub schemes: BTreeMap<String, SchemeConfig>,

    /// Host a login targets when the application names none
    #[serde(default = "default_host")]
    pub default_host: String,

    /// Bound on each leg of a negotiation, in seconds
    #[serde(default = "default_login_timeout")]
    pub login_timeout: u64,

    /// How long a parked conversation waits for its answer, in seconds
    #[serde(default = "default_conversation_timeout")]
    pub conversation_timeout: u64,
}

impl AuthConfig {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout)
    }

    pub fn conversation_timeout(&self) -> Duration {
        Duration::from_secs(self.conversation_timeout)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_login_timeout() -> u64 {
    30
}

fn default_conversation_timeout() -> u64 {
    60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            schemes: BTreeMap::new(),
            default_host: default_host(),
            login_timeout: default_login_timeout(),
            conversation_timeout: default_conversation_timeout(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Cookie signing secret (hex, 32 bytes); generated at startup if unset
    #[serde(default)]
    pub secret: Option<String>,

    /// Agent program whose presence enables remote logins
    #[serde(default = "default_bridge_program")]
    pub bridge_program: String,
}

fn default_bridge_program() -> String {
    "wsgate-bridge".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: None,
            bridge_program: default_bridge_program(),
        }
    }
}

/// Login page and resource configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    /// Login page template; a built-in page is used if unset
    #[serde(default)]
    pub login_html: Option<PathBuf>,

    /// Directory served under `/<app>/static/`
    #[serde(default)]
    pub static_root: Option<PathBuf>,

    /// Resource fetched through the bridge for shell pages
    #[serde(default = "default_shell_path")]
    pub shell_path: String,

    #[serde(default)]
    pub login_title: Option<String>,

    /// Force remote logins on or off instead of probing `PATH`
    #[serde(default)]
    pub login_to: Option<bool>,

    #[serde(default)]
    pub require_host: bool,

    #[serde(default)]
    pub allow_multihost: bool,

    /// Serving the desktop client; implies `require_host`
    #[serde(default)]
    pub for_cockpit_client: bool,

    /// Bound on a single-shot channel, in seconds
    #[serde(default = "default_channel_timeout")]
    pub channel_timeout: u64,

    /// Host name shown on the login page; read from the system if unset
    #[serde(default)]
    pub hostname: Option<String>,
}

impl WebConfig {
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout)
    }
}

fn default_shell_path() -> String {
    "/shell/index.html".to_string()
}

fn default_channel_timeout() -> u64 {
    30
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            login_html: None,
            static_root: None,
            shell_path: default_shell_path(),
            login_title: None,
            login_to: None,
            require_host: false,
            allow_multihost: false,
            for_cockpit_client: false,
            channel_timeout: default_channel_timeout(),
            hostname: None,
        }
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Prometheus metrics bind address
    #[serde(default = "default_prometheus_bind")]
    pub prometheus_bind: SocketAddr,

    /// Enable Prometheus
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

fn default_prometheus_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9190))
}

fn default_true() -> bool {
    true
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_bind: default_prometheus_bind(),
            prometheus_enabled: default_true(),
        }
    }
}
