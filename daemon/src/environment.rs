//! Login page and the environment injected into it

use crate::config::WebConfig;
use anyhow::{Context, Result};
use bytes::Bytes;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Where the environment script goes in the login page
pub const DYNAMIC_CONTENT_MARKER: &str = "<meta insert=\"dynamic_content_here\" />";

/// Policy of the login page, which carries inline script and style
pub const LOGIN_CONTENT_SECURITY_POLICY: &str = "default-src 'self' 'unsafe-inline'";

const BUILTIN_LOGIN_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Log in</title>
    <meta insert="dynamic_content_here" />
</head>
<body>
    <form id="login" method="post" action="login">
        <input id="login-user-input" name="user" autocomplete="username">
        <input id="login-password-input" name="password" type="password" autocomplete="current-password">
        <button id="login-button" type="submit">Log in</button>
    </form>
</body>
</html>
"#;

/// Login page settings, resolved once at startup
#[derive(Debug, Clone)]
pub struct ResolvedWeb {
    login_html: Bytes,
    title: Option<String>,
    /// Remote logins available
    connect: bool,
    require_host: bool,
    allow_multihost: bool,
    is_cockpit_client: bool,
    hostname: String,
    pub static_root: Option<PathBuf>,
    pub shell_path: String,
    pub channel_timeout: Duration,
}

impl ResolvedWeb {
    pub fn resolve(web: &WebConfig, bridge_program: &str) -> Result<Self> {
        let login_html = match &web.login_html {
            Some(path) => {
                let html = std::fs::read(path)
                    .with_context(|| format!("Failed to read login page {}", path.display()))?;
                Bytes::from(html)
            }
            None => Bytes::from_static(BUILTIN_LOGIN_HTML.as_bytes()),
        };

        let connect = match web.login_to {
            Some(connect) => connect,
            None => {
                let available = have_command("ssh") && have_command(bridge_program);
                if !available {
                    info!("{} or ssh are not available, disabling remote logins", bridge_program);
                }
                available
            }
        };

        let hostname = web.hostname.clone().unwrap_or_else(system_hostname);

        Ok(Self {
            login_html,
            title: web.login_title.clone(),
            connect,
            require_host: web.for_cockpit_client || web.require_host,
            allow_multihost: web.allow_multihost,
            is_cockpit_client: web.for_cockpit_client,
            hostname,
            static_root: web.static_root.clone(),
            shell_path: web.shell_path.clone(),
            channel_timeout: web.channel_timeout(),
        })
    }

    pub fn connect(&self) -> bool {
        self.connect
    }

    /// Environment object for a client holding sessions on `logged_into`
    pub fn environment(&self, logged_into: Vec<String>) -> Value {
        let mut page = Map::new();
        if let Some(title) = &self.title {
            page.insert("title".to_string(), Value::String(title.clone()));
        }
        page.insert("connect".to_string(), Value::Bool(self.connect));
        page.insert("require_host".to_string(), Value::Bool(self.require_host));
        page.insert("allow_multihost".to_string(), Value::Bool(self.allow_multihost));

        json!({
            "is_cockpit_client": self.is_cockpit_client,
            "page": page,
            "logged_into": logged_into,
            "hostname": self.hostname,
        })
    }

    /// Login page with the environment script injected after the marker
    pub fn render_login(&self, logged_into: Vec<String>) -> Bytes {
        let script = format!(
            "\n    <script>\nvar environment = {};\n    </script>",
            self.environment(logged_into)
        );

        let html = String::from_utf8_lossy(&self.login_html);
        match html.find(DYNAMIC_CONTENT_MARKER) {
            Some(pos) => {
                let at = pos + DYNAMIC_CONTENT_MARKER.len();
                let mut rendered = String::with_capacity(html.len() + script.len());
                rendered.push_str(&html[..at]);
                rendered.push_str(&script);
                rendered.push_str(&html[at..]);
                Bytes::from(rendered)
            }
            None => {
                debug!("Login page has no dynamic content marker");
                self.login_html.clone()
            }
        }
    }
}

/// Whether `name` is an executable on `PATH`
fn have_command(name: &str) -> bool {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }

    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

fn system_hostname() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
