//! Request classification
//!
//! Maps a method and path to the route that serves it, without looking at
//! sessions. Everything session-dependent happens in the handler.

use crate::session_registry::{MACHINE_COOKIE_PREFIX, PRIMARY_COOKIE};
use hyper::Method;

/// Application the request addresses: `cockpit` itself, or `cockpit+<host>`
/// for a session on another machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    host: Option<String>,
}

impl Application {
    pub fn primary() -> Self {
        Self { host: None }
    }

    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
        }
    }

    /// Parse the first path component
    pub fn parse(component: &str) -> Option<Self> {
        if component == PRIMARY_COOKIE {
            return Some(Self::primary());
        }
        let host = component.strip_prefix("cockpit+")?;
        let host = host.strip_prefix('=').unwrap_or(host);
        if host.is_empty() || host.contains('/') {
            return None;
        }
        Some(Self::for_host(host))
    }

    /// Target host, if the application names one
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Name of the cookie holding this application's session
    pub fn cookie_name(&self) -> String {
        match &self.host {
            None => PRIMARY_COOKIE.to_string(),
            Some(host) => format!("{}{}", MACHINE_COOKIE_PREFIX, host),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    Ping,
    Robots,
    /// Interactive socket for the application's session
    Socket { app: Application },
    /// External channel guarded by the session's CSRF token
    Channel { app: Application, token: &'a str },
    Login { app: Application },
    Logout { app: Application },
    /// Branding and login assets, not session gated
    Static { file: &'a str },
    /// `@<host>` or `$<checksum>` package resource
    Resource {
        app: Application,
        target: &'a str,
        path: &'a str,
    },
    /// Page of the shell; every valid package path serves it
    Shell { app: Application, path: &'a str },
    NotFound,
}

/// Characters of a valid package name
fn is_package_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Split `/first/rest` into `first` and `/rest` (empty if none)
fn split_first_component(path: &str) -> (&str, &str) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.find('/') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos..]),
        None => (trimmed, ""),
    }
}

pub fn classify<'a>(method: &Method, path: &'a str) -> Route<'a> {
    if path == "/ping" {
        return Route::Ping;
    }

    let (first, rest) = split_first_component(path);

    // `/socket` is accepted alongside `/<app>/socket`
    if rest == "/socket" || (rest.is_empty() && first == "socket") {
        if method != Method::GET {
            return Route::NotFound;
        }
        let app = if rest.is_empty() {
            Some(Application::primary())
        } else {
            Application::parse(first)
        };
        return match app {
            Some(app) => Route::Socket { app },
            None => Route::NotFound,
        };
    }

    if let Some(token) = rest.strip_prefix("/channel/") {
        if let Some(app) = Application::parse(first) {
            return Route::Channel { app, token };
        }
    }

    if path.ends_with("/robots.txt") {
        return Route::Robots;
    }

    if first == PRIMARY_COOKIE || first.starts_with("cockpit+") {
        let Some(app) = Application::parse(first) else {
            return Route::NotFound;
        };
        return classify_resource(app, rest);
    }

    classify_shell(path)
}

fn classify_resource(app: Application, remainder: &str) -> Route<'_> {
    if remainder.is_empty() || remainder == "/" {
        return Route::NotFound;
    }
    if let Some(file) = remainder.strip_prefix("/static/") {
        return Route::Static { file };
    }
    match remainder {
        "/login" => return Route::Login { app },
        "/logout" => return Route::Logout { app },
        _ => {}
    }

    let (target, path) = split_first_component(remainder);
    let valid_target = (target.starts_with('@') || target.starts_with('$')) && target.len() > 1;
    if !valid_target {
        return Route::NotFound;
    }

    Route::Resource { app, target, path }
}

fn classify_shell(path: &str) -> Route<'_> {
    if path.starts_with("/=/") || path.starts_with("/@/") || path.starts_with("//") {
        return Route::NotFound;
    }

    let (first, _) = split_first_component(path);
    let valid = path == "/"
        || path.starts_with("/@")
        || path.starts_with("/=")
        || first.chars().all(is_package_char);
    if !valid {
        return Route::NotFound;
    }

    // `/=<host>/...` is the shell of another machine
    let app = first
        .strip_prefix('=')
        .filter(|host| !host.is_empty())
        .map(Application::for_host)
        .unwrap_or_else(Application::primary);

    Route::Shell { app, path }
}
