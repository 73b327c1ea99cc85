//! Registry of authenticated sessions, keyed by cookie

use crate::bridge::Bridge;
use crate::metrics::METRICS;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};
use wsgate_crypto::{CookieSigner, constant_time_eq, generate_csrf_token};

/// Cookie of the primary session
pub const PRIMARY_COOKIE: &str = "cockpit";

/// Prefix of the cookies of sessions on secondary hosts
pub const MACHINE_COOKIE_PREFIX: &str = "machine-cockpit+";

/// An authenticated session
pub struct Session {
    /// Full signed cookie value
    pub cookie: String,
    pub user: String,
    /// Host the session was authenticated for
    pub host_scope: String,
    pub created_at: SystemTime,
    pub login_data: Option<Value>,
    pub bridge: Bridge,
    csrf_token: String,
}

impl Session {
    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    /// Exact, constant-time comparison against the session's token
    pub fn check_csrf(&self, candidate: &str) -> bool {
        !candidate.is_empty() && constant_time_eq(candidate.as_bytes(), self.csrf_token.as_bytes())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("host_scope", &self.host_scope)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// What a successful login contributes to a new session
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub user: String,
    pub host_scope: String,
    pub login_data: Option<Value>,
}

/// Registry of live sessions
pub struct SessionRegistry {
    signer: CookieSigner,
    /// Cookie id -> session
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new(signer: CookieSigner) -> Arc<Self> {
        Arc::new(Self {
            signer,
            sessions: DashMap::new(),
        })
    }

    /// Create and register a session around `bridge`.
    ///
    /// The session is fully built before it becomes visible to lookups.
    pub fn create(&self, new: NewSession, bridge: Bridge) -> Arc<Session> {
        let login_data = match new.login_data {
            Some(data) if !data.is_object() => {
                warn!("Dropping non-object login data for {}", new.user);
                None
            }
            other => other,
        };

        loop {
            let cookie = self.signer.issue();
            match self.sessions.entry(cookie.id) {
                Entry::Occupied(_) => warn!("Cookie id collision, reissuing"),
                Entry::Vacant(slot) => {
                    let session = Arc::new(Session {
                        cookie: cookie.value,
                        user: new.user,
                        host_scope: new.host_scope,
                        created_at: SystemTime::now(),
                        login_data,
                        bridge,
                        csrf_token: generate_csrf_token(),
                    });

                    slot.insert(session.clone());
                    METRICS.active_sessions.inc();
                    debug!("Created session for {}@{}", session.user, session.host_scope);
                    return session;
                }
            }
        }
    }

    /// Find the session for a cookie value; forged values never match
    pub fn lookup(&self, cookie: &str) -> Option<Arc<Session>> {
        let id = self.signer.verify(cookie).ok()?;
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Remove the session for a cookie value
    pub fn remove(&self, cookie: &str) -> Option<Arc<Session>> {
        let id = self.signer.verify(cookie).ok()?;
        let (_, session) = self.sessions.remove(id)?;
        METRICS.active_sessions.dec();
        debug!("Removed session for {}", session.user);
        Some(session)
    }

    /// Whether a cookie value was issued by this gateway
    pub fn is_valid_cookie(&self, cookie: &str) -> bool {
        self.signer.is_valid(cookie)
    }

    /// Hosts the client holds authentic session cookies for, in header
    /// order: `.` for the primary session, the host name otherwise
    pub fn list_active_scopes(&self, cookie_header: &str) -> Vec<String> {
        parse_cookie_header(cookie_header)
            .into_iter()
            .filter(|(_, value)| self.is_valid_cookie(value))
            .filter_map(|(name, _)| {
                if name == PRIMARY_COOKIE {
                    Some(".".to_string())
                } else {
                    name.strip_prefix(MACHINE_COOKIE_PREFIX).map(str::to_string)
                }
            })
            .collect()
    }

    /// Number of live sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

/// Split a `Cookie` header into name/value pairs.
///
/// Pairs are `;`-separated and trimmed; a pair without `=` is skipped and
/// values are percent-decoded.
pub fn parse_cookie_header(header: &str) -> Vec<(&str, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = percent_decode_str(value.trim()).decode_utf8().ok()?;
            Some((name, value.into_owned()))
        })
        .collect()
}

/// Value of the named cookie, if present
pub fn find_cookie(header: &str, name: &str) -> Option<String> {
    parse_cookie_header(header)
        .into_iter()
        .find(|(n, _)| *n == name)
        .map(|(_, value)| value)
}

/// Credentials reported to the client after login
pub fn credentials_json(session: &Session) -> Value {
    let mut object = Map::new();
    object.insert("user".to_string(), Value::String(session.user.clone()));
    object.insert(
        "csrf-token".to_string(),
        Value::String(session.csrf_token.clone()),
    );
    if let Some(login_data) = &session.login_data {
        object.insert("login-data".to_string(), login_data.clone());
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wsgate_crypto::HmacAuthenticator;
    use wsgate_transport::{FrameReader, FrameWriter};

    fn registry(seed: u8) -> Arc<SessionRegistry> {
        SessionRegistry::new(CookieSigner::new(HmacAuthenticator::new([seed; 32])))
    }

    fn idle_bridge() -> Bridge {
        let (ours, _theirs) = tokio::io::duplex(64);
        let (read, write) = tokio::io::split(ours);
        Bridge::start(FrameReader::new(read), FrameWriter::new(write), None)
    }

    fn new_session(user: &str) -> NewSession {
        NewSession {
            user: user.to_string(),
            host_scope: "127.0.0.1".to_string(),
            login_data: None,
        }
    }

    #[tokio::test]
    async fn test_create_lookup_remove() {
        let registry = registry(1);
        let session = registry.create(new_session("me"), idle_bridge());

        let found = registry.lookup(&session.cookie).unwrap();
        assert!(Arc::ptr_eq(&found, &session));
        assert_eq!(registry.count(), 1);

        assert!(registry.remove(&session.cookie).is_some());
        assert!(registry.lookup(&session.cookie).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_lookup_rejects_forgeries() {
        let registry = registry(1);
        let session = registry.create(new_session("me"), idle_bridge());

        // Same id signed under another key
        let other = registry_value_for(&session.cookie, 2);
        assert!(registry.lookup(&other).is_none());

        let truncated = &session.cookie[..session.cookie.len() - 2];
        assert!(registry.lookup(truncated).is_none());
        assert!(registry.lookup("").is_none());
        assert!(registry.lookup("cockpit").is_none());
    }

    fn registry_value_for(value: &str, seed: u8) -> String {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let (id, _) = value.split_once('.').unwrap();
        let tag = HmacAuthenticator::new([seed; 32]).compute(id.as_bytes());
        format!("{}.{}", id, URL_SAFE_NO_PAD.encode(tag))
    }

    #[tokio::test]
    async fn test_unregistered_but_authentic_cookie() {
        let signer = CookieSigner::new(HmacAuthenticator::new([1; 32]));
        let registry = SessionRegistry::new(signer.clone());

        let cookie = signer.issue();
        assert!(registry.is_valid_cookie(&cookie.value));
        assert!(registry.lookup(&cookie.value).is_none());
    }

    #[tokio::test]
    async fn test_csrf_tokens() {
        let registry = registry(1);
        let a = registry.create(new_session("me"), idle_bridge());
        let b = registry.create(new_session("me"), idle_bridge());

        assert_eq!(a.csrf_token().len(), 64);
        assert_ne!(a.csrf_token(), b.csrf_token());
        assert_ne!(a.cookie, b.cookie);

        assert!(a.check_csrf(a.csrf_token()));
        assert!(!a.check_csrf(b.csrf_token()));
        assert!(!a.check_csrf(""));
        assert!(!a.check_csrf(&a.csrf_token()[..63]));
    }

    #[tokio::test]
    async fn test_login_data_must_be_object() {
        let registry = registry(1);

        let mut new = new_session("me");
        new.login_data = Some(json!("bad"));
        let session = registry.create(new, idle_bridge());
        assert!(session.login_data.is_none());
        assert!(credentials_json(&session).get("login-data").is_none());

        let mut new = new_session("me");
        new.login_data = Some(json!({ "login": "data" }));
        let session = registry.create(new, idle_bridge());
        assert_eq!(
            credentials_json(&session)["login-data"],
            json!({ "login": "data" })
        );
    }

    #[tokio::test]
    async fn test_active_scopes_in_header_order() {
        let registry = registry(1);
        let primary = registry.create(new_session("me"), idle_bridge());
        let machine = registry.create(new_session("me"), idle_bridge());

        let header = format!(
            "machine-cockpit+machine={}; junk; cockpit={}; machine-cockpit+other=forged.value; theme=dark",
            machine.cookie, primary.cookie
        );

        assert_eq!(
            registry.list_active_scopes(&header),
            vec!["machine".to_string(), ".".to_string()]
        );
        assert!(registry.list_active_scopes("").is_empty());
    }

    #[test]
    fn test_cookie_tokenizer() {
        let pairs = parse_cookie_header(" a=1 ;b=x%3Dy; noequals ; =empty; c=");
        assert_eq!(
            pairs,
            vec![
                ("a", "1".to_string()),
                ("b", "x=y".to_string()),
                ("c", String::new()),
            ]
        );
        assert_eq!(find_cookie("a=1; b=2", "b").as_deref(), Some("2"));
        assert_eq!(find_cookie("a=1", "b"), None);
    }
}
