//! Authorize negotiation vocabulary

use crate::control::{AuthMethodResults, InitMessage, PROTOCOL_VERSION};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::fmt;

/// Exit status of a verifier process on every termination that is not a
/// handoff to the bridge: rejections, crashes of the negotiation, and the
/// pass-through session ending.
pub const AUTH_REJECTED_EXIT: i32 = 7;

/// Scheme tag of a conversation challenge
pub const CONVERSATION_SCHEME: &str = "X-Conversation";

/// Challenge announcing login data ahead of the verdict
pub const LOGIN_DATA_CHALLENGE: &str = "x-login-data";

/// Problem codes reported to clients
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Problem {
    AuthenticationFailed,
    AuthenticationNotSupported,
    AccessDenied,
    NoSession,
    InternalError,
    Timeout,
    NotFound,
    /// The peer broke the framing or channel rules
    ProtocolError,
    /// A code outside the fixed vocabulary, passed through verbatim
    Other(String),
}

impl Problem {
    pub fn as_str(&self) -> &str {
        match self {
            Problem::AuthenticationFailed => "authentication-failed",
            Problem::AuthenticationNotSupported => "authentication-not-supported",
            Problem::AccessDenied => "access-denied",
            Problem::NoSession => "no-session",
            Problem::InternalError => "internal-error",
            Problem::Timeout => "timeout",
            Problem::NotFound => "not-found",
            Problem::ProtocolError => "protocol-error",
            Problem::Other(code) => code,
        }
    }

    pub fn parse(code: &str) -> Self {
        match code {
            "authentication-failed" => Problem::AuthenticationFailed,
            "authentication-not-supported" => Problem::AuthenticationNotSupported,
            "access-denied" => Problem::AccessDenied,
            "no-session" => Problem::NoSession,
            "internal-error" => Problem::InternalError,
            "timeout" => Problem::Timeout,
            "not-found" => Problem::NotFound,
            "protocol-error" => Problem::ProtocolError,
            other => Problem::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a negotiation
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    Success {
        user: String,
        login_data: Option<Value>,
        /// The verifier hands its streams over to an escalated agent
        handoff: bool,
    },
    Failure {
        problem: Problem,
        auth_method_results: Option<AuthMethodResults>,
        message: Option<String>,
    },
}

impl AuthOutcome {
    pub fn success(user: impl Into<String>) -> Self {
        AuthOutcome::Success {
            user: user.into(),
            login_data: None,
            handoff: false,
        }
    }

    pub fn failure(problem: Problem) -> Self {
        AuthOutcome::Failure {
            problem,
            auth_method_results: None,
            message: None,
        }
    }

    /// Failure naming the password method as the one that was denied
    pub fn password_denied() -> Self {
        let mut results = AuthMethodResults::new();
        results.insert("password".to_string(), "denied".to_string());
        AuthOutcome::Failure {
            problem: Problem::AuthenticationFailed,
            auth_method_results: Some(results),
            message: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Success { .. })
    }

    /// Interpret a verdict-carrying `init` message.
    ///
    /// A `user` wins over everything else; an `init` with neither user nor
    /// problem is an internal error of the verifier.
    pub fn from_init(init: &InitMessage) -> Self {
        if let Some(user) = &init.user {
            return AuthOutcome::Success {
                user: user.clone(),
                login_data: init.login_data.clone(),
                handoff: false,
            };
        }

        match &init.problem {
            Some(problem) => AuthOutcome::Failure {
                problem: Problem::parse(problem),
                auth_method_results: init.auth_method_results.clone(),
                message: init.message.clone(),
            },
            None => AuthOutcome::failure(Problem::InternalError),
        }
    }

    /// The `init` message that reports this outcome
    pub fn to_init(&self) -> InitMessage {
        match self {
            AuthOutcome::Success {
                user, login_data, ..
            } => InitMessage {
                version: Some(PROTOCOL_VERSION),
                user: Some(user.clone()),
                login_data: login_data.clone(),
                ..Default::default()
            },
            AuthOutcome::Failure {
                problem,
                auth_method_results,
                message,
            } => InitMessage {
                version: Some(PROTOCOL_VERSION),
                problem: Some(problem.to_string()),
                auth_method_results: auth_method_results.clone(),
                message: message.clone(),
                ..Default::default()
            },
        }
    }
}

/// An authorize challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// `*` - asks the peer which kind of credential it holds
    Wildcard,
    /// `X-Conversation <id> <base64>` - one round of a conversation
    Conversation { id: String, data: String },
    /// `x-login-data` - login data announced before the verdict
    LoginData,
    Other(String),
}

impl Challenge {
    pub fn parse(s: &str) -> Self {
        if s == "*" {
            return Challenge::Wildcard;
        }

        let parsed = AuthorizeType::parse(s);
        if parsed.scheme.eq_ignore_ascii_case(CONVERSATION_SCHEME) {
            if let Some((id, data)) = parsed.data.split_once(' ') {
                return Challenge::Conversation {
                    id: id.to_string(),
                    data: data.trim_start().to_string(),
                };
            }
        }
        if parsed.scheme == LOGIN_DATA_CHALLENGE {
            return Challenge::LoginData;
        }

        Challenge::Other(s.to_string())
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Challenge::Wildcard => f.write_str("*"),
            Challenge::Conversation { id, data } => {
                write!(f, "{} {} {}", CONVERSATION_SCHEME, id, data)
            }
            Challenge::LoginData => f.write_str(LOGIN_DATA_CHALLENGE),
            Challenge::Other(s) => f.write_str(s),
        }
    }
}

/// `<type> <data>` split of an authorize response or Authorization header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeType<'a> {
    /// Lowercased scheme
    pub scheme: String,
    pub data: &'a str,
}

impl<'a> AuthorizeType<'a> {
    pub fn parse(s: &'a str) -> Self {
        let s = s.trim_start();
        match s.split_once(' ') {
            Some((scheme, data)) => Self {
                scheme: scheme.to_ascii_lowercase(),
                data: data.trim_start(),
            },
            None => Self {
                scheme: s.to_ascii_lowercase(),
                data: "",
            },
        }
    }

    /// Conversation id and payload of an `X-Conversation` response
    pub fn conversation(&self) -> Option<(&'a str, &'a str)> {
        if !self.scheme.eq_ignore_ascii_case(CONVERSATION_SCHEME) {
            return None;
        }
        let (id, data) = self.data.split_once(' ')?;
        Some((id, data.trim_start()))
    }
}

/// Decode `basic` credential data into a user/password pair
pub fn decode_basic(data: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(data.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Encode a user/password pair as `basic` credential data
pub fn encode_basic(user: &str, password: &str) -> String {
    STANDARD.encode(format!("{}:{}", user, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_vocabulary() {
        for code in [
            "authentication-failed",
            "authentication-not-supported",
            "access-denied",
            "no-session",
            "internal-error",
            "protocol-error",
        ] {
            assert_eq!(Problem::parse(code).as_str(), code);
        }
        assert_eq!(Problem::parse("unknown"), Problem::Other("unknown".into()));
    }

    #[test]
    fn test_parse_authorize_type() {
        let t = AuthorizeType::parse("Basic bWU6dGhpcyBpcyB0aGUgcGFzc3dvcmQ=");
        assert_eq!(t.scheme, "basic");
        assert_eq!(t.data, "bWU6dGhpcyBpcyB0aGUgcGFzc3dvcmQ=");

        let t = AuthorizeType::parse("testscheme");
        assert_eq!(t.scheme, "testscheme");
        assert_eq!(t.data, "");
    }

    #[test]
    fn test_conversation_response() {
        let t = AuthorizeType::parse("X-Conversation conv dHdv");
        assert_eq!(t.data, "conv dHdv");
        assert_eq!(t.conversation(), Some(("conv", "dHdv")));

        assert_eq!(AuthorizeType::parse("Basic abc").conversation(), None);
        assert_eq!(AuthorizeType::parse("X-Conversation conv").conversation(), None);
    }

    #[test]
    fn test_challenge_parse() {
        assert_eq!(Challenge::parse("*"), Challenge::Wildcard);
        assert_eq!(
            Challenge::parse("X-Conversation conv dHlwZSB0d28="),
            Challenge::Conversation {
                id: "conv".into(),
                data: "dHlwZSB0d28=".into()
            }
        );
        assert_eq!(Challenge::parse("x-login-data"), Challenge::LoginData);
        assert_eq!(
            Challenge::parse("X-Conversation conv dHlwZSB0d28=").to_string(),
            "X-Conversation conv dHlwZSB0d28="
        );
    }

    #[test]
    fn test_basic_credentials() {
        assert_eq!(
            decode_basic("bWU6dGhpcyBpcyB0aGUgcGFzc3dvcmQ="),
            Some(("me".into(), "this is the password".into()))
        );
        assert_eq!(encode_basic("me", "this is the password"), "bWU6dGhpcyBpcyB0aGUgcGFzc3dvcmQ=");
        assert_eq!(decode_basic("not base64!"), None);
        // "no colon" in base64
        assert_eq!(decode_basic("bm8gY29sb24="), None);
    }

    #[test]
    fn test_outcome_from_init() {
        let outcome = AuthOutcome::from_init(&InitMessage::success("me"));
        assert_eq!(outcome, AuthOutcome::success("me"));

        let outcome = AuthOutcome::from_init(&InitMessage::problem("access-denied"));
        assert_eq!(outcome, AuthOutcome::failure(Problem::AccessDenied));

        let outcome = AuthOutcome::from_init(&InitMessage::default());
        assert_eq!(outcome, AuthOutcome::failure(Problem::InternalError));
    }

    #[test]
    fn test_outcome_to_init() {
        let init = AuthOutcome::password_denied().to_init();
        assert_eq!(init.problem.as_deref(), Some("authentication-failed"));
        assert_eq!(init.version, Some(1));
        assert_eq!(
            init.auth_method_results.unwrap().get("password").map(String::as_str),
            Some("denied")
        );
    }
}
