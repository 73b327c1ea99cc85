//! Credential table and scenario keywords of the reference verifier

use serde_json::{Value, json};
use std::time::Duration;
use wsgate_protocol::{AuthOutcome, Problem};

/// Scope a login targets when no remote host is named
pub const DEFAULT_SCOPE: &str = "127.0.0.1";

/// Conversation id used by the multi-round scenarios
pub const CONVERSATION_ID: &str = "conv";

/// One round of a conversation: the payload we challenge with and the
/// payload we expect back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Round {
    pub challenge: &'static str,
    pub expect: &'static str,
}

const TWO_STEP: &[Round] = &[Round {
    challenge: "dHlwZSB0d28=",
    expect: "dHdv",
}];

const THREE_STEP: &[Round] = &[
    Round {
        challenge: "dHlwZSB0d28=",
        expect: "dHdv",
    },
    Round {
        challenge: "dHlwZSB0aHJlZQ==",
        expect: "dGhyZWU=",
    },
];

/// Fixed behaviors selected by the credential data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Success,
    Fail,
    FailSlow,
    NotSupported,
    SshFail,
    Denied,
    NoCookie,
    DataThenSuccess,
    SuccessBadData,
    NoUser,
    WithError,
    TooSlow,
    TwoStep,
    ThreeStep,
    SshRemoteSwitch,
    SshAltMachine,
    SshAltDefault,
}

impl Scenario {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let scenario = match keyword {
            "success" => Scenario::Success,
            "fail" => Scenario::Fail,
            "failslow" => Scenario::FailSlow,
            "not-supported" => Scenario::NotSupported,
            "ssh-fail" => Scenario::SshFail,
            "denied" => Scenario::Denied,
            "no-cookie" => Scenario::NoCookie,
            "data-then-success" => Scenario::DataThenSuccess,
            "success-bad-data" => Scenario::SuccessBadData,
            "no-user" => Scenario::NoUser,
            "with-error" => Scenario::WithError,
            "too-slow" => Scenario::TooSlow,
            "two-step" => Scenario::TwoStep,
            "three-step" => Scenario::ThreeStep,
            "ssh-remote-switch" => Scenario::SshRemoteSwitch,
            "ssh-alt-machine" => Scenario::SshAltMachine,
            "ssh-alt-default" => Scenario::SshAltDefault,
            _ => return None,
        };
        Some(scenario)
    }

    /// Host the scenario is bound to; other scopes treat it as unknown
    pub fn required_scope(self) -> Option<&'static str> {
        match self {
            Scenario::SshRemoteSwitch | Scenario::SshAltMachine => Some("machine"),
            Scenario::SshAltDefault => Some("default-host"),
            _ => None,
        }
    }

    pub fn applies_to(self, scope: &str) -> bool {
        self.required_scope().is_none_or(|required| required == scope)
    }

    /// Deliberate latency before the verdict
    pub fn delay(self) -> Option<Duration> {
        match self {
            Scenario::FailSlow => Some(Duration::from_secs(2)),
            Scenario::TooSlow => Some(Duration::from_secs(10)),
            _ => None,
        }
    }

    /// Conversation rounds, for multi-round scenarios
    pub fn rounds(self) -> Option<&'static [Round]> {
        match self {
            Scenario::TwoStep => Some(TWO_STEP),
            Scenario::ThreeStep => Some(THREE_STEP),
            _ => None,
        }
    }

    /// Verdict of a single-shot scenario
    pub fn verdict(self) -> AuthOutcome {
        match self {
            Scenario::Success
            | Scenario::DataThenSuccess
            | Scenario::SshRemoteSwitch
            | Scenario::SshAltMachine
            | Scenario::SshAltDefault
            | Scenario::NoCookie
            | Scenario::TwoStep
            | Scenario::ThreeStep => AuthOutcome::success("me"),
            Scenario::Fail | Scenario::FailSlow => {
                AuthOutcome::failure(Problem::AuthenticationFailed)
            }
            Scenario::NotSupported => AuthOutcome::Failure {
                problem: Problem::AuthenticationNotSupported,
                auth_method_results: Some(Default::default()),
                message: None,
            },
            Scenario::SshFail => AuthOutcome::password_denied(),
            Scenario::Denied => AuthOutcome::failure(Problem::AccessDenied),
            Scenario::SuccessBadData => AuthOutcome::Success {
                user: "me".into(),
                login_data: Some(Value::String("bad".into())),
                handoff: false,
            },
            // Carries neither user nor problem; reported by the engine itself
            Scenario::NoUser => AuthOutcome::failure(Problem::InternalError),
            Scenario::WithError => AuthOutcome::Failure {
                problem: Problem::Other("unknown".into()),
                auth_method_results: None,
                message: Some("detail for error".into()),
            },
            Scenario::TooSlow => AuthOutcome::Success {
                user: "me".into(),
                login_data: Some(json!({ "login": "data" })),
                handoff: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    User(&'static str),
    Handoff,
}

struct Credential {
    user: &'static str,
    password: &'static str,
    grant: Grant,
}

const DEFAULT_CREDENTIALS: &[Credential] = &[
    Credential {
        user: "me",
        password: "this is the password",
        grant: Grant::User("me"),
    },
    Credential {
        user: "bridge-user",
        password: "this is the password",
        grant: Grant::Handoff,
    },
];

const MACHINE_CREDENTIALS: &[Credential] = &[
    Credential {
        user: "remote-user",
        password: "this is the machine password",
        grant: Grant::User("remote-user"),
    },
    Credential {
        user: "bridge-user",
        password: "this is the password",
        grant: Grant::Handoff,
    },
];

/// Check a `user:password` pair against the credentials of a scope.
///
/// Known scopes report the password method as denied on failure; other
/// scopes fail without per-method detail.
pub fn check_basic(scope: &str, user: &str, password: &str) -> AuthOutcome {
    let (table, report_method) = match scope {
        DEFAULT_SCOPE => (DEFAULT_CREDENTIALS, true),
        "machine" => (MACHINE_CREDENTIALS, true),
        _ => (DEFAULT_CREDENTIALS, false),
    };

    let grant = table
        .iter()
        .find(|c| c.user == user && c.password == password)
        .map(|c| c.grant);

    match grant {
        Some(Grant::User(name)) => AuthOutcome::success(name),
        Some(Grant::Handoff) => AuthOutcome::Success {
            user: user.to_string(),
            login_data: None,
            handoff: true,
        },
        None if report_method => AuthOutcome::password_denied(),
        None => AuthOutcome::failure(Problem::AuthenticationFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        assert_eq!(Scenario::from_keyword("two-step"), Some(Scenario::TwoStep));
        assert_eq!(Scenario::from_keyword("Two-Step"), None);
        assert_eq!(Scenario::from_keyword(""), None);
    }

    #[test]
    fn test_scope_binding() {
        assert!(Scenario::SshAltMachine.applies_to("machine"));
        assert!(!Scenario::SshAltMachine.applies_to(DEFAULT_SCOPE));
        assert!(Scenario::SshAltDefault.applies_to("default-host"));
        assert!(!Scenario::SshAltDefault.applies_to("machine"));
        assert!(Scenario::Success.applies_to("anything"));
    }

    #[test]
    fn test_default_scope_credentials() {
        assert_eq!(
            check_basic(DEFAULT_SCOPE, "me", "this is the password"),
            AuthOutcome::success("me")
        );
        assert!(matches!(
            check_basic(DEFAULT_SCOPE, "bridge-user", "this is the password"),
            AuthOutcome::Success { handoff: true, .. }
        ));
        assert_eq!(
            check_basic(DEFAULT_SCOPE, "me", "wrong"),
            AuthOutcome::password_denied()
        );
    }

    #[test]
    fn test_machine_scope_credentials() {
        assert_eq!(
            check_basic("machine", "remote-user", "this is the machine password"),
            AuthOutcome::success("remote-user")
        );
        assert_eq!(
            check_basic("machine", "me", "this is the password"),
            AuthOutcome::password_denied()
        );
    }

    #[test]
    fn test_other_scope_credentials() {
        assert_eq!(
            check_basic("elsewhere", "me", "this is the password"),
            AuthOutcome::success("me")
        );
        assert_eq!(
            check_basic("elsewhere", "me", "wrong"),
            AuthOutcome::failure(Problem::AuthenticationFailed)
        );
    }
}
