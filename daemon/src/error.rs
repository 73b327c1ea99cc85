//! Request failures and their HTTP mapping

use crate::response::{json_response, text_response};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;
use wsgate_protocol::{AuthMethodResults, AuthOutcome, Problem};

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Malformed open command: {0}")]
    BadOpenCommand(String),

    #[error("No session")]
    NoSession,

    #[error("CSRF token mismatch")]
    CsrfMismatch,

    #[error("Not found")]
    NotFound,

    #[error("Authentication failed: {problem}")]
    Auth {
        problem: Problem,
        message: Option<String>,
        auth_method_results: Option<AuthMethodResults>,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GateError {
    /// Failure of a negotiation whose outcome was not a success
    pub fn from_failure(outcome: AuthOutcome) -> Self {
        match outcome {
            AuthOutcome::Failure {
                problem,
                auth_method_results,
                message,
            } => GateError::Auth {
                problem,
                message,
                auth_method_results,
            },
            AuthOutcome::Success { user, .. } => {
                GateError::Internal(anyhow::anyhow!("Login for {} succeeded without a session", user))
            }
        }
    }

    pub fn problem(problem: Problem) -> Self {
        GateError::Auth {
            problem,
            message: None,
            auth_method_results: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GateError::BadOpenCommand(_) => StatusCode::BAD_REQUEST,
            GateError::NoSession => StatusCode::UNAUTHORIZED,
            // A wrong token looks exactly like a path that does not exist
            GateError::CsrfMismatch | GateError::NotFound => StatusCode::NOT_FOUND,
            GateError::Auth { problem, .. } => problem_status(problem),
            GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = self.status();
        match self {
            GateError::Auth {
                problem,
                message,
                auth_method_results,
            } => {
                let mut body = Map::new();
                body.insert("problem".to_string(), Value::String(problem.to_string()));
                if let Some(message) = message {
                    body.insert("message".to_string(), Value::String(message));
                }
                if let Some(results) = auth_method_results {
                    let results = results
                        .into_iter()
                        .map(|(method, result)| (method, Value::String(result)))
                        .collect();
                    body.insert("auth-method-results".to_string(), Value::Object(results));
                }
                json_response(status, &Value::Object(body))
            }
            GateError::Internal(e) => {
                error!("Request error: {:#}", e);
                text_response(status, "Internal Server Error")
            }
            GateError::NoSession => text_response(status, "Authentication required"),
            GateError::BadOpenCommand(_) => text_response(status, "Bad Request"),
            GateError::CsrfMismatch | GateError::NotFound => text_response(status, "Not Found"),
        }
    }
}

/// HTTP status of a problem code
pub fn problem_status(problem: &Problem) -> StatusCode {
    match problem {
        Problem::AuthenticationFailed
        | Problem::AuthenticationNotSupported
        | Problem::NoSession => StatusCode::UNAUTHORIZED,
        Problem::AccessDenied => StatusCode::FORBIDDEN,
        Problem::Timeout => StatusCode::GATEWAY_TIMEOUT,
        Problem::NotFound => StatusCode::NOT_FOUND,
        Problem::InternalError | Problem::ProtocolError | Problem::Other(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GateError::BadOpenCommand("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(GateError::NoSession.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GateError::CsrfMismatch.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            GateError::problem(Problem::AccessDenied).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GateError::problem(Problem::Timeout).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GateError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_stray_success_is_internal() {
        let error = GateError::from_failure(AuthOutcome::success("me"));
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_auth_failure_body() {
        let error = GateError::from_failure(AuthOutcome::password_denied());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["problem"], "authentication-failed");
        assert_eq!(body["auth-method-results"]["password"], "denied");
        assert!(body.get("message").is_none());
    }
}
