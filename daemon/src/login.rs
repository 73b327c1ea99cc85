//! Gateway side of the login negotiation
//!
//! A login spawns the verifier configured for the request's authorization
//! type and answers its challenges. Conversation challenges are handed to
//! the client: the negotiation is parked under an id of the gateway's own
//! until the client answers with an `X-Conversation` authorization naming it.

use crate::config::{AuthConfig, SchemeConfig};
use crate::metrics::METRICS;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, error, info, warn};
use wsgate_protocol::{
    AuthOutcome, AuthorizeMessage, AuthorizeType, CONVERSATION_SCHEME, Challenge, ControlMessage,
    Problem, decode_control_frame,
};
use wsgate_crypto::generate_conversation_id;
use wsgate_transport::{BackendCommand, BackendProcess, FrameReader, FrameWriter};

/// Result of one leg of a login
pub enum LoginStep {
    /// The negotiation is over. A successful one hands over the verifier's
    /// streams, which become the session's bridge.
    Complete {
        outcome: AuthOutcome,
        process: Option<VerifierStreams>,
    },
    /// The verifier asked a question only the client can answer. `id` is
    /// the gateway's handle on the parked conversation.
    Challenge { id: String, data: String },
}

impl LoginStep {
    fn failed(problem: Problem) -> Self {
        LoginStep::Complete {
            outcome: AuthOutcome::failure(problem),
            process: None,
        }
    }
}

/// A verifier process after a successful negotiation
pub struct VerifierStreams {
    pub child: Child,
    pub reader: FrameReader<ChildStdout>,
    pub writer: FrameWriter<ChildStdin>,
}

/// A negotiation in progress
struct Negotiation {
    process: BackendProcess,
    authorization: String,
    /// The authorization went out in answer to a `*` challenge already
    wildcard_answered: bool,
    host: String,
    /// Correlation value from the verifier's last challenge
    cookie: Option<String>,
    login_data: Option<Value>,
}

impl Negotiation {
    /// Answer to a `*` challenge: the authorization the first time, an
    /// empty response for any later one
    fn wildcard_response(&mut self) -> String {
        if std::mem::replace(&mut self.wildcard_answered, true) {
            String::new()
        } else {
            self.authorization.clone()
        }
    }
}

struct Parked {
    parked_at: Instant,
    /// Conversation id as the verifier knows it
    conversation: String,
    negotiation: Mutex<Negotiation>,
}

/// Runs logins and keeps the conversations waiting on clients
pub struct LoginService {
    schemes: BTreeMap<String, SchemeConfig>,
    default_host: String,
    login_timeout: Duration,
    conversation_timeout: Duration,
    /// Gateway conversation id -> parked negotiation
    pending: DashMap<String, Parked>,
}

impl LoginService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            schemes: config.schemes.clone(),
            default_host: config.default_host.clone(),
            login_timeout: config.login_timeout(),
            conversation_timeout: config.conversation_timeout(),
            pending: DashMap::new(),
        }
    }

    pub fn default_host(&self) -> &str {
        &self.default_host
    }

    /// Run one leg of a login for `authorization` against `host`
    pub async fn login(&self, authorization: Option<&str>, host: Option<&str>) -> LoginStep {
        let Some(authorization) = authorization else {
            return LoginStep::failed(Problem::AuthenticationFailed);
        };

        let started = Instant::now();
        let parsed = AuthorizeType::parse(authorization);
        let step = if parsed.scheme.eq_ignore_ascii_case(CONVERSATION_SCHEME) {
            self.resume(authorization).await
        } else {
            let host = host.unwrap_or(&self.default_host);
            self.begin(&parsed.scheme, authorization, host).await
        };
        METRICS.login_duration.observe(started.elapsed().as_secs_f64());

        if let LoginStep::Complete { outcome, .. } = &step {
            if outcome.is_success() {
                METRICS.auth_successes.inc();
            } else {
                METRICS.auth_failures.inc();
            }
        }
        step
    }

    async fn begin(&self, scheme: &str, authorization: &str, host: &str) -> LoginStep {
        let Some(verifier) = self.schemes.get(scheme) else {
            debug!("No verifier configured for authorization type {:?}", scheme);
            return LoginStep::failed(Problem::AuthenticationNotSupported);
        };

        let mut command = BackendCommand::new(&verifier.command);
        for arg in &verifier.args {
            command = command.arg(arg);
        }
        let command = command.arg(host);

        let process = match BackendProcess::spawn(&command) {
            Ok(process) => process,
            Err(e) => {
                error!("Failed to start verifier: {}", e);
                return LoginStep::failed(Problem::InternalError);
            }
        };

        debug!("Started verifier {} for {}", verifier.command, host);
        let negotiation = Negotiation {
            process,
            authorization: authorization.to_string(),
            wildcard_answered: false,
            host: host.to_string(),
            cookie: None,
            login_data: None,
        };
        self.drive(negotiation).await
    }

    async fn resume(&self, authorization: &str) -> LoginStep {
        let Some((id, answer)) = AuthorizeType::parse(authorization).conversation() else {
            return LoginStep::failed(Problem::AuthenticationFailed);
        };

        let Some((_, parked)) = self.pending.remove(id) else {
            warn!("Answer for unknown conversation {:?}", id);
            return LoginStep::failed(Problem::AuthenticationFailed);
        };

        let Parked {
            parked_at,
            conversation,
            negotiation,
        } = parked;
        if parked_at.elapsed() > self.conversation_timeout {
            info!("Conversation {} expired", id);
            return LoginStep::failed(Problem::Timeout);
        }

        let mut negotiation = negotiation.into_inner().unwrap_or_else(PoisonError::into_inner);

        // The verifier sees the answer under its own conversation id
        let response = format!("{} {} {}", CONVERSATION_SCHEME, conversation, answer);
        let reply = AuthorizeMessage::response(negotiation.cookie.clone(), response.clone());
        if let Err(e) = negotiation.process.write_control(&reply.into()).await {
            warn!("Verifier went away during conversation: {}", e);
            return LoginStep::failed(Problem::InternalError);
        }
        negotiation.authorization = response;

        self.drive(negotiation).await
    }

    /// Exchange messages with the verifier until it reaches a verdict or
    /// hands us a question for the client
    async fn drive(&self, mut negotiation: Negotiation) -> LoginStep {
        let exchange = tokio::time::timeout(self.login_timeout, exchange(&mut negotiation)).await;

        match exchange {
            Err(_) => {
                warn!("Login for {} timed out", negotiation.host);
                negotiation.process.terminate().await;
                LoginStep::failed(Problem::Timeout)
            }
            Ok(Exchange::Verdict(outcome)) if outcome.is_success() => {
                let outcome = match outcome {
                    AuthOutcome::Success {
                        user,
                        login_data,
                        handoff,
                    } => AuthOutcome::Success {
                        user,
                        login_data: login_data.or(negotiation.login_data),
                        handoff,
                    },
                    failure => failure,
                };
                let (child, reader, writer) = negotiation.process.into_parts();
                LoginStep::Complete {
                    outcome,
                    process: Some(VerifierStreams {
                        child,
                        reader,
                        writer,
                    }),
                }
            }
            Ok(Exchange::Verdict(outcome)) => {
                // Dropping the process kills a verifier that lingers
                LoginStep::Complete {
                    outcome,
                    process: None,
                }
            }
            Ok(Exchange::Question { id, data }) => {
                METRICS.conversations_parked.inc();
                let handle = generate_conversation_id();
                debug!("Parking conversation {:?} as {}", id, handle);
                let parked = Parked {
                    parked_at: Instant::now(),
                    conversation: id,
                    negotiation: Mutex::new(negotiation),
                };
                self.pending.insert(handle.clone(), parked);
                LoginStep::Challenge { id: handle, data }
            }
        }
    }

    /// Drop conversations nobody answered in time
    pub fn sweep_expired(&self) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, parked| parked.parked_at.elapsed() <= self.conversation_timeout);
        let swept = before.saturating_sub(self.pending.len());
        if swept > 0 {
            debug!("Dropped {} expired conversations", swept);
        }
        swept
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

enum Exchange {
    Verdict(AuthOutcome),
    Question { id: String, data: String },
}

async fn exchange(negotiation: &mut Negotiation) -> Exchange {
    loop {
        let frame = match negotiation.process.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!("Verifier exited without a verdict");
                return Exchange::Verdict(AuthOutcome::failure(Problem::InternalError));
            }
            Err(e) => {
                warn!("Broken verifier stream: {}", e);
                return Exchange::Verdict(AuthOutcome::failure(Problem::InternalError));
            }
        };

        let message = match decode_control_frame(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Invalid message from verifier: {}", e);
                return Exchange::Verdict(AuthOutcome::failure(Problem::InternalError));
            }
        };

        match message {
            ControlMessage::Init(init) => return Exchange::Verdict(AuthOutcome::from_init(&init)),
            ControlMessage::Authorize(authorize) => {
                let Some(challenge) = authorize.challenge.as_deref().map(Challenge::parse) else {
                    debug!("Ignoring authorize message without a challenge");
                    continue;
                };
                negotiation.cookie = authorize.cookie.clone();

                match challenge {
                    Challenge::Wildcard => {
                        let reply =
                            AuthorizeMessage::response(authorize.cookie, negotiation.wildcard_response());
                        if let Err(e) = negotiation.process.write_control(&reply.into()).await {
                            warn!("Verifier went away: {}", e);
                            return Exchange::Verdict(AuthOutcome::failure(
                                Problem::InternalError,
                            ));
                        }
                    }
                    Challenge::LoginData => {
                        negotiation.login_data = authorize.login_data;
                    }
                    Challenge::Conversation { id, data } => {
                        return Exchange::Question { id, data };
                    }
                    Challenge::Other(other) => {
                        warn!("Verifier sent unsupported challenge {:?}", other);
                        return Exchange::Verdict(AuthOutcome::failure(
                            Problem::AuthenticationFailed,
                        ));
                    }
                }
            }
            other => debug!("Ignoring \"{}\" during login", other.command()),
        }
    }
}
