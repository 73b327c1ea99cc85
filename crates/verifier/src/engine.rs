//! Verifier-side negotiation state machine
//!
//! The engine performs no I/O. It consumes decoded control messages and
//! hands back the actions its driver has to carry out, in order.

use crate::scenario::{CONVERSATION_ID, Round, Scenario, check_basic};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use wsgate_protocol::{
    AuthOutcome, AuthorizeMessage, AuthorizeType, Challenge, ControlMessage, InitMessage,
    LOGIN_DATA_CHALLENGE, PROTOCOL_VERSION, Problem, decode_basic,
};

/// Something the driver has to do next
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write a control message to the gateway
    Send(ControlMessage),
    /// Wait before carrying on with the remaining actions
    Delay(Duration),
    /// The negotiation reached its verdict
    Finish(AuthOutcome),
    /// The negotiation ended without a verdict of its own
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AwaitingType,
    /// Expecting the exact response announced by the no-cookie scenario
    AwaitingEcho,
    Conversation {
        rounds: &'static [Round],
        next: usize,
    },
    Done,
}

/// One negotiation with the gateway, for a single login attempt
#[derive(Debug)]
pub struct Negotiation {
    scope: String,
    cookie: String,
    state: State,
}

impl Negotiation {
    pub fn new(scope: impl Into<String>) -> Self {
        Self::with_cookie(scope, Uuid::new_v4().simple().to_string())
    }

    pub fn with_cookie(scope: impl Into<String>, cookie: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            cookie: cookie.into(),
            state: State::Idle,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Correlation value carried by our challenges
    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Done
    }

    /// Open the negotiation by asking which kind of credential the peer holds
    pub fn start(&mut self) -> Vec<Action> {
        if self.state != State::Idle {
            return Vec::new();
        }
        self.state = State::AwaitingType;
        vec![self.challenge(Challenge::Wildcard)]
    }

    /// Feed the next message from the gateway
    pub fn on_message(&mut self, message: ControlMessage) -> Vec<Action> {
        if matches!(self.state, State::Idle | State::Done) {
            debug!("Ignoring \"{}\" outside of a negotiation", message.command());
            return Vec::new();
        }

        let authorize = match message {
            ControlMessage::Authorize(authorize) => authorize,
            ControlMessage::Unknown { command, .. } => {
                debug!("Ignoring unknown command \"{}\"", command);
                return Vec::new();
            }
            other => {
                warn!("Unexpected \"{}\" while awaiting a response", other.command());
                return self.reject();
            }
        };

        if let Some(cookie) = &authorize.cookie {
            if *cookie != self.cookie {
                warn!("Response carries a foreign cookie");
                return self.reject();
            }
        }

        let Some(response) = authorize.response else {
            warn!("Authorize message without a response");
            return self.reject();
        };

        match std::mem::replace(&mut self.state, State::Done) {
            State::AwaitingType => self.select(&response),
            State::AwaitingEcho if response == "user me" => {
                self.finish(Scenario::NoCookie.verdict())
            }
            State::AwaitingEcho => self.reject(),
            State::Conversation { rounds, next } => self.advance(rounds, next, &response),
            State::Idle | State::Done => Vec::new(),
        }
    }

    /// The gateway sent something that is not a usable control message
    pub fn on_invalid(&mut self, reason: &str) -> Vec<Action> {
        if matches!(self.state, State::Idle | State::Done) {
            return Vec::new();
        }
        warn!("Invalid message during negotiation: {}", reason);
        self.finish(AuthOutcome::failure(Problem::InternalError))
    }

    fn select(&mut self, response: &str) -> Vec<Action> {
        let parsed = AuthorizeType::parse(response);
        if parsed.data.is_empty() {
            return self.reject();
        }

        if let Some(scenario) =
            Scenario::from_keyword(parsed.data).filter(|s| s.applies_to(&self.scope))
        {
            debug!("Running scenario {:?} for scope {}", scenario, self.scope);
            return self.run(scenario);
        }

        if parsed.scheme == "basic" {
            return match decode_basic(parsed.data) {
                Some((user, password)) => self.finish(check_basic(&self.scope, &user, &password)),
                None => self.reject(),
            };
        }

        self.reject()
    }

    fn run(&mut self, scenario: Scenario) -> Vec<Action> {
        match scenario {
            Scenario::NoCookie => {
                self.state = State::AwaitingEcho;
                vec![
                    Action::Send(AuthorizeMessage::response(None, "user me").into()),
                    self.challenge(Challenge::Wildcard),
                ]
            }
            Scenario::DataThenSuccess => {
                let announce = AuthorizeMessage {
                    cookie: Some(self.cookie.clone()),
                    challenge: Some(LOGIN_DATA_CHALLENGE.to_string()),
                    login_data: Some(json!({ "login": "data" })),
                    ..Default::default()
                };
                let mut actions = vec![Action::Send(announce.into())];
                actions.extend(self.finish(scenario.verdict()));
                actions
            }
            Scenario::NoUser => {
                self.state = State::Done;
                let mut extra = Map::new();
                extra.insert("other".to_string(), Value::from(1));
                let init = InitMessage {
                    version: Some(PROTOCOL_VERSION),
                    extra,
                    ..Default::default()
                };
                vec![Action::Send(init.into()), Action::Abort]
            }
            _ => match scenario.rounds() {
                Some(rounds) => self.ask(rounds, 0),
                None => {
                    let mut actions: Vec<Action> =
                        scenario.delay().map(Action::Delay).into_iter().collect();
                    actions.extend(self.finish(scenario.verdict()));
                    actions
                }
            },
        }
    }

    fn ask(&mut self, rounds: &'static [Round], next: usize) -> Vec<Action> {
        self.state = State::Conversation { rounds, next };
        vec![self.challenge(Challenge::Conversation {
            id: CONVERSATION_ID.to_string(),
            data: rounds[next].challenge.to_string(),
        })]
    }

    fn advance(&mut self, rounds: &'static [Round], next: usize, response: &str) -> Vec<Action> {
        let parsed = AuthorizeType::parse(response);
        let Some((id, payload)) = parsed.data.split_once(' ') else {
            return self.reject();
        };

        if id != CONVERSATION_ID {
            warn!("Conversation id mismatch: {}", id);
            return self.reject();
        }
        if payload.trim_start() != rounds[next].expect {
            return self.reject();
        }

        if next + 1 < rounds.len() {
            self.ask(rounds, next + 1)
        } else {
            self.finish(AuthOutcome::success("me"))
        }
    }

    fn challenge(&self, challenge: Challenge) -> Action {
        Action::Send(AuthorizeMessage::challenge(self.cookie.clone(), challenge.to_string()).into())
    }

    fn reject(&mut self) -> Vec<Action> {
        self.finish(AuthOutcome::failure(Problem::AuthenticationFailed))
    }

    fn finish(&mut self, outcome: AuthOutcome) -> Vec<Action> {
        self.state = State::Done;
        vec![Action::Finish(outcome)]
    }
}
