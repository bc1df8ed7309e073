/// Connection lifecycle state machine
///
/// `Machine::apply` is a pure transition function: it takes an event and the
/// current time, updates the link state, retry bookkeeping and status record,
/// and returns the side effects the supervisor has to carry out. It performs
/// no I/O and spawns nothing, which keeps every transition unit-testable.
use super::retry::{RetryDecision, RetryPolicy, RetryState};
use super::{Classification, StatusRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Named states of a backend link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Uninitialized,
    Connecting,
    Ready,
    Error,
    Disconnected,
}

impl LinkState {
    pub fn is_down(&self) -> bool {
        matches!(self, LinkState::Error | LinkState::Disconnected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Uninitialized => "uninitialized",
            LinkState::Connecting => "connecting",
            LinkState::Ready => "ready",
            LinkState::Error => "error",
            LinkState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Inputs of the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// First connection attempt requested by `connect()`
    Start,
    /// A scheduled retry timer fired
    RetryDue { attempt: u32, generation: u64 },
    /// The transport is (re)connecting on its own
    Connecting,
    /// Handshake completed
    Ready,
    /// A connection attempt or a live connection failed
    Error(String),
    /// The connection was closed
    Closed(Option<String>),
    /// Heartbeat of a given session stopped answering
    Lost { session: u64, reason: String },
    /// A classifier run of a given session finished
    Classified {
        session: u64,
        classification: Classification,
    },
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Run one connection attempt
    Open,
    /// Start a classifier run for the session
    Classify { session: u64 },
    /// Start heartbeat monitoring for the session
    Monitor { session: u64 },
    /// Stop heartbeat monitoring
    Unmonitor,
    /// Fire `RetryDue { attempt, generation }` after `delay`
    ScheduleRetry {
        attempt: u32,
        delay: Duration,
        generation: u64,
    },
    /// Retry budget is spent
    GiveUp,
}

/// Lifecycle state of one backend link
#[derive(Debug, Clone)]
pub struct Machine {
    state: LinkState,
    retry: RetryState,
    status: StatusRecord,
    session: u64,
    classifying: bool,
    reclassify: bool,
    /// Bumped for every scheduled retry timer
    retry_generation: u64,
}

impl Machine {
    pub fn new(policy: RetryPolicy, now: DateTime<Utc>) -> Self {
        Self {
            state: LinkState::Uninitialized,
            retry: RetryState::new(policy),
            status: StatusRecord::new(&policy, now),
            session: 0,
            classifying: false,
            reclassify: false,
            retry_generation: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn retry(&self) -> &RetryState {
        &self.retry
    }

    pub fn status(&self) -> &StatusRecord {
        &self.status
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn is_classifying(&self) -> bool {
        self.classifying
    }

    /// Generation of the most recently scheduled retry timer
    pub fn retry_generation(&self) -> u64 {
        self.retry_generation
    }

    /// Apply one event and return the effects to run
    pub fn apply(&mut self, event: LinkEvent, now: DateTime<Utc>) -> Vec<Effect> {
        match event {
            LinkEvent::Start => {
                self.begin_attempt("connecting".to_string(), now);
                vec![Effect::Open]
            }
            LinkEvent::RetryDue { attempt, generation } => {
                // Stale timer: a READY arrived in between, or a newer retry superseded it
                if !self.retry.is_reconnecting()
                    || generation != self.retry_generation
                    || attempt != self.retry.current()
                {
                    return Vec::new();
                }
                self.retry.fire();
                let max = self.retry.policy().max_retries;
                self.begin_attempt(format!("reconnecting (attempt {attempt}/{max})"), now);
                vec![Effect::Open]
            }
            LinkEvent::Connecting => {
                if self.state == LinkState::Connecting {
                    return Vec::new();
                }
                self.begin_attempt("connecting".to_string(), now);
                Vec::new()
            }
            LinkEvent::Ready => self.enter_ready(now),
            LinkEvent::Error(message) => {
                self.enter_down(LinkState::Error, format!("connection error: {message}"), Some(message), now)
            }
            LinkEvent::Closed(reason) => {
                let message = match &reason {
                    Some(reason) => format!("disconnected: {reason}"),
                    None => "disconnected".to_string(),
                };
                self.enter_down(LinkState::Disconnected, message, reason, now)
            }
            LinkEvent::Lost { session, reason } => {
                if session != self.session || self.state != LinkState::Ready {
                    return Vec::new();
                }
                self.enter_down(
                    LinkState::Disconnected,
                    format!("connection lost: {reason}"),
                    Some(reason),
                    now,
                )
            }
            LinkEvent::Classified {
                session,
                classification,
            } => self.finish_classification(session, classification, now),
        }
    }

    fn begin_attempt(&mut self, message: String, now: DateTime<Utc>) {
        self.state = LinkState::Connecting;
        self.status.connection_attempts += 1;
        self.status.message = message;
        self.commit(now);
    }

    fn enter_ready(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        self.state = LinkState::Ready;
        self.retry.reset();
        self.session += 1;
        self.status.message = "connected".to_string();
        // Anything already classified belongs to the previous session
        self.status.clear_topology();
        self.commit(now);

        let mut effects = vec![Effect::Monitor {
            session: self.session,
        }];
        if self.classifying {
            self.reclassify = true;
        } else {
            self.classifying = true;
            effects.push(Effect::Classify {
                session: self.session,
            });
        }
        effects
    }

    fn enter_down(
        &mut self,
        state: LinkState,
        message: String,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        let was_up = self.state == LinkState::Ready;

        // A retry is already pending, or the budget is spent and nothing new
        // can be scheduled: a repeated failure report changes nothing.
        if !was_up && self.state.is_down() && (self.retry.is_reconnecting() || self.retry.is_exhausted()) {
            return Vec::new();
        }

        self.state = state;
        self.reclassify = false;
        if error.is_some() {
            self.status.last_error = error;
        }

        let mut effects = vec![Effect::Unmonitor];
        if self.retry.is_reconnecting() {
            self.status.message = message;
        } else {
            match self.retry.next() {
                RetryDecision::Retry { attempt, delay } => {
                    let max = self.retry.policy().max_retries;
                    self.status.message = format!(
                        "{message}; retrying in {}s (attempt {attempt}/{max})",
                        delay.as_secs()
                    );
                    self.retry_generation += 1;
                    effects.push(Effect::ScheduleRetry {
                        attempt,
                        delay,
                        generation: self.retry_generation,
                    });
                }
                RetryDecision::GiveUp { attempts } => {
                    self.status.message =
                        format!("{message}; giving up after {attempts} retries");
                    effects.push(Effect::GiveUp);
                }
            }
        }

        self.commit(now);
        effects
    }

    fn finish_classification(
        &mut self,
        session: u64,
        classification: Classification,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        self.classifying = false;

        if self.state == LinkState::Ready && self.reclassify {
            self.reclassify = false;
            self.classifying = true;
            return vec![Effect::Classify {
                session: self.session,
            }];
        }

        if session != self.session || self.state != LinkState::Ready {
            return Vec::new();
        }

        self.status.message = format!("connected ({})", classification.topology);
        self.status.apply_classification(classification);
        self.commit(now);
        Vec::new()
    }

    /// Sync derived fields and bump the counters
    fn commit(&mut self, now: DateTime<Utc>) {
        self.status.state = self.state;
        self.status.connected = self.state == LinkState::Ready;
        self.status.retry = self.retry.snapshot();
        if !self.status.connected {
            self.status.clear_topology();
        }
        self.status.touch(now);
    }
}
