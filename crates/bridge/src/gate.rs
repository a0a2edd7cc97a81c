//! Readiness gate: the one shared cell between the request path and the supervisor.
//!
//! The supervisor is the only writer (`observe`); any number of request tasks
//! read a snapshot through `check`. The cell lives in a `tokio::sync::watch`
//! channel, so a write is a single in-place swap and a read never waits on
//! the gateway.

use chrono::{DateTime, Utc};
use relaycell_core::{SessionHandle, SessionState};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// A lifecycle transition reported by the supervisor.
pub enum Transition {
    /// Handshake completed; publish this handle.
    Ready(SessionHandle),
    /// Transient loss, reconnect in progress.
    Degraded,
    /// Fatal error or shutdown. Terminal.
    Closed,
}

impl Transition {
    pub fn target(&self) -> SessionState {
        match self {
            Transition::Ready(_) => SessionState::Ready,
            Transition::Degraded => SessionState::Degraded,
            Transition::Closed => SessionState::Closed,
        }
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transition({})", self.target())
    }
}

/// What `observe` did with a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Entered `Ready` from `Connecting` or `Degraded`.
    BecameReady,
    /// `Ready` observed again; the published handle was replaced, state unchanged.
    Refreshed,
    Changed {
        from: SessionState,
        to: SessionState,
    },
    /// Not a legal move from the current state (including anything after `Closed`).
    Ignored,
}

/// Result of a readiness check.
pub enum Readiness {
    Ready(SessionHandle),
    NotReady(SessionState),
    Closed,
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Ready(_) => f.write_str("Ready(..)"),
            Readiness::NotReady(state) => write!(f, "NotReady({state})"),
            Readiness::Closed => f.write_str("Closed"),
        }
    }
}

pub struct GateSnapshot {
    pub state: SessionState,
    pub since: DateTime<Utc>,
    handle: Option<SessionHandle>,
}

impl GateSnapshot {
    fn initial() -> Self {
        Self {
            state: SessionState::Connecting,
            since: Utc::now(),
            handle: None,
        }
    }

    fn enter(&mut self, state: SessionState, handle: Option<SessionHandle>) {
        self.state = state;
        self.handle = handle;
        self.since = Utc::now();
    }

    fn apply(&mut self, transition: Transition) -> Observation {
        let from = self.state;
        match (from, transition) {
            (SessionState::Closed, _) => Observation::Ignored,
            (SessionState::Ready, Transition::Ready(handle)) => {
                self.handle = Some(handle);
                Observation::Refreshed
            }
            (_, Transition::Ready(handle)) => {
                self.enter(SessionState::Ready, Some(handle));
                Observation::BecameReady
            }
            (SessionState::Ready, Transition::Degraded) => {
                self.enter(SessionState::Degraded, None);
                Observation::Changed {
                    from,
                    to: SessionState::Degraded,
                }
            }
            (_, Transition::Degraded) => Observation::Ignored,
            (_, Transition::Closed) => {
                self.enter(SessionState::Closed, None);
                Observation::Changed {
                    from,
                    to: SessionState::Closed,
                }
            }
        }
    }
}

impl fmt::Debug for GateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateSnapshot")
            .field("state", &self.state)
            .field("since", &self.since)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

#[derive(Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<GateSnapshot>>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateSnapshot::initial());
        Self { tx: Arc::new(tx) }
    }

    /// Record a lifecycle transition. Called only by the supervisor.
    pub fn observe(&self, transition: Transition) -> Observation {
        let requested = transition.target();
        let mut outcome = Observation::Ignored;
        self.tx.send_if_modified(|snapshot| {
            outcome = snapshot.apply(transition);
            outcome != Observation::Ignored
        });

        match outcome {
            Observation::BecameReady => info!("Gateway session ready"),
            Observation::Refreshed => debug!("Gateway session handle replaced"),
            Observation::Changed { from, to } => info!(%from, %to, "Gateway session state changed"),
            Observation::Ignored => debug!(requested = %requested, current = %self.state(), "Ignoring lifecycle transition"),
        }
        outcome
    }

    pub fn check(&self) -> Readiness {
        let snapshot = self.tx.borrow();
        match (snapshot.state, snapshot.handle.as_ref()) {
            (SessionState::Ready, Some(handle)) => Readiness::Ready(Arc::clone(handle)),
            (SessionState::Closed, _) => Readiness::Closed,
            (state, _) => Readiness::NotReady(state),
        }
    }

    pub fn state(&self) -> SessionState {
        self.tx.borrow().state
    }

    /// Current state and when it was entered.
    pub fn status(&self) -> (SessionState, DateTime<Utc>) {
        let snapshot = self.tx.borrow();
        (snapshot.state, snapshot.since)
    }

    pub fn subscribe(&self) -> watch::Receiver<GateSnapshot> {
        self.tx.subscribe()
    }
}
