use async_trait::async_trait;
use relaycell_core::{
    Connection, Error, GatewayConnector, GatewaySession, PresenceSpec, Result, SessionEvent,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Session double that records every call.
#[derive(Default)]
pub struct RecordingSession {
    fail_sends: bool,
    fail_presence: bool,
    send_delay: Option<Duration>,
    sends: Mutex<Vec<(u64, String)>>,
    presence: Mutex<Vec<PresenceSpec>>,
    closed: AtomicBool,
}

impl RecordingSession {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_sends: true,
            fail_presence: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            send_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn sends(&self) -> Vec<(u64, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn presence_updates(&self) -> Vec<PresenceSpec> {
        self.presence.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewaySession for RecordingSession {
    async fn send(&self, channel_id: u64, text: &str) -> Result<()> {
        self.sends.lock().unwrap().push((channel_id, text.to_string()));
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends {
            return Err(Error::Channel("Unknown Channel".to_string()));
        }
        Ok(())
    }

    async fn update_presence(&self, presence: &PresenceSpec) -> Result<()> {
        self.presence.lock().unwrap().push(presence.clone());
        if self.fail_presence {
            return Err(Error::Channel("gateway writer gone".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub enum Step {
    Fail(Error),
    Connect,
}

/// Connector double that plays back a script of handshake outcomes.
///
/// Once the script runs out, `connect` never completes.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    attempts: Mutex<Vec<Instant>>,
    sessions: Mutex<Vec<Arc<RecordingSession>>>,
    events: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
    connected: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn sessions(&self) -> Vec<Arc<RecordingSession>> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    /// Push a lifecycle event into the most recent connection.
    pub async fn emit(&self, event: SessionEvent) {
        let tx = self.events.lock().unwrap().last().cloned();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }
}

#[async_trait]
impl GatewayConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Connection> {
        self.attempts.lock().unwrap().push(Instant::now());
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Connect) => {
                let session = Arc::new(RecordingSession::ok());
                let (tx, rx) = mpsc::channel(4);
                self.sessions.lock().unwrap().push(session.clone());
                self.events.lock().unwrap().push(tx);
                self.connected.fetch_add(1, Ordering::SeqCst);
                Ok(Connection {
                    handle: session,
                    events: rx,
                })
            }
            None => std::future::pending().await,
        }
    }
}
