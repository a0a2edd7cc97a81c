//! Boundary between the bridge and a concrete gateway client.
//!
//! A [`GatewayConnector`] performs the handshake and hands back a live
//! [`Connection`]: the session handle plus the lifecycle event stream that
//! only the supervisor consumes.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::PresenceSpec;

#[async_trait]
pub trait GatewaySession: Send + Sync {
    /// Post `text` to the channel. One call is one send attempt.
    async fn send(&self, channel_id: u64, text: &str) -> Result<()>;

    async fn update_presence(&self, presence: &PresenceSpec) -> Result<()>;

    /// Close the underlying connection. Later calls on this handle fail.
    async fn close(&self) -> Result<()>;
}

pub type SessionHandle = Arc<dyn GatewaySession>;

/// Lifecycle notifications emitted by a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Transient loss; reconnecting may succeed.
    Disconnected(String),
    /// The remote refused the session for good (bad credential, bad intents).
    Fatal(String),
}

pub struct Connection {
    pub handle: SessionHandle,
    pub events: mpsc::Receiver<SessionEvent>,
}

#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Connect and complete the handshake. Returns only once the session is usable.
    ///
    /// Errors for which [`crate::Error::is_fatal`] holds must not be retried.
    async fn connect(&self) -> Result<Connection>;
}
