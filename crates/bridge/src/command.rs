use relaycell_core::config::BridgeConfig;
use relaycell_core::{Error, OutboundCommand, SessionState};
use std::fmt;
use tracing::{debug, warn};

use crate::gate::{Readiness, ReadinessGate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Caller error; retrying the same command will not help.
    InvalidInput(String),
    /// The gateway refused or failed this particular send.
    SendFailed(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            RejectReason::SendFailed(msg) => write!(f, "send failed: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent,
    Rejected(RejectReason),
    /// The session is not usable right now (or ever again, if `Closed`).
    Unavailable(SessionState),
}

/// Narrow command surface handed to the HTTP layer.
#[derive(Clone)]
pub struct CommandBridge {
    gate: ReadinessGate,
    max_message_chars: usize,
}

impl CommandBridge {
    pub fn new(gate: ReadinessGate, config: &BridgeConfig) -> Self {
        Self {
            gate,
            max_message_chars: config.max_message_chars,
        }
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Validate, check readiness, and make at most one send attempt.
    pub async fn submit(&self, command: OutboundCommand) -> SubmitOutcome {
        let channel_id = match self.validate(&command) {
            Ok(id) => id,
            Err(e) => {
                debug!(error = %e, "Rejecting outbound command");
                return SubmitOutcome::Rejected(RejectReason::InvalidInput(e.to_string()));
            }
        };

        let handle = match self.gate.check() {
            Readiness::Ready(handle) => handle,
            Readiness::NotReady(state) => {
                debug!(%state, channel_id, "Gateway not ready, command unavailable");
                return SubmitOutcome::Unavailable(state);
            }
            Readiness::Closed => return SubmitOutcome::Unavailable(SessionState::Closed),
        };

        match handle.send(channel_id, &command.text).await {
            Ok(()) => {
                debug!(channel_id, "Message sent");
                SubmitOutcome::Sent
            }
            Err(e) => {
                warn!(error = %e, channel_id, "Gateway rejected message");
                SubmitOutcome::Rejected(RejectReason::SendFailed(e.to_string()))
            }
        }
    }

    fn validate(&self, command: &OutboundCommand) -> Result<u64, Error> {
        let channel_id = u64::try_from(command.channel_id)
            .map_err(|_| Error::Validation("channel_id must be non-negative".to_string()))?;

        if command.text.trim().is_empty() {
            return Err(Error::Validation("message must not be empty".to_string()));
        }

        let chars = command.text.chars().count();
        if chars > self.max_message_chars {
            return Err(Error::Validation(format!(
                "message is {} characters, limit is {}",
                chars, self.max_message_chars
            )));
        }

        Ok(channel_id)
    }
}
