use serde::{Deserialize, Serialize};

/// A single outbound chat message requested over HTTP.
///
/// Consumed exactly once by the command bridge: either sent or rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundCommand {
    pub channel_id: i64,
    pub text: String,
}

impl OutboundCommand {
    pub fn new(channel_id: i64, text: impl Into<String>) -> Self {
        Self {
            channel_id,
            text: text.into(),
        }
    }
}
