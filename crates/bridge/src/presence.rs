use rand::Rng;
use relaycell_core::config::{PresenceConfig, PresenceSelection};
use relaycell_core::{GatewaySession, PresenceSpec};
use tracing::{debug, info, warn};

/// Publishes a cosmetic presence after each transition into `Ready`.
///
/// Failures are logged and dropped; nothing upstream depends on presence.
#[derive(Debug, Clone)]
pub struct PresenceManager {
    enabled: bool,
    selection: PresenceSelection,
    candidates: Vec<PresenceSpec>,
}

impl PresenceManager {
    pub fn new(config: &PresenceConfig) -> Self {
        Self {
            enabled: config.enabled,
            selection: config.selection,
            candidates: config.candidates.clone(),
        }
    }

    pub fn choose(&self) -> Option<&PresenceSpec> {
        if !self.enabled || self.candidates.is_empty() {
            return None;
        }
        match self.selection {
            PresenceSelection::First => self.candidates.first(),
            PresenceSelection::Random => {
                let idx = rand::rng().random_range(0..self.candidates.len());
                self.candidates.get(idx)
            }
        }
    }

    pub async fn on_ready(&self, session: &dyn GatewaySession) {
        let Some(spec) = self.choose() else {
            debug!("Presence disabled, skipping update");
            return;
        };

        match session.update_presence(spec).await {
            Ok(()) => info!(status = spec.status.as_str(), "Presence updated"),
            Err(e) => warn!(error = %e, "Failed to update presence"),
        }
    }
}
