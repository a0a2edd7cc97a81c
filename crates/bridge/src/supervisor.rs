use relaycell_core::{Connection, GatewayConnector, SessionEvent, SessionHandle};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::gate::{Observation, ReadinessGate, Transition};
use crate::presence::PresenceManager;

/// Why a live connection stopped being supervised.
enum Exit {
    Disconnected(String),
    Fatal(String),
    Shutdown,
}

/// Owns the gateway session: connects, watches, reconnects, and reports
/// every lifecycle transition to the readiness gate.
pub struct Supervisor {
    connector: Arc<dyn GatewayConnector>,
    gate: ReadinessGate,
    presence: Arc<PresenceManager>,
    policy: BackoffPolicy,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn GatewayConnector>,
        gate: ReadinessGate,
        presence: PresenceManager,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            connector,
            gate,
            presence: Arc::new(presence),
            policy,
        }
    }

    /// Run until shutdown or an unrecoverable error. Always leaves the gate `Closed`.
    pub async fn run_loop(self, mut shutdown: broadcast::Receiver<()>) {
        info!("Gateway supervisor starting");
        let mut backoff = Backoff::new(self.policy);

        loop {
            let attempt = tokio::select! {
                result = self.connector.connect() => result,
                _ = shutdown.recv() => {
                    info!("Gateway supervisor shutting down");
                    break;
                }
            };

            match attempt {
                Ok(connection) => {
                    let connected_at = tokio::time::Instant::now();
                    match self.supervise(connection, &mut shutdown).await {
                        Exit::Shutdown => {
                            info!("Gateway supervisor shutting down");
                            break;
                        }
                        Exit::Fatal(reason) => {
                            error!(reason = %reason, "Gateway session closed permanently");
                            break;
                        }
                        Exit::Disconnected(reason) => {
                            let uptime = connected_at.elapsed();
                            warn!(reason = %reason, uptime_ms = uptime.as_millis() as u64, "Gateway session lost");
                            self.gate.observe(Transition::Degraded);
                            // Short-lived sessions keep escalating the delay.
                            if uptime >= self.policy.stable_after {
                                backoff.reset();
                            }
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Gateway handshake failed permanently");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, attempt = backoff.attempts() + 1, "Gateway handshake failed");
                }
            }

            let delay = backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "Reconnecting to gateway");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    info!("Gateway supervisor shutting down");
                    break;
                }
            }
        }

        self.gate.observe(Transition::Closed);
        info!("Gateway supervisor stopped");
    }

    async fn supervise(
        &self,
        connection: Connection,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Exit {
        let Connection { handle, mut events } = connection;

        if self.gate.observe(Transition::Ready(handle.clone())) == Observation::BecameReady {
            self.spawn_presence(handle.clone());
        }

        let exit = tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Disconnected(reason)) => Exit::Disconnected(reason),
                Some(SessionEvent::Fatal(reason)) => Exit::Fatal(reason),
                None => Exit::Disconnected("session event stream ended".to_string()),
            },
            _ = shutdown.recv() => Exit::Shutdown,
        };

        if !matches!(exit, Exit::Disconnected(_)) {
            if let Err(e) = handle.close().await {
                debug!(error = %e, "Failed to close gateway session");
            }
        }
        exit
    }

    fn spawn_presence(&self, handle: SessionHandle) {
        let presence = Arc::clone(&self.presence);
        tokio::spawn(async move {
            presence.on_ready(handle.as_ref()).await;
        });
    }
}
