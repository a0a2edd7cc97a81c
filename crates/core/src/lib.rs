pub mod config;
pub mod error;
pub mod message;
pub mod paths;
pub mod session;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use message::OutboundCommand;
pub use paths::Paths;
pub use session::{Connection, GatewayConnector, GatewaySession, SessionEvent, SessionHandle};
pub use types::{Activity, ActivityKind, PresenceSpec, PresenceStatus, SessionState};
