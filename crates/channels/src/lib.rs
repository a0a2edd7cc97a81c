pub mod rate_limit;

#[cfg(feature = "discord")]
pub mod discord;

#[cfg(feature = "discord")]
pub use discord::{DiscordConnector, DiscordSession};
pub use rate_limit::ChannelRateLimiter;
