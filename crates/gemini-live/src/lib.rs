mod client;

pub use gemini_live_types as types;
pub use client::config::{Config, ConfigBuilder};
pub use client::stats::Stats;
pub use client::{Client, ServerEvent, ServerRx, connect, connect_with_config};
