//! The rchat node runtime.
//!
//! [`Node`] is the explicit handle the UI process constructs at startup;
//! every command of the external surface is a method on it and every
//! state change the UI cares about arrives on the event stream returned
//! by [`Node::subscribe_events`].

pub mod commands;
pub mod config;
pub mod events;
pub mod node;
pub mod oauth;
pub mod theme;
pub mod vault;

mod bridge;
mod error;
mod invite;
mod messaging;
mod session;
mod transfer;

pub use config::NodeConfig;
pub use error::NodeError;
pub use events::{Event, EventBus};
pub use node::Node;

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise structured logging for a node process. Safe to call once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rchat_node=debug,rchat_net=debug,rchat_store=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
