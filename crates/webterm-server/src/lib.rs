//! webterm-server: browser terminal bridge.
//!
//! Accepts WebSocket upgrades on a single endpoint, admits only admin
//! principals from allow-listed origins, and bridges each admitted
//! connection to a shell running on a pseudo-terminal.

pub mod auth;
pub mod config;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{CliOverrides, ServerConfig};
pub use server::{ShutdownHandle, TerminalServer};
