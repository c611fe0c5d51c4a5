//! webterm-core: shared library for the browser terminal bridge.
//!
//! Provides the principal model and validator trait, HMAC-signed principal
//! tokens, and the JSON control frames exchanged over the terminal socket.

pub mod error;
pub mod principal;
pub mod protocol;
pub mod token;

// Re-export commonly used items at crate root.
pub use error::{CoreError, CoreResult};
pub use principal::{Principal, PrincipalValidator, ADMIN_ROLE};
pub use protocol::{parse_inbound, ControlFrame, Inbound};
pub use token::{generate_secret, issue_token, verify_token, HmacTokenValidator};
