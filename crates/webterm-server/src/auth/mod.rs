//! Pre-upgrade gating: identity, authorization and origin checks.

pub mod gate;
pub mod origin;

pub use gate::{extract_token, ConnectionGate, Rejection};
pub use origin::OriginPolicy;
