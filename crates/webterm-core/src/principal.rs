//! Authenticated principals and the validator seam that produces them.

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// The only role allowed to open a terminal.
pub const ADMIN_ROLE: &str = "admin";

/// An authenticated identity as reported by a token validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: u64,
    pub username: String,
    pub role: String,
}

impl Principal {
    pub fn new(id: u64, username: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            role: role.into(),
        }
    }

    /// Whether this principal carries the administrative role.
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

/// Turns a bearer token into a [`Principal`].
///
/// Implementations must be cheap to share across connections; the server
/// holds one behind an `Arc` for its whole lifetime.
pub trait PrincipalValidator: Send + Sync {
    /// Validate `token`, failing on malformed, forged or expired input.
    fn validate(&self, token: &str) -> CoreResult<Principal>;
}

impl<F> PrincipalValidator for F
where
    F: Fn(&str) -> CoreResult<Principal> + Send + Sync,
{
    fn validate(&self, token: &str) -> CoreResult<Principal> {
        self(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn admin_role_check() {
        assert!(Principal::new(1, "root", "admin").is_admin());
        assert!(!Principal::new(2, "bob", "editor").is_admin());
        assert!(!Principal::new(3, "eve", "Admin").is_admin());
    }

    #[test]
    fn closure_validator() {
        let validator = |token: &str| {
            if token == "good" {
                Ok(Principal::new(1, "root", ADMIN_ROLE))
            } else {
                Err(CoreError::Token("unknown token".into()))
            }
        };
        assert_eq!(validator.validate("good").unwrap().username, "root");
        assert!(validator.validate("bad").is_err());
    }
}
