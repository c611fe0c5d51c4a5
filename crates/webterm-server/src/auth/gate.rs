//! Connection gate run inside the WebSocket handshake.
//!
//! Checks, in order, before any response is produced:
//! 1. request path is the terminal endpoint
//! 2. a token is present (query `token`, else `Authorization: Bearer`)
//! 3. the validator accepts the token
//! 4. the principal holds the admin role
//! 5. the declared origin is allow-listed
//!
//! Nothing is spawned until all of them pass.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tracing::{debug, warn};
use webterm_core::{Principal, PrincipalValidator};

use super::origin::OriginPolicy;

/// Why a request was turned away before upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotFound,
    /// Missing, malformed, invalid or expired token.
    Unauthorized(String),
    /// Valid identity without the admin role, or a disallowed origin.
    Forbidden(String),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::NotFound => StatusCode::NOT_FOUND,
            Rejection::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Rejection::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    /// HTTP response returned instead of `101 Switching Protocols`.
    pub fn into_response(self) -> ErrorResponse {
        let body = match &self {
            Rejection::NotFound => "not found",
            Rejection::Unauthorized(_) => "unauthorized",
            Rejection::Forbidden(_) => "forbidden",
        };
        let mut response = ErrorResponse::new(Some(body.to_string()));
        *response.status_mut() = self.status();
        response
    }
}

/// Identity, role and origin checks for the terminal endpoint.
#[derive(Clone)]
pub struct ConnectionGate {
    path: String,
    origins: OriginPolicy,
    validator: Arc<dyn PrincipalValidator>,
}

impl ConnectionGate {
    pub fn new(
        path: impl Into<String>,
        origins: OriginPolicy,
        validator: Arc<dyn PrincipalValidator>,
    ) -> Self {
        Self {
            path: path.into(),
            origins,
            validator,
        }
    }

    /// Run every check against an upgrade request.
    pub fn check(&self, req: &Request, remote: SocketAddr) -> Result<Principal, Rejection> {
        if req.uri().path() != self.path {
            debug!(remote = %remote, path = %req.uri().path(), "upgrade for unknown path");
            return Err(Rejection::NotFound);
        }

        let Some(token) = extract_token(req) else {
            warn!(remote = %remote, "terminal upgrade without token");
            return Err(Rejection::Unauthorized("missing token".into()));
        };

        let principal = match self.validator.validate(&token) {
            Ok(principal) => principal,
            Err(e) => {
                warn!(remote = %remote, error = %e, "terminal upgrade with invalid token");
                return Err(Rejection::Unauthorized(e.to_string()));
            }
        };

        if !principal.is_admin() {
            warn!(
                remote = %remote,
                username = %principal.username,
                role = %principal.role,
                "terminal upgrade by non-admin principal"
            );
            return Err(Rejection::Forbidden(format!(
                "role {:?} may not open a terminal",
                principal.role
            )));
        }

        let origin = match req.headers().get(header::ORIGIN) {
            Some(value) => match value.to_str() {
                Ok(origin) => Some(origin),
                Err(_) => {
                    warn!(remote = %remote, username = %principal.username, "non-ASCII origin header");
                    return Err(Rejection::Forbidden("invalid origin".into()));
                }
            },
            None => None,
        };
        if !self.origins.permits(origin) {
            warn!(
                remote = %remote,
                username = %principal.username,
                origin = origin.unwrap_or_default(),
                "terminal upgrade from disallowed origin"
            );
            return Err(Rejection::Forbidden("origin not allowed".into()));
        }

        Ok(principal)
    }
}

/// Pull the token from the `token` query parameter, falling back to an
/// `Authorization: Bearer` header. Empty values count as absent.
pub fn extract_token(req: &Request) -> Option<String> {
    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key != "token" {
                continue;
            }
            let value = value.replace('+', " ");
            let decoded = urlencoding::decode(&value)
                .map(|v| v.into_owned())
                .unwrap_or(value);
            let decoded = decoded.trim();
            if !decoded.is_empty() {
                return Some(decoded.to_string());
            }
        }
    }

    let auth = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = auth.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use webterm_core::CoreError;

    fn remote() -> SocketAddr {
        "203.0.113.9:50000".parse().unwrap()
    }

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap()
    }

    fn fake_validator(token: &str) -> Result<Principal, CoreError> {
        match token {
            "admin-token" => Ok(Principal::new(1, "root", "admin")),
            "editor-token" => Ok(Principal::new(7, "bob", "editor")),
            _ => Err(CoreError::Token("token expired".into())),
        }
    }

    fn gate() -> ConnectionGate {
        ConnectionGate::new(
            "/ws/terminal",
            OriginPolicy::new(&["http://localhost:3000"]),
            Arc::new(fake_validator),
        )
    }

    #[test]
    fn token_from_query() {
        let req = request("/ws/terminal?foo=1&token=abc%2Edef", &[]);
        assert_eq!(extract_token(&req).as_deref(), Some("abc.def"));
    }

    #[test]
    fn query_takes_precedence_over_header() {
        let req = request(
            "/ws/terminal?token=from-query",
            &[("Authorization", "Bearer from-header")],
        );
        assert_eq!(extract_token(&req).as_deref(), Some("from-query"));
    }

    #[test]
    fn token_from_bearer_header() {
        let req = request("/ws/terminal", &[("Authorization", "bearer  xyz ")]);
        assert_eq!(extract_token(&req).as_deref(), Some("xyz"));

        let req = request("/ws/terminal?token=", &[("Authorization", "Bearer xyz")]);
        assert_eq!(extract_token(&req).as_deref(), Some("xyz"));
    }

    #[test]
    fn no_token() {
        assert_eq!(extract_token(&request("/ws/terminal", &[])), None);
        assert_eq!(
            extract_token(&request("/ws/terminal", &[("Authorization", "Basic dXNlcg==")])),
            None
        );
        assert_eq!(
            extract_token(&request("/ws/terminal", &[("Authorization", "Bearer")])),
            None
        );
    }

    #[test]
    fn admits_admin_from_allowed_origin() {
        let req = request(
            "/ws/terminal?token=admin-token",
            &[("Origin", "http://localhost:3000")],
        );
        let principal = gate().check(&req, remote()).unwrap();
        assert_eq!(principal, Principal::new(1, "root", "admin"));
    }

    #[test]
    fn admits_missing_origin() {
        let req = request("/ws/terminal", &[("Authorization", "Bearer admin-token")]);
        assert!(gate().check(&req, remote()).is_ok());
    }

    #[test]
    fn rejects_unknown_path() {
        let req = request("/ws/other?token=admin-token", &[]);
        assert_eq!(gate().check(&req, remote()), Err(Rejection::NotFound));
    }

    #[test]
    fn rejects_missing_and_invalid_tokens() {
        let err = gate().check(&request("/ws/terminal", &[]), remote()).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = gate()
            .check(&request("/ws/terminal?token=stale", &[]), remote())
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn rejects_non_admin() {
        let req = request(
            "/ws/terminal?token=editor-token",
            &[("Origin", "http://localhost:3000")],
        );
        let err = gate().check(&req, remote()).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn rejects_disallowed_origin_even_with_valid_token() {
        let req = request(
            "/ws/terminal?token=admin-token",
            &[("Origin", "http://evil.example")],
        );
        assert_eq!(
            gate().check(&req, remote()),
            Err(Rejection::Forbidden("origin not allowed".into()))
        );
    }

    #[test]
    fn identity_is_checked_before_origin() {
        // A bad token from a bad origin reports the identity failure.
        let req = request("/ws/terminal?token=stale", &[("Origin", "http://evil.example")]);
        let err = gate().check(&req, remote()).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        // A non-admin from a bad origin reports the role failure.
        let req = request(
            "/ws/terminal?token=editor-token",
            &[("Origin", "http://evil.example")],
        );
        assert!(matches!(
            gate().check(&req, remote()),
            Err(Rejection::Forbidden(reason)) if reason.contains("role")
        ));
    }

    #[test]
    fn validator_not_called_without_token_or_on_wrong_path() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let gate = ConnectionGate::new(
            "/ws/terminal",
            OriginPolicy::new(&["*"]),
            Arc::new(move |_: &str| -> Result<Principal, CoreError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Principal::new(1, "root", "admin"))
            }),
        );

        let _ = gate.check(&request("/ws/terminal", &[]), remote());
        let _ = gate.check(&request("/elsewhere?token=t", &[]), remote());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let _ = gate.check(&request("/ws/terminal?token=t", &[]), remote());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejection_responses() {
        let resp = Rejection::Unauthorized("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.body().as_deref(), Some("unauthorized"));

        let resp = Rejection::Forbidden("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        assert_eq!(Rejection::NotFound.into_response().status(), StatusCode::NOT_FOUND);
    }
}
