// Session tokens and the verifier seam

use crate::value::Map;

/// What the verifier learned from a request token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub token: String,
    /// The token carries a valid signature.
    pub signed: bool,
    /// The token belongs to an authenticated identity.
    pub authed: bool,
    pub payload: Map,
}

impl Session {
    pub fn signed(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            signed: true,
            ..Self::default()
        }
    }

    pub fn authed(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            signed: true,
            authed: true,
            ..Self::default()
        }
    }
}

/// Verifies the token found in the session cookie or `Authorization: Bearer` header.
///
/// Returning `None` leaves the request unsigned.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<Session>;
}

impl<F> TokenVerifier for F
where
    F: Fn(&str) -> Option<Session> + Send + Sync,
{
    fn verify(&self, token: &str) -> Option<Session> {
        self(token)
    }
}

/// Pull the bearer token out of an Authorization header value.
pub(crate) fn bearer_token(header: &str) -> &str {
    header.strip_prefix("Bearer ").unwrap_or(header).trim()
}
