//! Request-scoped context passed explicitly into every component call.

use uuid::Uuid;

use crate::identity::SessionToken;

/// Per-request state; there is no ambient session.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session_token: SessionToken,
    pub request_id: Uuid,
}

impl RequestContext {
    pub fn new(session_token: SessionToken) -> Self {
        Self {
            session_token,
            request_id: Uuid::new_v4(),
        }
    }

    /// Fingerprint of the session token, safe for logs.
    pub fn session_fingerprint(&self) -> String {
        self.session_token.fingerprint()
    }
}
