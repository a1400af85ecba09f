//! Session extraction from the `X-Session-Token` header.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::context::RequestContext;
use crate::error::CivicError;
use crate::identity::SessionToken;

pub const SESSION_HEADER: &str = "x-session-token";

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = CivicError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(SESSION_HEADER)
            .ok_or_else(|| CivicError::validation("X-Session-Token header is required"))?
            .to_str()
            .map_err(|_| CivicError::validation("X-Session-Token header is not valid text"))?;

        Ok(RequestContext::new(SessionToken::parse(raw)?))
    }
}
