//! Caller identity
//!
//! Authentication happens in front of the service (Cloudflare Access); the
//! proxy forwards the authenticated e-mail in a header. It is only used to
//! attribute mutations in the logs.

use std::convert::Infallible;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

pub const USER_EMAIL_HEADER: &str = "Cf-Access-Authenticated-User-Email";

/// Who issued the request, or `anonymous` without the header.
#[derive(Debug, Clone, PartialEq)]
pub struct Caller(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let email = parts
            .headers
            .get(USER_EMAIL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("anonymous");
        Ok(Caller(email.to_string()))
    }
}
