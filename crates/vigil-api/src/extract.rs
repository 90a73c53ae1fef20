//! Caller identity taken from request headers.

use axum::{extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

pub const ROLE_HEADER: &str = "x-vigil-role";
pub const USER_HEADER: &str = "x-vigil-user";

/// Who is calling. Missing headers mean an anonymous non-admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user: String,
    pub is_admin: bool,
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        Ok(Caller {
            user: header(USER_HEADER).unwrap_or("anonymous").to_string(),
            is_admin: header(ROLE_HEADER).is_some_and(|r| r.eq_ignore_ascii_case("admin")),
        })
    }
}
