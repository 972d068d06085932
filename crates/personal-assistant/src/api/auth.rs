//! Token authentication for protected routes.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use super::error::ApiError;
use crate::db::User;
use crate::shared_state::AppState;

/// The authenticated caller, resolved from `Authorization: Token <key>`
/// or `Authorization: Bearer <key>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }
}

/// Extract the key from an Authorization header value.
pub fn parse_token(header: &str) -> Option<&str> {
    let (scheme, key) = header.trim().split_once(' ')?;
    let key = key.trim();
    let known = scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer");
    (known && !key.is_empty()).then_some(key)
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Authentication credentials were not provided.".into()))?;
        let token = parse_token(header)
            .ok_or_else(|| ApiError::Unauthorized("Invalid authorization header.".into()))?;

        match state.database.users.user_for_token(token)? {
            Some(user) => Ok(AuthUser(user)),
            None => {
                debug!("Rejected unknown token");
                Err(ApiError::Unauthorized("Invalid token.".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_token_and_bearer_schemes() {
        assert_eq!(parse_token("Token abc123"), Some("abc123"));
        assert_eq!(parse_token("Bearer abc123"), Some("abc123"));
        assert_eq!(parse_token("bearer  abc123 "), Some("abc123"));
        assert_eq!(parse_token("Basic abc123"), None);
        assert_eq!(parse_token("Token "), None);
        assert_eq!(parse_token("abc123"), None);
    }
}
