//! HTTP handlers, grouped by resource.

pub mod error;
pub mod auth;
pub mod auth_api;
pub mod chat_api;
pub mod calendar_api;
pub mod task_api;
pub mod email_api;
pub mod admin_api;

pub use auth::AuthUser;
pub use error::ApiError;

use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use validator::Validate;

/// JSON body that is deserialized and then validated. Both malformed JSON
/// and failed validation are reported as 400.
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        value.validate()?;
        Ok(ValidJson(value))
    }
}

/// Deserialize a field that may be absent, `null`, or a value, keeping the
/// three cases apart: `None`, `Some(None)`, `Some(Some(v))`.
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}
