//! Caller identity resolved by the upstream auth/session collaborator.
//!
//! The engine never authenticates callers itself. The gateway in front of it
//! resolves the session and forwards the caller's user id and tenant
//! (business) id as trusted headers; this module turns those headers into a
//! typed [`Session`] and rejects requests that lack them.

use axum::extract::FromRequestParts;
use http::request::Parts;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::CommonError;

/// Header carrying the authenticated user's id.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the caller's tenant (business) id.
pub const BUSINESS_ID_HEADER: &str = "x-business-id";

/// The authenticated caller of a request, scoped to one business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub user_id: String,
    pub business_id: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, business_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            business_id: business_id.into(),
        }
    }

    /// Cross-tenant access is a hard authorization error, never a filter.
    pub fn ensure_business(&self, business_id: &str) -> Result<(), CommonError> {
        if self.business_id == business_id {
            Ok(())
        } else {
            Err(CommonError::Authorization {
                msg: "resource belongs to a different business".to_string(),
                source: None,
            })
        }
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = CommonError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_value(parts, USER_ID_HEADER);
        let business_id = header_value(parts, BUSINESS_ID_HEADER);

        match (user_id, business_id) {
            (Some(user_id), Some(business_id)) => Ok(Session {
                user_id,
                business_id,
            }),
            _ => Err(CommonError::Authentication {
                msg: "no valid session".to_string(),
                source: None,
            }),
        }
    }
}
