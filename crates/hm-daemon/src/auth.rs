//! `x-api-key` request gate.

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::{api_types::ErrorResponse, state::AppState};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared key clients present in `x-api-key`.
#[derive(Clone)]
pub struct ApiKey(Arc<str>);

impl ApiKey {
    /// Blank keys are refused so an empty header can never match.
    pub fn new(key: impl AsRef<str>) -> Option<Self> {
        let key = key.as_ref().trim();
        if key.is_empty() {
            None
        } else {
            Some(Self(Arc::from(key)))
        }
    }

    pub fn matches(&self, presented: &[u8]) -> bool {
        self.0.as_bytes().ct_eq(presented).into()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Rejects with 401 before the handler runs.
pub async fn require_api_key(
    State(st): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .map(|v| v.as_bytes());

    let ok = match (st.api_key.as_ref(), presented) {
        (Some(key), Some(p)) => key.matches(p),
        _ => false,
    };
    if !ok {
        warn!(path = %req.uri().path(), "unauthorized request");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::plain("unauthorized")),
        )
            .into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_key_is_refused() {
        assert!(ApiKey::new("   ").is_none());
    }

    #[test]
    fn compares_whole_key() {
        let k = ApiKey::new("s3cret").unwrap();
        assert!(k.matches(b"s3cret"));
        assert!(!k.matches(b"s3cre"));
        assert!(!k.matches(b"s3cret2"));
        assert!(!k.matches(b""));
    }

    #[test]
    fn debug_is_redacted() {
        let k = ApiKey::new("s3cret").unwrap();
        assert!(!format!("{k:?}").contains("s3cret"));
    }
}
