//! Bearer token authentication for lease-scoped routes.

use axum::extract::{Path, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use tracing::debug;

use super::AppState;

/// Token from `Authorization: Bearer <token>`. A bare header value is taken
/// as the token itself.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

/// Resolve the `{domain}` path segment to a lease owned by the caller.
///
/// On success the [`Domain`](crate::model::Domain) is placed in the request
/// extensions for handlers and inner layers.
pub async fn require_lease(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Response {
    let fqdn = params.get("domain").map(String::as_str).unwrap_or_default();
    let token = bearer_token(request.headers());

    match state.service.authenticate(fqdn, token).await {
        Ok(domain) => {
            request.extensions_mut().insert(domain);
            next.run(request).await
        }
        Err(e) => {
            debug!(domain = %fqdn, error = %e, "rejected lease credentials");
            e.into_response()
        }
    }
}
