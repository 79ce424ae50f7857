//! HTTP API.
//!
//! ```text
//! POST   /v1/domains                                  create a lease (rate limited per IP)
//! GET    /v1/domains/{domain}                         lease lookup
//! POST   /v1/domains/{domain}/records                 create or update a record
//! DELETE /v1/domains/{domain}/records/{record}        delete a record
//! POST   /v1/domains/{domain}/renew                   renew lease, report drift
//! POST   /v1/domains/{domain}/purgerecords            delete every record of the lease
//! GET    /, /healthz                                  name and version
//! ```
//!
//! Lease routes require the lease's bearer token. Mutating lease routes are
//! rate limited per domain.

pub mod auth;
pub mod rate_limit;

use axum::extract::rejection::JsonRejection;
use axum::extract::{MatchedPath, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::config::ApiConfig;
use crate::error::LeaseError;
use crate::metrics::{self, Timer};
use crate::model::{Domain, DomainResponse, RecordRequest, RecordResponse, RenewRequest, RenewResponse};
use crate::service::LeaseService;
use rate_limit::RateLimiter;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Lease use cases.
    pub service: LeaseService,
    /// Per-IP limiter for unauthenticated routes.
    pub unauthed_limiter: Arc<RateLimiter>,
    /// Per-domain limiter for authenticated routes.
    pub authed_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Build state with limiters configured from `config`.
    pub fn new(service: LeaseService, config: &ApiConfig) -> Self {
        let window = config.rate_limit_interval();
        Self {
            service,
            unauthed_limiter: Arc::new(RateLimiter::new(
                config.unauthed_rate_limit,
                window,
                config.rate_limit_enabled,
            )),
            authed_limiter: Arc::new(RateLimiter::new(
                config.authed_rate_limit,
                window,
                config.rate_limit_enabled,
            )),
        }
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    let create = Router::new()
        .route("/v1/domains", post(create_domain))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_by_ip,
        ));

    // route_layer wraps inside-out: the last one added runs first, so
    // credentials are checked before a domain's request budget is spent.
    let mutate = Router::new()
        .route("/v1/domains/{domain}/records", post(create_record))
        .route("/v1/domains/{domain}/records/{record}", delete(delete_record))
        .route("/v1/domains/{domain}/renew", post(renew))
        .route("/v1/domains/{domain}/purgerecords", post(purge_records))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_by_domain,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_lease,
        ));

    let lookup = Router::new()
        .route("/v1/domains/{domain}", get(get_domain))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_lease,
        ));

    Router::new()
        .route("/", get(root))
        .route("/healthz", get(root))
        .merge(create)
        .merge(mutate)
        .merge(lookup)
        .layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// JSON error body `{status, msg, data?}`.
pub(crate) fn error_response(status: StatusCode, msg: String, data: Option<Value>) -> Response {
    let body = ErrorBody {
        status: status.as_u16(),
        msg,
        data,
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for LeaseError {
    fn into_response(self) -> Response {
        let status = match &self {
            LeaseError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LeaseError::Forbidden { .. } => StatusCode::FORBIDDEN,
            LeaseError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if self.is_client_error() {
            debug!(status = status.as_u16(), error = %self, "request rejected");
        } else {
            error!(status = status.as_u16(), error = %self, "request failed");
        }

        let data = match &self {
            LeaseError::Forbidden { domain_unknown } => {
                Some(json!({ "domainUnknown": domain_unknown }))
            }
            _ => None,
        };
        error_response(status, self.to_string(), data)
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, LeaseError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| LeaseError::Validation(e.body_text()))
}

async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let timer = Timer::start();
    let response = next.run(request).await;
    metrics::record_request(&route, response.status().as_u16(), timer.elapsed());
    response
}

#[derive(Debug, Serialize)]
struct VersionInfo {
    name: &'static str,
    version: &'static str,
}

async fn root() -> Json<VersionInfo> {
    Json(VersionInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn create_domain(State(state): State<AppState>) -> Result<Json<DomainResponse>, LeaseError> {
    Ok(Json(state.service.create_domain().await?))
}

async fn get_domain(Extension(domain): Extension<Domain>) -> Json<DomainResponse> {
    Json(DomainResponse {
        name: domain.fqdn,
        token: None,
    })
}

async fn create_record(
    State(state): State<AppState>,
    Extension(domain): Extension<Domain>,
    payload: Result<Json<RecordRequest>, JsonRejection>,
) -> Result<Json<RecordResponse>, LeaseError> {
    let input = json_body(payload)?;
    Ok(Json(state.service.create_record(&domain, input).await?))
}

async fn delete_record(
    State(state): State<AppState>,
    Extension(domain): Extension<Domain>,
    Path((_, record)): Path<(String, String)>,
) -> Result<StatusCode, LeaseError> {
    state.service.delete_record(&domain, &record).await?;
    Ok(StatusCode::OK)
}

async fn renew(
    State(state): State<AppState>,
    Extension(domain): Extension<Domain>,
    payload: Result<Json<RenewRequest>, JsonRejection>,
) -> Result<Json<RenewResponse>, LeaseError> {
    let input = json_body(payload)?;
    Ok(Json(state.service.renew(&domain, input.records).await?))
}

async fn purge_records(
    State(state): State<AppState>,
    Extension(domain): Extension<Domain>,
) -> Result<StatusCode, LeaseError> {
    state.service.purge_records(&domain).await?;
    Ok(StatusCode::OK)
}
