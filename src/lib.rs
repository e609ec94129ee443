//! SlipCheck API Library
//!
//! Payments with cash-on-delivery or bank transfer, payment-slip uploads,
//! administrator review of slips and financial reporting over an HTTP JSON API.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod files;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{http::HeaderValue, routing::get, Extension, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};

use crate::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    files::UploadStore,
    handlers::AppServices,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub auth: Arc<AuthService>,
    pub uploads: Arc<UploadStore>,
    pub services: AppServices,
}

impl AppState {
    /// Wires the auth service, upload store and domain services around a pool.
    pub fn new(db: Arc<DatabaseConnection>, config: AppConfig) -> Self {
        let auth = Arc::new(AuthService::new(AuthConfig::from(&config), db.clone()));
        let uploads = Arc::new(UploadStore::new(
            config.upload_root(),
            config.max_file_size_bytes,
        ));
        let services = AppServices::new(db.clone(), auth.clone(), uploads.clone());
        Self {
            db,
            config,
            auth,
            uploads,
            services,
        }
    }
}

/// CORS from configuration: explicit origins, permissive in development or
/// when opted in, same-origin only otherwise.
pub fn cors_layer(cfg: &AppConfig) -> CorsLayer {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        ::tracing::info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        CorsLayer::permissive()
    } else {
        ::tracing::warn!("No CORS origins configured; cross-origin requests will be refused");
        CorsLayer::new()
    }
}

async fn route_not_found() -> errors::ServiceError {
    errors::ServiceError::NotFound("Route not found".to_string())
}

/// Full application router with every middleware layer applied.
pub fn build_router(state: AppState) -> Router {
    let max_file_size = state.config.max_file_size_bytes;
    let cors = cors_layer(&state.config);
    let auth = state.auth.clone();

    Router::<AppState>::new()
        .route("/", get(|| async { "slipcheck-api up" }))
        .nest("/health", handlers::health::health_routes())
        .nest("/api/auth", handlers::auth::auth_routes())
        .nest(
            "/api/payments",
            handlers::payments::payment_routes(max_file_size),
        )
        .nest("/api/admin", handlers::admin::admin_routes())
        .nest("/api/reports", handlers::reports::report_routes())
        .nest("/api/download", handlers::downloads::download_routes())
        .nest("/uploads", handlers::downloads::upload_routes())
        .merge(openapi::swagger_ui())
        .fallback(route_not_found)
        // HTTP tracing layer for consistent request/response telemetry
        .layer(tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(axum::middleware::from_fn(
            middleware_helpers::security_headers_middleware,
        ))
        .layer(CatchPanicLayer::custom(errors::panic_response))
        // Inject AuthService into request extensions for auth middleware
        .layer(Extension(auth))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

pub mod prelude {
    pub use crate::auth::{AuthService, AuthUser};
    pub use crate::config::AppConfig;
    pub use crate::errors::{ErrorResponse, ServiceError};
    pub use crate::{build_router, AppState};
}
