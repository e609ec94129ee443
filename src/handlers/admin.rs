use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    routing::{get, put},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    entities::user::Role,
    errors::ServiceError,
    handlers::common::RequestOrigin,
    services::slips::{DashboardStats, SlipResponse, VerifySlipRequest},
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/admin/pending-slips",
    responses(
        (status = 200, description = "Slips awaiting review, newest first", body = [SlipResponse]),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn pending_slips(
    State(state): State<AppState>,
    origin: RequestOrigin,
) -> Result<Json<Vec<SlipResponse>>, ServiceError> {
    Ok(Json(
        state.services.slips.list_pending(origin.base_url()).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/admin/all-slips",
    responses(
        (status = 200, description = "Every slip, newest first", body = [SlipResponse])
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn all_slips(
    State(state): State<AppState>,
    origin: RequestOrigin,
) -> Result<Json<Vec<SlipResponse>>, ServiceError> {
    Ok(Json(state.services.slips.list_all(origin.base_url()).await?))
}

#[utoipa::path(
    get,
    path = "/api/admin/slip/{slip_id}",
    params(("slip_id" = Uuid, Path, description = "Payment slip ID")),
    responses(
        (status = 200, description = "Slip with owner and payment", body = SlipResponse),
        (status = 404, description = "Payment slip not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn get_slip(
    State(state): State<AppState>,
    origin: RequestOrigin,
    slip_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SlipResponse>, ServiceError> {
    let Path(slip_id) = slip_id?;
    Ok(Json(
        state
            .services
            .slips
            .get_slip(slip_id, origin.base_url())
            .await?,
    ))
}

#[utoipa::path(
    put,
    path = "/api/admin/verify-slip/{slip_id}",
    params(("slip_id" = Uuid, Path, description = "Payment slip ID")),
    request_body = VerifySlipRequest,
    responses(
        (status = 200, description = "Slip reviewed and payment settled", body = SlipResponse),
        (status = 400, description = "Invalid verification status", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment slip not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Slip was already reviewed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn verify_slip(
    State(state): State<AppState>,
    admin: AuthUser,
    origin: RequestOrigin,
    slip_id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<VerifySlipRequest>, JsonRejection>,
) -> Result<Json<SlipResponse>, ServiceError> {
    let Path(slip_id) = slip_id?;
    let Json(request) = payload?;
    Ok(Json(
        state
            .services
            .slips
            .verify_slip(slip_id, request, admin.user_id, origin.base_url())
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/admin/stats",
    responses(
        (status = 200, description = "Dashboard counters", body = DashboardStats)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn stats(State(state): State<AppState>) -> Result<Json<DashboardStats>, ServiceError> {
    Ok(Json(state.services.slips.stats().await?))
}

/// `/api/admin` routes, administrators only
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/pending-slips", get(pending_slips))
        .route("/all-slips", get(all_slips))
        .route("/slip/:slip_id", get(get_slip))
        .route("/verify-slip/:slip_id", put(verify_slip))
        .route("/stats", get(stats))
        .with_role(Role::Admin)
}
