use axum::{
    extract::{rejection::JsonRejection, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};

use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::common::created_response,
    services::users::{AuthResponse, LoginRequest, RegisterRequest, UserResponse},
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Validation failed or email taken", body = crate::errors::ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let Json(request) = payload?;
    let response = state.services.users.register(request).await?;
    Ok(created_response(response))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid email or password", body = crate::errors::ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ServiceError> {
    let Json(request) = payload?;
    Ok(Json(state.services.users.login(request).await?))
}

#[utoipa::path(
    post,
    path = "/api/auth/admin/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in as administrator", body = AuthResponse),
        (status = 401, description = "Invalid admin credentials", body = crate::errors::ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn admin_login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ServiceError> {
    let Json(request) = payload?;
    Ok(Json(state.services.users.admin_login(request).await?))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UserResponse>, ServiceError> {
    Ok(Json(state.services.users.get_user(user.user_id).await?))
}

/// `/api/auth` routes
pub fn auth_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/admin/login", post(admin_login));

    let protected = Router::new().route("/me", get(me)).with_auth();

    public.merge(protected)
}
