//! File delivery: authenticated downloads by slip or by path, and the
//! lower-trust `/uploads` static route.

use axum::{
    extract::{rejection::PathRejection, Path, Query, Request, State},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    handlers::common::{serve_file, Disposition},
    AppState,
};

fn file_name_of(relative: &str) -> &str {
    relative
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or("download")
}

#[utoipa::path(
    get,
    path = "/api/download/payment-slip/{slip_id}",
    params(("slip_id" = Uuid, Path, description = "Payment slip ID")),
    responses(
        (status = 200, description = "Slip file as an attachment"),
        (status = 403, description = "Not the owner and not an administrator", body = crate::errors::ErrorResponse),
        (status = 404, description = "Slip or file not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Downloads"
)]
pub async fn download_slip(
    State(state): State<AppState>,
    user: AuthUser,
    slip_id: Result<Path<Uuid>, PathRejection>,
    request: Request,
) -> Result<Response, ServiceError> {
    let Path(slip_id) = slip_id?;
    let slip = state.services.slips.find_slip(slip_id).await?;

    if !user.can_access(slip.user_id) {
        warn!(user_id = %user.user_id, %slip_id, "slip download denied");
        return Err(ServiceError::Forbidden(
            "You do not have permission to download this file".to_string(),
        ));
    }

    let path = state.uploads.path_for_url(&slip.file_url)?;
    state
        .uploads
        .check_file(&path, "File not found on server")
        .await?;

    info!(user_id = %user.user_id, %slip_id, "serving payment slip");
    serve_file(path, request, Disposition::Attachment, &slip.file_name, None).await
}

#[utoipa::path(
    get,
    path = "/api/download/file/{path}",
    params(("path" = String, Path, description = "Path relative to the upload root")),
    responses(
        (status = 200, description = "File as an attachment"),
        (status = 400, description = "Not a valid file", body = crate::errors::ErrorResponse),
        (status = 403, description = "Path escapes the upload root", body = crate::errors::ErrorResponse),
        (status = 404, description = "File not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Downloads"
)]
pub async fn download_file(
    State(state): State<AppState>,
    user: AuthUser,
    relative: Result<Path<String>, PathRejection>,
    request: Request,
) -> Result<Response, ServiceError> {
    let Path(relative) = relative?;
    let path = state.uploads.locate(&relative).await?;

    info!(user_id = %user.user_id, path = %relative, "serving file download");
    serve_file(
        path,
        request,
        Disposition::Attachment,
        file_name_of(&relative),
        None,
    )
    .await
}

#[derive(Debug, Default, Deserialize)]
pub struct StaticFileQuery {
    pub token: Option<String>,
    pub download: Option<String>,
}

/// Serves stored uploads inline (or as an attachment with `?download=true`).
/// A token, when present, is resolved for logging only; a bad one does not
/// block the response.
pub async fn serve_upload(
    State(state): State<AppState>,
    relative: Result<Path<String>, PathRejection>,
    query: Option<Query<StaticFileQuery>>,
    request: Request,
) -> Result<Response, ServiceError> {
    let Path(relative) = relative?;
    let Query(query) = query.unwrap_or_default();

    let viewer = match query.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => match state.auth.authenticate_token(token).await {
            Ok(user) => Some(user.user_id),
            Err(e) => {
                debug!(error = %e, "ignoring invalid token on static upload request");
                None
            }
        },
        None => None,
    };

    let path = state.uploads.locate(&relative).await?;
    debug!(path = %relative, viewer = ?viewer, "serving static upload");

    let disposition = if query.download.as_deref() == Some("true") {
        Disposition::Attachment
    } else {
        Disposition::Inline
    };
    serve_file(
        path,
        request,
        disposition,
        file_name_of(&relative),
        Some("no-cache"),
    )
    .await
}

/// `/api/download` routes
pub fn download_routes() -> Router<AppState> {
    Router::new()
        .route("/payment-slip/:slip_id", get(download_slip))
        .route("/file/*path", get(download_file))
        .with_auth()
}

/// `/uploads` static route
pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/*path", get(serve_upload))
}
