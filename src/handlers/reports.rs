use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};

use crate::{
    auth::AuthRouterExt,
    entities::user::Role,
    errors::ServiceError,
    services::reports::{FinancialReport, ReportQuery},
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/reports/financial",
    params(ReportQuery),
    responses(
        (status = 200, description = "Completed payments grouped by period", body = FinancialReport),
        (status = 400, description = "Unknown timeRange or malformed date", body = crate::errors::ErrorResponse),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn financial_report(
    State(state): State<AppState>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Json<FinancialReport>, ServiceError> {
    let Query(query) = query?;
    Ok(Json(state.services.reports.financial_report(query).await?))
}

/// `/api/reports` routes, administrators only
pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/financial", get(financial_report))
        .with_role(Role::Admin)
}
