use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection},
        DefaultBodyLimit, Multipart, Path, State,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ServiceError,
    files::{parse_slip_form, SlipUploadForm},
    handlers::common::{created_response, RequestOrigin},
    services::{
        payments::{CreatePaymentRequest, CreatePaymentResponse, PaymentResponse},
        slips::{SlipResponse, SubmitSlip},
    },
    AppState,
};

/// Multipart framing allowance on top of the file size limit.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

#[utoipa::path(
    post,
    path = "/api/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Payment and order created", body = CreatePaymentResponse),
        (status = 400, description = "Validation failed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<CreatePaymentRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let Json(request) = payload?;
    let created = state
        .services
        .payments
        .create_payment(user.user_id, request)
        .await?;
    Ok(created_response(created))
}

#[utoipa::path(
    get,
    path = "/api/payments/history",
    responses(
        (status = 200, description = "Caller's payments, newest first", body = [PaymentResponse])
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn payment_history(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<PaymentResponse>>, ServiceError> {
    Ok(Json(
        state.services.payments.payment_history(user.user_id).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment details", body = PaymentResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<PaymentResponse>, ServiceError> {
    let Path(id) = id?;
    Ok(Json(
        state.services.payments.get_payment(user.user_id, id).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/payments/upload-slip",
    request_body(
        content_type = "multipart/form-data",
        description = "Fields: file (jpg, jpeg, png or pdf), paymentId, referenceNumber, amount"
    ),
    responses(
        (status = 201, description = "Slip stored and awaiting review", body = SlipResponse),
        (status = 400, description = "Invalid file or form", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "A slip already exists for this payment", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn upload_slip(
    State(state): State<AppState>,
    user: AuthUser,
    origin: RequestOrigin,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServiceError> {
    let form = parse_slip_form(multipart?, &state.uploads).await?;
    let submission = submission_from_form(form)?;
    debug!(payment_id = %submission.payment_id, "slip upload received");

    let slip = state
        .services
        .slips
        .submit_slip(user.user_id, submission, origin.base_url())
        .await?;
    Ok(created_response(slip))
}

fn submission_from_form(form: SlipUploadForm) -> Result<SubmitSlip, ServiceError> {
    let payment_id = form
        .payment_id
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::ValidationError("Payment ID is required".to_string()))?;
    let payment_id = Uuid::parse_str(&payment_id)
        .map_err(|_| ServiceError::ValidationError("Invalid payment ID".to_string()))?;

    let amount = form
        .amount
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::ValidationError("Amount is required".to_string()))?;
    let amount = Decimal::from_str(&amount)
        .map_err(|_| ServiceError::ValidationError("Amount must be a number".to_string()))?;

    Ok(SubmitSlip {
        payment_id,
        reference_number: form.reference_number.unwrap_or_default(),
        amount,
        file: form.file,
    })
}

/// `/api/payments` routes; `max_file_size` bounds the upload body.
pub fn payment_routes(max_file_size: u64) -> Router<AppState> {
    let upload_limit = usize::try_from(max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD_BYTES);

    Router::new()
        .route("/", post(create_payment))
        .route("/history", get(payment_history))
        .route("/:id", get(get_payment))
        .route(
            "/upload-slip",
            post(upload_slip).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .with_auth()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn form(payment_id: Option<&str>, amount: Option<&str>) -> SlipUploadForm {
        SlipUploadForm {
            payment_id: payment_id.map(str::to_string),
            reference_number: Some("TX-1".into()),
            amount: amount.map(str::to_string),
            file: None,
        }
    }

    #[test]
    fn form_fields_become_a_submission() {
        let id = Uuid::new_v4();
        let submission = submission_from_form(form(Some(&id.to_string()), Some("100.50"))).unwrap();
        assert_eq!(submission.payment_id, id);
        assert_eq!(submission.amount, dec!(100.50));
        assert_eq!(submission.reference_number, "TX-1");
    }

    #[test]
    fn missing_or_malformed_fields_are_rejected() {
        assert_matches!(
            submission_from_form(form(None, Some("1"))),
            Err(ServiceError::ValidationError(msg)) if msg == "Payment ID is required"
        );
        assert_matches!(
            submission_from_form(form(Some("not-a-uuid"), Some("1"))),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            submission_from_form(form(Some(&Uuid::new_v4().to_string()), Some("ten"))),
            Err(ServiceError::ValidationError(msg)) if msg == "Amount must be a number"
        );
    }
}
