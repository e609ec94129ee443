use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "SlipCheck API",
        version = "0.1.0",
        description = r#"
# SlipCheck Payment Verification API

Customers create payments (cash on delivery or bank transfer), upload a scanned
payment slip for bank transfers, and administrators review slips and read
financial reports.

## Authentication

Protected endpoints expect an HS256 bearer token obtained from `/api/auth/login`
or `/api/auth/admin/login`:

```
Authorization: Bearer <your-jwt-token>
```

`/uploads/*` additionally accepts `?token=`; it is only logged, never required.

## Error Handling

Every error uses the same body:

```json
{
  "error": "Conflict",
  "message": "A payment slip has already been uploaded for this payment",
  "details": { "slipId": "2c1f..." },
  "request_id": "7b7e...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:5000", description = "Local development")
    ),
    tags(
        (name = "Auth", description = "Registration, login and the current user"),
        (name = "Payments", description = "Payments, orders and slip uploads"),
        (name = "Admin", description = "Slip review and dashboard counters"),
        (name = "Reports", description = "Financial reports"),
        (name = "Downloads", description = "Authenticated file downloads"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::admin_login,
        crate::handlers::auth::me,

        crate::handlers::payments::create_payment,
        crate::handlers::payments::payment_history,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::upload_slip,

        crate::handlers::admin::pending_slips,
        crate::handlers::admin::all_slips,
        crate::handlers::admin::get_slip,
        crate::handlers::admin::verify_slip,
        crate::handlers::admin::stats,

        crate::handlers::reports::financial_report,

        crate::handlers::downloads::download_slip,
        crate::handlers::downloads::download_file,

        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::entities::user::Role,
            crate::entities::payment::PaymentMethod,
            crate::entities::payment::PaymentStatus,
            crate::entities::payment_slip::SlipStatus,

            crate::services::users::RegisterRequest,
            crate::services::users::LoginRequest,
            crate::services::users::AuthResponse,
            crate::services::users::UserResponse,

            crate::services::payments::OrderItemInput,
            crate::services::payments::CreatePaymentRequest,
            crate::services::payments::PaymentResponse,
            crate::services::payments::OrderResponse,
            crate::services::payments::CreatePaymentResponse,

            crate::services::slips::SlipOwner,
            crate::services::slips::SlipResponse,
            crate::services::slips::VerifySlipRequest,
            crate::services::slips::DashboardStats,

            crate::services::reports::PeriodTotals,
            crate::services::reports::FinancialReport,

            crate::handlers::health::HealthResponse,

            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
