pub mod admin;
pub mod auth;
pub mod common;
pub mod downloads;
pub mod health;
pub mod payments;
pub mod reports;

use std::sync::Arc;

use crate::{
    auth::AuthService,
    db::DbPool,
    files::UploadStore,
    services::{
        payments::PaymentService, reports::ReportService, slips::SlipService, users::UserService,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub users: Arc<UserService>,
    pub payments: Arc<PaymentService>,
    pub slips: Arc<SlipService>,
    pub reports: Arc<ReportService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        auth_service: Arc<AuthService>,
        uploads: Arc<UploadStore>,
    ) -> Self {
        Self {
            users: Arc::new(UserService::new(db_pool.clone(), auth_service)),
            payments: Arc::new(PaymentService::new(db_pool.clone())),
            slips: Arc::new(SlipService::new(db_pool.clone(), uploads)),
            reports: Arc::new(ReportService::new(db_pool)),
        }
    }
}
