use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Alias, Expr}, ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        payment::{self, PaymentMethod, PaymentStatus},
        payment_slip::{self, SlipStatus},
        user,
    },
    errors::ServiceError,
    files::{StagedFile, UploadStore},
    services::{
        identifiers,
        money::{from_minor_units, to_minor_units},
        payments::PaymentResponse,
    },
};

/// Slip submission after the multipart form has been parsed
#[derive(Debug)]
pub struct SubmitSlip {
    pub payment_id: Uuid,
    pub reference_number: String,
    pub amount: Decimal,
    pub file: Option<StagedFile>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerifySlipRequest {
    /// `verified` or `rejected`
    #[schema(example = "verified")]
    pub status: String,
    #[validate(length(max = 1000))]
    pub remarks: Option<String>,
}

/// Owner summary embedded in admin slip views
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlipOwner {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl From<user::Model> for SlipOwner {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            first_name: model.first_name,
            last_name: model.last_name,
            email: model.email,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlipResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_id: Uuid,
    pub slip_code: String,
    pub reference_number: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub amount: Decimal,
    pub file_name: String,
    /// Absolute URL of the stored file
    pub file_url: String,
    pub status: SlipStatus,
    pub admin_remarks: Option<String>,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SlipOwner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentResponse>,
}

impl SlipResponse {
    fn new(model: payment_slip::Model, base_url: &str) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            payment_id: model.payment_id,
            slip_code: model.slip_code,
            reference_number: model.reference_number,
            amount: from_minor_units(model.amount_minor),
            file_name: model.file_name,
            file_url: absolute_url(base_url, &model.file_url),
            status: model.status,
            admin_remarks: model.admin_remarks,
            verified_by: model.verified_by,
            verified_at: model.verified_at,
            created_at: model.created_at,
            user: None,
            payment: None,
        }
    }

    fn with_payment(mut self, payment: Option<payment::Model>) -> Self {
        self.payment = payment.map(PaymentResponse::from);
        self
    }

    fn with_owner(mut self, owner: Option<user::Model>) -> Self {
        self.user = owner.map(SlipOwner::from);
        self
    }
}

/// Admin dashboard counters
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: u64,
    pub total_payments: u64,
    /// Sum of completed payments
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_revenue: Decimal,
    pub pending_slips: u64,
}

/// Joins a base like `https://host` with a stored `/uploads/...` path.
pub fn absolute_url(base_url: &str, relative: &str) -> String {
    if relative.starts_with("http://") || relative.starts_with("https://") {
        return relative.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

fn parse_decision(raw: &str) -> Result<SlipStatus, ServiceError> {
    match raw.trim() {
        "verified" => Ok(SlipStatus::Verified),
        "rejected" => Ok(SlipStatus::Rejected),
        _ => Err(ServiceError::BadRequest(
            "Invalid verification status".to_string(),
        )),
    }
}

/// Slip submission, admin review and the queries around them
#[derive(Clone)]
pub struct SlipService {
    db: Arc<DatabaseConnection>,
    uploads: Arc<UploadStore>,
}

impl SlipService {
    pub fn new(db: Arc<DatabaseConnection>, uploads: Arc<UploadStore>) -> Self {
        Self { db, uploads }
    }

    /// Attaches a payment slip to a bank-transfer payment owned by `user_id`.
    ///
    /// The file is written only after ownership and duplicate checks pass, and
    /// is removed again if the database write fails.
    #[instrument(skip(self, submission, base_url), fields(payment_id = %submission.payment_id))]
    pub async fn submit_slip(
        &self,
        user_id: Uuid,
        submission: SubmitSlip,
        base_url: &str,
    ) -> Result<SlipResponse, ServiceError> {
        let payment = payment::Entity::find_by_id(submission.payment_id)
            .filter(payment::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))?;

        if let Some(existing) = payment_slip::Entity::find()
            .filter(payment_slip::Column::PaymentId.eq(payment.id))
            .one(&*self.db)
            .await?
        {
            return Err(ServiceError::DuplicateSlip {
                slip_id: existing.id,
            });
        }

        if payment.method == PaymentMethod::Cod {
            return Err(ServiceError::ValidationError(
                "Payment slips are only accepted for bank transfer payments".to_string(),
            ));
        }

        let file = submission
            .file
            .ok_or_else(|| ServiceError::BadRequest("Please upload a file".to_string()))?;

        let reference_number = submission.reference_number.trim().to_string();
        if reference_number.is_empty() {
            return Err(ServiceError::ValidationError(
                "Reference number is required".to_string(),
            ));
        }
        let amount_minor = to_minor_units(submission.amount)?;

        let stored = self.uploads.store(&file).await?;

        let slip = match self
            .insert_slip(
                &payment,
                user_id,
                reference_number,
                amount_minor,
                file.original_name,
                stored.url.clone(),
            )
            .await
        {
            Ok(slip) => slip,
            Err(err) => {
                self.uploads.discard(&stored).await;
                if err.is_unique_violation() {
                    // A concurrent submission for the same payment won the race.
                    return Err(self.duplicate_of(payment.id).await);
                }
                return Err(err);
            }
        };

        counter!("slipcheck.slips.submitted", 1);
        info!(slip_id = %slip.id, slip_code = %slip.slip_code, "payment slip submitted");

        Ok(SlipResponse::new(slip, base_url))
    }

    async fn insert_slip(
        &self,
        payment: &payment::Model,
        user_id: Uuid,
        reference_number: String,
        amount_minor: i64,
        file_name: String,
        file_url: String,
    ) -> Result<payment_slip::Model, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let slip = payment_slip::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            payment_id: Set(payment.id),
            slip_code: Set(identifiers::slip_code()),
            reference_number: Set(reference_number),
            amount_minor: Set(amount_minor),
            file_name: Set(file_name),
            file_url: Set(file_url),
            status: Set(SlipStatus::Pending),
            admin_remarks: Set(None),
            verified_by: Set(None),
            verified_at: Set(None),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        set_payment_status(&txn, payment.id, PaymentStatus::Pending, now).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, payment_id = %payment.id, "Failed to commit slip submission");
            ServiceError::DatabaseError(e)
        })?;
        Ok(slip)
    }

    async fn duplicate_of(&self, payment_id: Uuid) -> ServiceError {
        match payment_slip::Entity::find()
            .filter(payment_slip::Column::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await
        {
            Ok(Some(existing)) => ServiceError::DuplicateSlip {
                slip_id: existing.id,
            },
            Ok(None) => ServiceError::Conflict(
                "A payment slip has already been uploaded for this payment".to_string(),
            ),
            Err(e) => ServiceError::DatabaseError(e),
        }
    }

    /// Moves a pending slip to `verified` or `rejected` and settles its payment.
    /// Only one review can win; a slip that is already terminal is refused.
    #[instrument(skip(self, request, base_url), fields(slip_id = %slip_id, admin_id = %admin_id))]
    pub async fn verify_slip(
        &self,
        slip_id: Uuid,
        request: VerifySlipRequest,
        admin_id: Uuid,
        base_url: &str,
    ) -> Result<SlipResponse, ServiceError> {
        let slip = self.find_slip(slip_id).await?;
        let decision = parse_decision(&request.status)?;
        request.validate()?;

        let remarks = request
            .remarks
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        let now = Utc::now();

        let txn = self.db.begin().await?;

        let updated = payment_slip::Entity::update_many()
            .col_expr(payment_slip::Column::Status, Expr::value(decision.to_value()))
            .col_expr(payment_slip::Column::AdminRemarks, Expr::value(remarks))
            .col_expr(payment_slip::Column::VerifiedBy, Expr::value(Some(admin_id)))
            .col_expr(payment_slip::Column::VerifiedAt, Expr::value(Some(now)))
            .filter(payment_slip::Column::Id.eq(slip_id))
            .filter(payment_slip::Column::Status.eq(SlipStatus::Pending))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            txn.rollback().await?;
            let current = self.find_slip(slip_id).await?;
            warn!(status = %current.status, "slip already reviewed");
            return Err(ServiceError::Conflict(format!(
                "Payment slip has already been {}",
                current.status
            )));
        }

        set_payment_status(&txn, slip.payment_id, decision.payment_status(), now).await?;

        let reviewed = payment_slip::Entity::find_by_id(slip_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment slip not found".to_string()))?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit slip verification");
            ServiceError::DatabaseError(e)
        })?;

        counter!("slipcheck.slips.reviewed", 1, "decision" => decision.to_string());
        info!(decision = %decision, payment_id = %slip.payment_id, "payment slip reviewed");

        let payment = payment::Entity::find_by_id(reviewed.payment_id)
            .one(&*self.db)
            .await?;
        Ok(SlipResponse::new(reviewed, base_url).with_payment(payment))
    }

    /// Raw slip record; used by the download handler for authorization.
    pub async fn find_slip(&self, slip_id: Uuid) -> Result<payment_slip::Model, ServiceError> {
        payment_slip::Entity::find_by_id(slip_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment slip not found".to_string()))
    }

    pub async fn get_slip(
        &self,
        slip_id: Uuid,
        base_url: &str,
    ) -> Result<SlipResponse, ServiceError> {
        let mut slips = self
            .load_details(
                payment_slip::Entity::find().filter(payment_slip::Column::Id.eq(slip_id)),
                base_url,
            )
            .await?;
        slips
            .pop()
            .ok_or_else(|| ServiceError::NotFound("Payment slip not found".to_string()))
    }

    /// Slips awaiting review, newest first
    pub async fn list_pending(&self, base_url: &str) -> Result<Vec<SlipResponse>, ServiceError> {
        self.load_details(
            payment_slip::Entity::find()
                .filter(payment_slip::Column::Status.eq(SlipStatus::Pending)),
            base_url,
        )
        .await
    }

    pub async fn list_all(&self, base_url: &str) -> Result<Vec<SlipResponse>, ServiceError> {
        self.load_details(payment_slip::Entity::find(), base_url)
            .await
    }

    async fn load_details(
        &self,
        query: Select<payment_slip::Entity>,
        base_url: &str,
    ) -> Result<Vec<SlipResponse>, ServiceError> {
        let rows = query
            .order_by_desc(payment_slip::Column::CreatedAt)
            .find_also_related(user::Entity)
            .all(&*self.db)
            .await?;

        let payment_ids: Vec<Uuid> = rows.iter().map(|(slip, _)| slip.payment_id).collect();
        let mut payments: HashMap<Uuid, payment::Model> = if payment_ids.is_empty() {
            HashMap::new()
        } else {
            payment::Entity::find()
                .filter(payment::Column::Id.is_in(payment_ids))
                .all(&*self.db)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect()
        };

        Ok(rows
            .into_iter()
            .map(|(slip, owner)| {
                let payment = payments.remove(&slip.payment_id);
                SlipResponse::new(slip, base_url)
                    .with_owner(owner)
                    .with_payment(payment)
            })
            .collect())
    }

    /// Counters for the admin dashboard
    pub async fn stats(&self) -> Result<DashboardStats, ServiceError> {
        let total_users = user::Entity::find().count(&*self.db).await?;
        let total_payments = payment::Entity::find().count(&*self.db).await?;
        let pending_slips = payment_slip::Entity::find()
            .filter(payment_slip::Column::Status.eq(SlipStatus::Pending))
            .count(&*self.db)
            .await?;

        // SUM is NULL over an empty set; the database reports an overflow as an error.
        let revenue_minor: Option<i64> = payment::Entity::find()
            .select_only()
            .column_as(
                Expr::col(payment::Column::AmountMinor)
                    .sum()
                    .cast_as(Alias::new("BIGINT")),
                "revenue_minor",
            )
            .filter(payment::Column::Status.eq(PaymentStatus::Completed))
            .into_tuple::<Option<i64>>()
            .one(&*self.db)
            .await?
            .flatten();

        Ok(DashboardStats {
            total_users,
            total_payments,
            total_revenue: from_minor_units(revenue_minor.unwrap_or(0)),
            pending_slips,
        })
    }

    /// Repairs payments whose status disagrees with their reviewed slip,
    /// e.g. after a crash between the two writes of an older release.
    /// Returns the number of payments fixed.
    #[instrument(skip(self))]
    pub async fn reconcile_payment_statuses(&self) -> Result<u64, ServiceError> {
        let reviewed = payment_slip::Entity::find()
            .filter(payment_slip::Column::Status.ne(SlipStatus::Pending))
            .find_also_related(payment::Entity)
            .all(&*self.db)
            .await?;

        let mut repaired = 0u64;
        for (slip, payment) in reviewed {
            let Some(payment) = payment else {
                warn!(slip_id = %slip.id, "reviewed slip has no payment");
                continue;
            };
            let expected = slip.status.payment_status();
            if payment.status == expected {
                continue;
            }

            warn!(
                payment_id = %payment.id,
                current = %payment.status,
                expected = %expected,
                "repairing payment status"
            );
            let txn = self.db.begin().await?;
            set_payment_status(&txn, payment.id, expected, Utc::now()).await?;
            txn.commit().await?;
            repaired += 1;
        }

        if repaired > 0 {
            counter!("slipcheck.payments.reconciled", repaired);
        }
        info!(repaired, "payment status reconciliation finished");
        Ok(repaired)
    }
}

async fn set_payment_status(
    txn: &DatabaseTransaction,
    payment_id: Uuid,
    status: PaymentStatus,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let result = payment::Entity::update_many()
        .col_expr(payment::Column::Status, Expr::value(status.to_value()))
        .col_expr(payment::Column::UpdatedAt, Expr::value(now))
        .filter(payment::Column::Id.eq(payment_id))
        .exec(txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound("Payment not found".to_string()));
    }
    Ok(())
}
