use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    entities::{
        order,
        payment::{self, PaymentMethod, PaymentStatus},
    },
    errors::ServiceError,
    services::{
        identifiers,
        money::{from_minor_units, to_minor_units},
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrderItemInput {
    #[validate(length(min = 1, max = 200, message = "Item name is required"))]
    pub name: String,
    #[validate(range(min = 1, max = 10000, message = "Quantity must be at least 1"))]
    pub quantity: u32,
    #[validate(custom = "non_negative")]
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub unit_price: Decimal,
}

fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        let mut err = ValidationError::new("unit_price");
        err.message = Some("Unit price cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreatePaymentRequest {
    #[schema(value_type = f64, example = 100.0)]
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[validate(length(min = 1, max = 200, message = "Customer name is required"))]
    pub customer_name: String,
    #[validate(length(max = 32))]
    pub customer_phone: Option<String>,
    #[validate(length(min = 1, max = 500, message = "Shipping address is required"))]
    pub shipping_address: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub items: Vec<OrderItemInput>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Generated order identifier shared with the order record
    pub order_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub reference: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub shipping_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<payment::Model> for PaymentResponse {
    fn from(model: payment::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            order_id: model.order_number,
            amount: from_minor_units(model.amount_minor),
            method: model.method,
            status: model.status,
            reference: model.reference_code,
            customer_name: model.customer_name,
            customer_phone: model.customer_phone,
            shipping_address: model.shipping_address,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_amount: Decimal,
    pub shipping_address: String,
    pub payment_method: PaymentMethod,
    pub payment_id: Uuid,
    #[schema(value_type = Vec<OrderItemInput>)]
    pub items: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<order::Model> for OrderResponse {
    fn from(model: order::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            order_id: model.order_number,
            total_amount: from_minor_units(model.total_amount_minor),
            shipping_address: model.shipping_address,
            payment_method: model.payment_method,
            payment_id: model.payment_id,
            items: model.items,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentResponse {
    pub payment: PaymentResponse,
    pub order: OrderResponse,
}

/// Payment creation and owner-scoped lookups
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
}

impl PaymentService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a payment and its mirroring order in one transaction.
    /// Cash-on-delivery payments are settled immediately; bank transfers wait
    /// for a verified slip.
    #[instrument(skip(self, request), fields(user_id = %user_id, method = %request.method))]
    pub async fn create_payment(
        &self,
        user_id: Uuid,
        request: CreatePaymentRequest,
    ) -> Result<CreatePaymentResponse, ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
        }
        let amount_minor = to_minor_units(request.amount)?;
        let items = serde_json::to_value(&request.items)
            .map_err(|e| ServiceError::InternalError(format!("Failed to encode items: {}", e)))?;

        let now = Utc::now();
        let payment_id = Uuid::new_v4();
        let order_number = identifiers::order_number();
        let shipping_address = request.shipping_address.trim().to_string();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for payment creation");
            ServiceError::DatabaseError(e)
        })?;

        let payment = payment::ActiveModel {
            id: Set(payment_id),
            user_id: Set(user_id),
            order_number: Set(order_number.clone()),
            amount_minor: Set(amount_minor),
            method: Set(request.method),
            status: Set(request.method.initial_status()),
            reference_code: Set(identifiers::payment_reference()),
            customer_name: Set(request.customer_name.trim().to_string()),
            customer_phone: Set(request
                .customer_phone
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())),
            shipping_address: Set(shipping_address.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            order_number: Set(order_number),
            total_amount_minor: Set(amount_minor),
            shipping_address: Set(shipping_address),
            payment_method: Set(request.method),
            payment_id: Set(payment_id),
            items: Set(items),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, payment_id = %payment_id, "Failed to commit payment creation");
            ServiceError::DatabaseError(e)
        })?;

        counter!("slipcheck.payments.created", 1);
        info!(payment_id = %payment.id, status = %payment.status, "payment created");

        Ok(CreatePaymentResponse {
            payment: payment.into(),
            order: order.into(),
        })
    }

    /// Caller's payments, newest first
    pub async fn payment_history(&self, user_id: Uuid) -> Result<Vec<PaymentResponse>, ServiceError> {
        let payments = payment::Entity::find()
            .filter(payment::Column::UserId.eq(user_id))
            .order_by_desc(payment::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(payments.into_iter().map(PaymentResponse::from).collect())
    }

    /// Resolves a payment owned by `user_id`; someone else's payment is
    /// indistinguishable from a missing one.
    pub async fn find_owned(
        &self,
        user_id: Uuid,
        payment_id: Uuid,
    ) -> Result<payment::Model, ServiceError> {
        payment::Entity::find_by_id(payment_id)
            .filter(payment::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))
    }

    pub async fn get_payment(
        &self,
        user_id: Uuid,
        payment_id: Uuid,
    ) -> Result<PaymentResponse, ServiceError> {
        self.find_owned(user_id, payment_id).await.map(Into::into)
    }

    /// The order created alongside a payment
    pub async fn order_for_payment(&self, payment_id: Uuid) -> Result<OrderResponse, ServiceError> {
        order::Entity::find()
            .filter(order::Column::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }
}
