use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{hash_password, verify_password, AuthService},
    entities::user::{self, Role},
    errors::ServiceError,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterRequest {
    #[validate(email(message = "Please provide a valid email"))]
    pub email: String,
    #[validate(length(min = 6, max = 128, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "Last name is required"))]
    pub last_name: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Returned by register and both login endpoints
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub token: String,
}

/// Public view of a user; never carries the password hash
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<user::Model> for UserResponse {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            first_name: model.first_name,
            last_name: model.last_name,
            phone: model.phone,
            address: model.address,
            role: model.role,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Input for provisioning an administrator outside the HTTP surface
#[derive(Debug, Clone)]
pub struct NewAdmin {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    /// Promote an existing account instead of failing
    pub promote_existing: bool,
}

struct NewUser<'a> {
    email: String,
    password: &'a str,
    first_name: String,
    last_name: String,
    phone: Option<String>,
    address: Option<String>,
    role: Role,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Account registration, credential checks and profile lookup
#[derive(Clone)]
pub struct UserService {
    db: Arc<DatabaseConnection>,
    auth: Arc<AuthService>,
}

impl UserService {
    pub fn new(db: Arc<DatabaseConnection>, auth: Arc<AuthService>) -> Self {
        Self { db, auth }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<user::Model>, ServiceError> {
        Ok(user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(&*self.db)
            .await?)
    }

    fn auth_response(&self, user: &user::Model) -> Result<AuthResponse, ServiceError> {
        let token = self.auth.generate_token(user)?;
        Ok(AuthResponse {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
            token,
        })
    }

    async fn insert_user(&self, new_user: NewUser<'_>) -> Result<user::Model, ServiceError> {
        let now = Utc::now();
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(new_user.email),
            password_hash: Set(hash_password(new_user.password)?),
            first_name: Set(new_user.first_name),
            last_name: Set(new_user.last_name),
            phone: Set(new_user.phone),
            address: Set(new_user.address),
            role: Set(new_user.role),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model.insert(&*self.db).await.map_err(|e| {
            let err = ServiceError::from(e);
            if err.is_unique_violation() {
                // Lost a race with a concurrent registration for the same email.
                ServiceError::ValidationError("User already exists".to_string())
            } else {
                err
            }
        })
    }

    /// Creates a regular account and signs the caller in
    #[instrument(skip(self, request))]
    pub async fn register(&self, mut request: RegisterRequest) -> Result<AuthResponse, ServiceError> {
        request.email = normalize_email(&request.email);
        request.first_name = request.first_name.trim().to_string();
        request.last_name = request.last_name.trim().to_string();
        request.validate()?;

        if self.find_by_email(&request.email).await?.is_some() {
            return Err(ServiceError::ValidationError(
                "User already exists".to_string(),
            ));
        }

        let user = self
            .insert_user(NewUser {
                email: request.email,
                password: &request.password,
                first_name: request.first_name,
                last_name: request.last_name,
                phone: blank_to_none(request.phone),
                address: blank_to_none(request.address),
                role: Role::User,
            })
            .await?;

        info!(user_id = %user.id, "user registered");
        self.auth_response(&user)
    }

    /// Authenticates any account
    #[instrument(skip(self, request))]
    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, ServiceError> {
        request.validate()?;
        let user = self
            .check_credentials(&request)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid email or password".to_string()))?;
        self.auth_response(&user)
    }

    /// Authenticates administrators only; regular accounts get the same
    /// answer as a wrong password
    #[instrument(skip(self, request))]
    pub async fn admin_login(&self, request: LoginRequest) -> Result<AuthResponse, ServiceError> {
        request.validate()?;
        let user = self
            .check_credentials(&request)
            .await?
            .filter(user::Model::is_admin)
            .ok_or_else(|| ServiceError::Unauthorized("Invalid admin credentials".to_string()))?;
        self.auth_response(&user)
    }

    async fn check_credentials(
        &self,
        request: &LoginRequest,
    ) -> Result<Option<user::Model>, ServiceError> {
        let email = normalize_email(&request.email);
        let user = match self.find_by_email(&email).await? {
            Some(user) => user,
            None => return Ok(None),
        };
        if verify_password(&request.password, &user.password_hash) {
            Ok(Some(user))
        } else {
            warn!(user_id = %user.id, "password mismatch");
            Ok(None)
        }
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<UserResponse, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .map(UserResponse::from)
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }

    /// Creates an administrator account, or promotes an existing one when asked
    #[instrument(skip(self, admin), fields(email = %admin.email))]
    pub async fn create_admin(&self, admin: NewAdmin) -> Result<UserResponse, ServiceError> {
        let email = normalize_email(&admin.email);
        if !validator::validate_email(email.as_str()) {
            return Err(ServiceError::ValidationError(
                "Please provide a valid email".to_string(),
            ));
        }
        if admin.password.len() < 6 {
            return Err(ServiceError::ValidationError(
                "Password must be at least 6 characters".to_string(),
            ));
        }

        if let Some(existing) = self.find_by_email(&email).await? {
            if !admin.promote_existing {
                return Err(ServiceError::ValidationError(
                    "User already exists".to_string(),
                ));
            }
            let mut active = existing.into_active_model();
            active.role = Set(Role::Admin);
            active.password_hash = Set(hash_password(&admin.password)?);
            active.updated_at = Set(Utc::now());
            let updated = active.update(&*self.db).await?;
            info!(user_id = %updated.id, "existing user promoted to admin");
            return Ok(updated.into());
        }

        let created = self
            .insert_user(NewUser {
                email,
                password: &admin.password,
                first_name: admin.first_name,
                last_name: admin.last_name,
                phone: None,
                address: None,
                role: Role::Admin,
            })
            .await?;
        info!(user_id = %created.id, "admin user created");
        Ok(created.into())
    }
}
