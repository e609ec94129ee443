#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use slipcheck_api::{
    build_router, config::AppConfig, db, services::users::NewAdmin, AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const TEST_SECRET: &str =
    "k9P2vX7qL4mZ8rT1wY6nB3sD5fG0hJ2kQ7xC4vN9mL1pR8tW3yU6iO5aE2sD7fGh";
pub const BASE_URL: &str = "http://localhost:5000";
pub const BOUNDARY: &str = "----slipcheck-test-boundary";
pub const PASSWORD: &str = "secret123";

/// One multipart part for [`TestApp::upload`].
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        bytes: Vec<u8>,
    },
}

/// Application harness backed by a SQLite file and an upload root inside a
/// temporary directory.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display()),
            TEST_SECRET.to_string(),
            "127.0.0.1".to_string(),
            5000,
            "test".to_string(),
        );
        cfg.upload_dir = dir.path().join("uploads").display().to_string();
        cfg.public_base_url = Some(BASE_URL.to_string());
        cfg.cors_allow_any_origin = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let state = AppState::new(Arc::new(pool), cfg);
        state.uploads.ensure_root().await.expect("create upload root");
        let router = build_router(state.clone());

        Self {
            router,
            state,
            _dir: dir,
        }
    }

    pub fn upload_root(&self) -> PathBuf {
        self.state.uploads.root().to_path_buf()
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", tok));
        }
        let body = if let Some(json) = body {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize json body"))
        } else {
            Body::empty()
        };
        self.send(builder.body(body).expect("build request")).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// `multipart/form-data` POST with hand-built parts.
    pub async fn upload(&self, uri: &str, token: &str, parts: Vec<Part<'_>>) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(parts)))
            .expect("build multipart request");
        self.send(request).await
    }

    /// Registers a customer and returns `(token, user id)`.
    pub async fn register(&self, email: &str) -> (String, String) {
        let response = self
            .request(
                Method::POST,
                "/api/auth/register",
                Some(json!({
                    "email": email,
                    "password": PASSWORD,
                    "firstName": "Test",
                    "lastName": "Customer",
                    "phone": "0800000000",
                    "address": "1 Test Street"
                })),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        (
            body["token"].as_str().expect("token").to_string(),
            body["id"].as_str().expect("id").to_string(),
        )
    }

    /// Provisions an administrator and signs in through the admin endpoint.
    pub async fn admin_token(&self) -> String {
        self.state
            .services
            .users
            .create_admin(NewAdmin {
                email: "admin@example.com".into(),
                password: PASSWORD.into(),
                first_name: "Site".into(),
                last_name: "Admin".into(),
                promote_existing: true,
            })
            .await
            .expect("create admin");

        let response = self
            .request(
                Method::POST,
                "/api/auth/admin/login",
                Some(json!({ "email": "admin@example.com", "password": PASSWORD })),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await["token"]
            .as_str()
            .expect("admin token")
            .to_string()
    }

    /// Creates a payment and returns the `{payment, order}` body.
    pub async fn create_payment(&self, token: &str, method: &str, amount: f64) -> Value {
        let response = self
            .request(
                Method::POST,
                "/api/payments",
                Some(json!({
                    "amount": amount,
                    "method": method,
                    "customerName": "Test Customer",
                    "customerPhone": "0800000000",
                    "shippingAddress": "1 Test Street",
                    "items": [{ "name": "Widget", "quantity": 2, "unitPrice": amount / 2.0 }]
                })),
                Some(token),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await
    }

    pub async fn upload_slip(&self, token: &str, payment_id: &str, file: Part<'_>) -> Response {
        self.upload(
            "/api/payments/upload-slip",
            token,
            vec![
                Part::Text("paymentId", payment_id),
                Part::Text("referenceNumber", "BANK-REF-001"),
                Part::Text("amount", "100.00"),
                file,
            ],
        )
        .await
    }

    pub fn uploaded_file_count(&self) -> usize {
        fn walk(dir: &std::path::Path) -> usize {
            std::fs::read_dir(dir)
                .map(|entries| {
                    entries
                        .filter_map(Result::ok)
                        .map(|entry| {
                            let path = entry.path();
                            if path.is_dir() {
                                walk(&path)
                            } else {
                                1
                            }
                        })
                        .sum()
                })
                .unwrap_or(0)
        }
        walk(&self.upload_root())
    }
}

pub fn pdf_part(bytes: &[u8]) -> Part<'static> {
    Part::File {
        name: "file",
        file_name: "transfer receipt.pdf",
        content_type: "application/pdf",
        bytes: bytes.to_vec(),
    }
}

pub fn multipart_body(parts: Vec<Part<'_>>) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                name,
                file_name,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        name, file_name, content_type
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

pub async fn json_body(response: Response) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        panic!(
            "response was not JSON ({}): {}",
            e,
            String::from_utf8_lossy(&bytes)
        )
    })
}

/// Strips the configured base URL from an absolute file URL.
pub fn relative_url(absolute: &str) -> String {
    absolute
        .strip_prefix(BASE_URL)
        .unwrap_or(absolute)
        .to_string()
}
