mod common;

use axum::http::{Method, StatusCode};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::{json, Value};
use slipcheck_api::entities::order;

use common::{json_body, pdf_part, Part, TestApp, BASE_URL};

async fn submitted_slip(app: &TestApp, token: &str) -> (String, Value) {
    let created = app.create_payment(token, "bank_transfer", 100.0).await;
    let payment_id = created["payment"]["id"].as_str().unwrap().to_string();

    let response = app
        .upload_slip(token, &payment_id, pdf_part(b"%PDF-1.4 transfer receipt"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    (payment_id, json_body(response).await)
}

#[tokio::test]
async fn cod_payment_completes_immediately_with_an_order() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("cod@example.com").await;

    let body = app.create_payment(&token, "cod", 250.5).await;
    assert_eq!(body["payment"]["status"], "completed");
    assert_eq!(body["payment"]["method"], "cod");
    assert_eq!(body["payment"]["amount"], 250.5);
    assert_eq!(body["payment"]["userId"], user_id);
    assert_eq!(body["order"]["paymentId"], body["payment"]["id"]);
    assert_eq!(body["order"]["orderId"], body["payment"]["orderId"]);
    assert_eq!(body["order"]["totalAmount"], 250.5);
}

#[tokio::test]
async fn each_payment_persists_exactly_one_order() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("order@example.com").await;

    let body = app.create_payment(&token, "bank_transfer", 75.25).await;
    let payment_id = uuid::Uuid::parse_str(body["payment"]["id"].as_str().unwrap()).unwrap();

    let stored = order::Entity::find()
        .filter(order::Column::PaymentId.eq(payment_id))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(stored, 1);

    let order = app
        .state
        .services
        .payments
        .order_for_payment(payment_id)
        .await
        .unwrap();
    assert_eq!(order.payment_id, payment_id);
    assert_eq!(order.user_id.to_string(), user_id);
    assert_eq!(order.order_id, body["payment"]["orderId"].as_str().unwrap());
    assert_eq!(order.total_amount.to_string(), "75.25");

    let unknown = app
        .state
        .services
        .payments
        .order_for_payment(uuid::Uuid::new_v4())
        .await;
    assert!(unknown.is_err());
}

#[tokio::test]
async fn bank_transfer_payment_starts_pending() {
    let app = TestApp::new().await;
    let (token, _) = app.register("bank@example.com").await;

    let body = app.create_payment(&token, "bank_transfer", 100.0).await;
    assert_eq!(body["payment"]["status"], "pending");

    let history = app
        .request(Method::GET, "/api/payments/history", None, Some(&token))
        .await;
    assert_eq!(history.status(), StatusCode::OK);
    let history = json_body(history).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["id"], body["payment"]["id"]);
}

#[tokio::test]
async fn create_payment_rejects_unknown_method_and_negative_amount() {
    let app = TestApp::new().await;
    let (token, _) = app.register("invalid@example.com").await;

    for body in [
        json!({
            "amount": 10.0,
            "method": "crypto",
            "customerName": "A",
            "shippingAddress": "B"
        }),
        json!({
            "amount": -5.0,
            "method": "cod",
            "customerName": "A",
            "shippingAddress": "B"
        }),
    ] {
        let response = app
            .request(Method::POST, "/api/payments", Some(body), Some(&token))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn payments_of_other_users_are_not_visible() {
    let app = TestApp::new().await;
    let (owner, _) = app.register("owner@example.com").await;
    let (other, _) = app.register("other@example.com").await;

    let created = app.create_payment(&owner, "bank_transfer", 100.0).await;
    let payment_id = created["payment"]["id"].as_str().unwrap();

    let own = app
        .request(
            Method::GET,
            &format!("/api/payments/{}", payment_id),
            None,
            Some(&owner),
        )
        .await;
    assert_eq!(own.status(), StatusCode::OK);

    let foreign = app
        .request(
            Method::GET,
            &format!("/api/payments/{}", payment_id),
            None,
            Some(&other),
        )
        .await;
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

    let upload = app
        .upload_slip(&other, payment_id, pdf_part(b"%PDF-1.4"))
        .await;
    assert_eq!(upload.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.uploaded_file_count(), 0);
}

#[tokio::test]
async fn slip_upload_stores_file_and_returns_absolute_url() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("upload@example.com").await;

    let (payment_id, slip) = submitted_slip(&app, &token).await;
    assert_eq!(slip["paymentId"], payment_id);
    assert_eq!(slip["userId"], user_id);
    assert_eq!(slip["status"], "pending");
    assert_eq!(slip["referenceNumber"], "BANK-REF-001");
    assert_eq!(slip["amount"], 100.0);
    assert_eq!(slip["fileName"], "transfer receipt.pdf");

    let file_url = slip["fileUrl"].as_str().unwrap();
    assert!(file_url.starts_with(&format!("{}/uploads/", BASE_URL)), "{}", file_url);
    assert!(file_url.ends_with(".pdf"));
    assert_eq!(app.uploaded_file_count(), 1);

    let payment = app
        .request(
            Method::GET,
            &format!("/api/payments/{}", payment_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(json_body(payment).await["status"], "pending");
}

#[tokio::test]
async fn second_slip_for_a_payment_is_a_conflict() {
    let app = TestApp::new().await;
    let (token, _) = app.register("twice@example.com").await;
    let (payment_id, first) = submitted_slip(&app, &token).await;

    let response = app
        .upload_slip(&token, &payment_id, pdf_part(b"%PDF-1.4 second"))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["details"]["slipId"], first["id"]);
    assert_eq!(app.uploaded_file_count(), 1);
}

#[tokio::test]
async fn concurrent_uploads_for_one_payment_store_a_single_slip() {
    let app = TestApp::new().await;
    let (token, _) = app.register("racer@example.com").await;
    let admin = app.admin_token().await;
    let created = app.create_payment(&token, "bank_transfer", 100.0).await;
    let payment_id = created["payment"]["id"].as_str().unwrap();

    let (a, b) = tokio::join!(
        app.upload_slip(&token, payment_id, pdf_part(b"%PDF-1.4 first")),
        app.upload_slip(&token, payment_id, pdf_part(b"%PDF-1.4 second")),
    );
    let (created, conflict) = match (a.status(), b.status()) {
        (StatusCode::CREATED, StatusCode::CONFLICT) => (a, b),
        (StatusCode::CONFLICT, StatusCode::CREATED) => (b, a),
        other => panic!("unexpected statuses {:?}", other),
    };
    let slip = json_body(created).await;
    let conflict = json_body(conflict).await;
    assert_eq!(conflict["details"]["slipId"], slip["id"]);
    assert_eq!(app.uploaded_file_count(), 1);

    let all = app
        .request(Method::GET, "/api/admin/all-slips", None, Some(&admin))
        .await;
    assert_eq!(json_body(all).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn disallowed_file_type_is_rejected_without_side_effects() {
    let app = TestApp::new().await;
    let (token, _) = app.register("exe@example.com").await;
    let created = app.create_payment(&token, "bank_transfer", 100.0).await;
    let payment_id = created["payment"]["id"].as_str().unwrap();

    let response = app
        .upload_slip(
            &token,
            payment_id,
            Part::File {
                name: "file",
                file_name: "invoice.exe",
                content_type: "application/octet-stream",
                bytes: b"MZ\x90\x00".to_vec(),
            },
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["message"],
        "Only images (jpg, jpeg, png) and PDF files are allowed"
    );
    assert_eq!(app.uploaded_file_count(), 0);

    let admin = app.admin_token().await;
    let all = app
        .request(Method::GET, "/api/admin/all-slips", None, Some(&admin))
        .await;
    assert_eq!(json_body(all).await.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn oversized_file_is_rejected() {
    let app = TestApp::new().await;
    let (token, _) = app.register("big@example.com").await;
    let created = app.create_payment(&token, "bank_transfer", 100.0).await;
    let payment_id = created["payment"]["id"].as_str().unwrap();

    let response = app
        .upload_slip(&token, payment_id, pdf_part(&vec![b'x'; 11 * 1024 * 1024]))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.uploaded_file_count(), 0);
}

#[tokio::test]
async fn missing_file_and_bad_fields_are_rejected() {
    let app = TestApp::new().await;
    let (token, _) = app.register("fields@example.com").await;
    let created = app.create_payment(&token, "bank_transfer", 100.0).await;
    let payment_id = created["payment"]["id"].as_str().unwrap();

    let no_file = app
        .upload(
            "/api/payments/upload-slip",
            &token,
            vec![
                Part::Text("paymentId", payment_id),
                Part::Text("referenceNumber", "REF"),
                Part::Text("amount", "100"),
            ],
        )
        .await;
    assert_eq!(no_file.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(no_file).await["message"], "Please upload a file");

    let bad_amount = app
        .upload(
            "/api/payments/upload-slip",
            &token,
            vec![
                Part::Text("paymentId", payment_id),
                Part::Text("referenceNumber", "REF"),
                Part::Text("amount", "lots"),
                pdf_part(b"%PDF-1.4"),
            ],
        )
        .await;
    assert_eq!(bad_amount.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(bad_amount).await["message"], "Amount must be a number");

    let bad_id = app
        .upload(
            "/api/payments/upload-slip",
            &token,
            vec![
                Part::Text("paymentId", "not-a-uuid"),
                Part::Text("referenceNumber", "REF"),
                Part::Text("amount", "100"),
                pdf_part(b"%PDF-1.4"),
            ],
        )
        .await;
    assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.uploaded_file_count(), 0);
}

#[tokio::test]
async fn cod_payment_does_not_accept_slips() {
    let app = TestApp::new().await;
    let (token, _) = app.register("codslip@example.com").await;
    let created = app.create_payment(&token, "cod", 80.0).await;
    let payment_id = created["payment"]["id"].as_str().unwrap();

    let response = app
        .upload_slip(&token, payment_id, pdf_part(b"%PDF-1.4"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.uploaded_file_count(), 0);
}

#[tokio::test]
async fn verifying_a_slip_completes_the_payment_once() {
    let app = TestApp::new().await;
    let (token, _) = app.register("verify@example.com").await;
    let admin = app.admin_token().await;
    let (payment_id, slip) = submitted_slip(&app, &token).await;
    let slip_id = slip["id"].as_str().unwrap();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/admin/verify-slip/{}", slip_id),
            Some(json!({ "status": "verified", "remarks": "Matches statement" })),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "verified");
    assert_eq!(body["adminRemarks"], "Matches statement");
    assert!(body["verifiedBy"].is_string());
    assert!(body["verifiedAt"].is_string());
    assert_eq!(body["payment"]["status"], "completed");

    let payment = app
        .request(
            Method::GET,
            &format!("/api/payments/{}", payment_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(json_body(payment).await["status"], "completed");

    let again = app
        .request(
            Method::PUT,
            &format!("/api/admin/verify-slip/{}", slip_id),
            Some(json!({ "status": "rejected" })),
            Some(&admin),
        )
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    assert_eq!(
        json_body(again).await["message"],
        "Payment slip has already been verified"
    );
}

#[tokio::test]
async fn concurrent_reviews_settle_the_slip_once() {
    let app = TestApp::new().await;
    let (token, _) = app.register("review-race@example.com").await;
    let admin = app.admin_token().await;
    let (payment_id, slip) = submitted_slip(&app, &token).await;
    let verify_uri = format!("/api/admin/verify-slip/{}", slip["id"].as_str().unwrap());

    let (verify, reject) = tokio::join!(
        app.request(
            Method::PUT,
            &verify_uri,
            Some(json!({ "status": "verified" })),
            Some(&admin),
        ),
        app.request(
            Method::PUT,
            &verify_uri,
            Some(json!({ "status": "rejected" })),
            Some(&admin),
        ),
    );
    let expected_payment = match (verify.status(), reject.status()) {
        (StatusCode::OK, StatusCode::CONFLICT) => "completed",
        (StatusCode::CONFLICT, StatusCode::OK) => "failed",
        other => panic!("unexpected statuses {:?}", other),
    };

    let payment = app
        .request(
            Method::GET,
            &format!("/api/payments/{}", payment_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(json_body(payment).await["status"], expected_payment);
}

#[tokio::test]
async fn rejecting_a_slip_fails_the_payment() {
    let app = TestApp::new().await;
    let (token, _) = app.register("reject@example.com").await;
    let admin = app.admin_token().await;
    let (payment_id, slip) = submitted_slip(&app, &token).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/admin/verify-slip/{}", slip["id"].as_str().unwrap()),
            Some(json!({ "status": "rejected", "remarks": "Amount mismatch" })),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "rejected");

    let payment = app
        .request(
            Method::GET,
            &format!("/api/payments/{}", payment_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(json_body(payment).await["status"], "failed");
}

#[tokio::test]
async fn verify_rejects_bad_status_and_unknown_slip() {
    let app = TestApp::new().await;
    let (token, _) = app.register("badstatus@example.com").await;
    let admin = app.admin_token().await;
    let (_, slip) = submitted_slip(&app, &token).await;

    let invalid = app
        .request(
            Method::PUT,
            &format!("/api/admin/verify-slip/{}", slip["id"].as_str().unwrap()),
            Some(json!({ "status": "approved" })),
            Some(&admin),
        )
        .await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(invalid).await["message"], "Invalid verification status");

    let missing = app
        .request(
            Method::PUT,
            &format!("/api/admin/verify-slip/{}", uuid::Uuid::new_v4()),
            Some(json!({ "status": "verified" })),
            Some(&admin),
        )
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let pending = app
        .request(Method::GET, "/api/admin/pending-slips", None, Some(&admin))
        .await;
    assert_eq!(json_body(pending).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn admin_lists_and_stats_reflect_reviews() {
    let app = TestApp::new().await;
    let (first, _) = app.register("first@example.com").await;
    let (second, _) = app.register("second@example.com").await;
    let admin = app.admin_token().await;

    let (_, slip_a) = submitted_slip(&app, &first).await;
    let (_, slip_b) = submitted_slip(&app, &second).await;
    app.create_payment(&first, "cod", 40.0).await;

    let pending = app
        .request(Method::GET, "/api/admin/pending-slips", None, Some(&admin))
        .await;
    assert_eq!(pending.status(), StatusCode::OK);
    let pending = json_body(pending).await;
    assert_eq!(pending.as_array().unwrap().len(), 2);
    assert_eq!(pending[0]["user"]["email"], "second@example.com");
    assert!(pending[0]["payment"]["id"].is_string());

    app.request(
        Method::PUT,
        &format!("/api/admin/verify-slip/{}", slip_a["id"].as_str().unwrap()),
        Some(json!({ "status": "verified" })),
        Some(&admin),
    )
    .await;

    let pending = app
        .request(Method::GET, "/api/admin/pending-slips", None, Some(&admin))
        .await;
    let pending = json_body(pending).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["id"], slip_b["id"]);

    let all = app
        .request(Method::GET, "/api/admin/all-slips", None, Some(&admin))
        .await;
    assert_eq!(json_body(all).await.as_array().unwrap().len(), 2);

    let detail = app
        .request(
            Method::GET,
            &format!("/api/admin/slip/{}", slip_a["id"].as_str().unwrap()),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(detail.status(), StatusCode::OK);
    assert_eq!(json_body(detail).await["status"], "verified");

    let stats = app
        .request(Method::GET, "/api/admin/stats", None, Some(&admin))
        .await;
    assert_eq!(stats.status(), StatusCode::OK);
    let stats = json_body(stats).await;
    assert_eq!(stats["totalUsers"], 3);
    assert_eq!(stats["totalPayments"], 3);
    assert_eq!(stats["pendingSlips"], 1);
    assert_eq!(stats["totalRevenue"], 140.0);
}

#[tokio::test]
async fn end_to_end_bank_transfer_flow() {
    let app = TestApp::new().await;
    let (customer, _) = app.register("a@example.com").await;
    let admin = app.admin_token().await;

    let created = app.create_payment(&customer, "bank_transfer", 100.0).await;
    assert_eq!(created["payment"]["status"], "pending");
    let payment_id = created["payment"]["id"].as_str().unwrap();

    let upload = app
        .upload(
            "/api/payments/upload-slip",
            &customer,
            vec![
                Part::Text("paymentId", payment_id),
                Part::Text("referenceNumber", "REF1"),
                Part::Text("amount", "100"),
                pdf_part(b"%PDF-1.4 slip"),
            ],
        )
        .await;
    assert_eq!(upload.status(), StatusCode::CREATED);
    let slip = json_body(upload).await;
    assert_eq!(slip["status"], "pending");
    assert_eq!(slip["referenceNumber"], "REF1");
    let slip_id = slip["id"].as_str().unwrap();

    let payment_uri = format!("/api/payments/{}", payment_id);
    let payment = app
        .request(Method::GET, &payment_uri, None, Some(&customer))
        .await;
    assert_eq!(json_body(payment).await["status"], "pending");

    let verify_uri = format!("/api/admin/verify-slip/{}", slip_id);
    let verified = app
        .request(
            Method::PUT,
            &verify_uri,
            Some(json!({ "status": "verified" })),
            Some(&admin),
        )
        .await;
    assert_eq!(verified.status(), StatusCode::OK);
    assert_eq!(json_body(verified).await["status"], "verified");

    let payment = app
        .request(Method::GET, &payment_uri, None, Some(&customer))
        .await;
    assert_eq!(json_body(payment).await["status"], "completed");

    let refused = app
        .request(
            Method::PUT,
            &verify_uri,
            Some(json!({ "status": "rejected" })),
            Some(&admin),
        )
        .await;
    assert_eq!(refused.status(), StatusCode::CONFLICT);

    let payment = app
        .request(Method::GET, &payment_uri, None, Some(&customer))
        .await;
    assert_eq!(json_body(payment).await["status"], "completed");
}
