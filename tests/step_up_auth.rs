mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use common::{newebpay_success, Harness};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use voucher_gateway::api::{self, ApiServices};
use voucher_gateway::auth::step_up::{InMemoryTotpRepository, VerifiedBy};
use voucher_gateway::auth::totp;
use voucher_gateway::auth::{StepUpAuthGate, TotpError};
use voucher_gateway::orders::model::{OrderStatus, TicketState};
use voucher_gateway::orders::repository::OrderRepository;
use voucher_gateway::payments::types::ProviderName;
use voucher_gateway::services::checkout::CheckoutService;
use voucher_gateway::tickets::repository::ValidationOutcome;

const CODE: &str = "TKT1A2B20261019120000";

fn gate() -> StepUpAuthGate {
    StepUpAuthGate::new(
        Arc::new(InMemoryTotpRepository::new()),
        "Voucher Gateway",
        Duration::minutes(10),
    )
}

fn current_code(secret: &str) -> String {
    totp::code_at(&totp::decode_secret(secret).unwrap(), Utc::now()).unwrap()
}

async fn enroll(gate: &StepUpAuthGate, customer: Uuid) -> (String, Vec<String>) {
    let setup = gate.begin_enrollment(customer, "buyer").await.unwrap();
    let codes = gate
        .enable(customer, &current_code(&setup.secret))
        .await
        .unwrap();
    (setup.secret, codes)
}

#[tokio::test]
async fn enrollment_then_totp_verification() {
    let gate = gate();
    let customer = Uuid::new_v4();
    assert!(!gate.is_enabled(customer).await.unwrap());
    assert!(matches!(
        gate.verify(customer, "123456").await,
        Err(TotpError::NotEnrolled)
    ));

    let setup = gate
        .begin_enrollment(customer, "buyer@example.com")
        .await
        .unwrap();
    assert!(setup.provisioning_uri.starts_with("otpauth://totp/"));
    assert!(setup.provisioning_uri.contains(&setup.secret));
    assert!(matches!(
        gate.verify(customer, &current_code(&setup.secret)).await,
        Err(TotpError::NotEnrolled)
    ));

    let backup_codes = gate
        .enable(customer, &current_code(&setup.secret))
        .await
        .unwrap();
    assert_eq!(backup_codes.len(), 10);
    assert!(gate.is_enabled(customer).await.unwrap());

    assert_eq!(gate.verify(customer, "000000x").await.unwrap(), None);
    assert_eq!(
        gate.verify(customer, &current_code(&setup.secret))
            .await
            .unwrap(),
        Some(VerifiedBy::Totp)
    );
    assert!(gate.is_recently_verified(customer).await.unwrap());
    assert!(!gate
        .is_recently_verified_at(customer, Duration::minutes(10), Utc::now() + Duration::minutes(11))
        .await
        .unwrap());
}

#[tokio::test]
async fn enabled_credential_never_hands_out_its_secret() {
    let gate = gate();
    let customer = Uuid::new_v4();
    let (secret, _) = enroll(&gate, customer).await;

    assert!(matches!(
        gate.begin_enrollment(customer, "buyer").await,
        Err(TotpError::AlreadyEnabled)
    ));
    assert!(matches!(
        gate.enable(customer, &current_code(&secret)).await,
        Err(TotpError::AlreadyEnabled)
    ));
    assert!(matches!(
        gate.provisioning_uri(customer, "buyer", None).await,
        Err(TotpError::InvalidCode)
    ));
    assert!(matches!(
        gate.provisioning_uri(customer, "buyer", Some("000000")).await,
        Err(TotpError::InvalidCode)
    ));

    let uri = gate
        .provisioning_uri(customer, "buyer", Some(&current_code(&secret)))
        .await
        .unwrap();
    assert!(uri.contains(&secret));
}

#[tokio::test]
async fn backup_codes_are_single_use_and_regeneration_revokes_old_ones() {
    let gate = gate();
    let customer = Uuid::new_v4();
    let (_, backup_codes) = enroll(&gate, customer).await;
    let code = backup_codes[0].clone();

    assert_eq!(
        gate.verify(customer, &code).await.unwrap(),
        Some(VerifiedBy::BackupCode)
    );
    assert_eq!(gate.verify(customer, &code).await.unwrap(), None);

    let fresh = gate.regenerate_backup_codes(customer).await.unwrap();
    assert_eq!(fresh.len(), 10);
    assert_eq!(
        gate.verify(customer, &backup_codes[1]).await.unwrap(),
        None
    );
    assert_eq!(
        gate.verify(customer, &fresh[0]).await.unwrap(),
        Some(VerifiedBy::BackupCode)
    );
}

#[tokio::test]
async fn concurrent_use_of_one_backup_code_verifies_once() {
    let gate = Arc::new(gate());
    let customer = Uuid::new_v4();
    let (_, backup_codes) = enroll(&gate, customer).await;
    let code = backup_codes[4].clone();

    let attempts = (0..16).map(|_| {
        let gate = gate.clone();
        let code = code.clone();
        tokio::spawn(async move { gate.verify(customer, &code).await })
    });
    let accepted = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|v| *v == Some(VerifiedBy::BackupCode))
        .count();
    assert_eq!(accepted, 1);
}

#[tokio::test]
async fn reset_rotates_the_secret_and_disable_removes_it() {
    let gate = gate();
    let customer = Uuid::new_v4();
    let (before, backup_codes) = enroll(&gate, customer).await;
    let after = gate.reset(customer, "buyer").await.unwrap();
    assert_ne!(before, after.secret);
    assert!(!gate.is_enabled(customer).await.unwrap());

    let fresh = gate
        .enable(customer, &current_code(&after.secret))
        .await
        .unwrap();
    assert_eq!(fresh.len(), 10);
    assert_eq!(
        gate.verify(customer, &backup_codes[0]).await.unwrap(),
        None
    );

    gate.disable(customer).await.unwrap();
    assert!(!gate.is_enabled(customer).await.unwrap());
    assert!(matches!(
        gate.provisioning_uri(customer, "buyer", None).await,
        Err(TotpError::NotEnrolled)
    ));
}

struct App {
    h: Harness,
    router: Router,
}

async fn app() -> App {
    let h = Harness::new().await;
    let services = ApiServices {
        checkout: Arc::new(CheckoutService::new(
            h.orders.clone(),
            h.catalog.clone(),
            h.providers.clone(),
        )),
        ingestor: h.ingestor.clone(),
        state_machine: h.state_machine.clone(),
        tickets: h.tickets.clone(),
        step_up: Arc::new(gate()),
    };
    let router = api::router(&services);
    App { h, router }
}

impl App {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn customer_json(
        &self,
        method: &str,
        uri: &str,
        body: Option<JsonValue>,
    ) -> (StatusCode, JsonValue) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-customer-id", self.h.customer_id.to_string())
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null))
    }

    async fn enable_totp(&self) -> String {
        let (status, setup) = self.customer_json("POST", "/api/totp/setup", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(setup["enabled"], false);
        let secret = setup["secret"].as_str().unwrap().to_string();

        let (status, enabled) = self
            .customer_json(
                "POST",
                "/api/totp/enable",
                Some(json!({ "code": current_code(&secret) })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(enabled["backup_codes"].as_array().unwrap().len(), 10);
        secret
    }
}

#[tokio::test]
async fn setup_endpoints_stop_returning_the_secret_once_enabled() {
    let app = app().await;
    let secret = app.enable_totp().await;

    let (status, body) = app.customer_json("POST", "/api/totp/setup", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.get("secret").is_none());

    let (status, body) = app
        .customer_json(
            "POST",
            "/api/totp/enable",
            Some(json!({ "code": current_code(&secret) })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.get("backup_codes").is_none());

    let (status, _) = app.customer_json("GET", "/api/totp/provisioning", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ticket_display_requires_recent_step_up_once_enabled() {
    let app = app().await;
    let order = app
        .h
        .paid_order("ORD10191230451234", CODE, Utc::now() + Duration::days(3))
        .await;
    let ticket_uri = format!("/api/orders/{}/ticket", order.id);

    let (status, body) = app.customer_json("GET", &ticket_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ticket_code"], CODE);

    let secret = app.enable_totp().await;

    let (status, _) = app.customer_json("GET", &ticket_uri, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, verified) = app
        .customer_json(
            "POST",
            "/api/totp/verify",
            Some(json!({ "code": current_code(&secret) })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["verified"], true);
    assert_eq!(verified["method"], "totp");

    let (status, body) = app.customer_json("GET", &ticket_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "unused");
}

#[tokio::test]
async fn management_actions_need_a_valid_code() {
    let app = app().await;
    let secret = app.enable_totp().await;

    let (status, _) = app
        .customer_json("POST", "/api/totp/disable", Some(json!({ "code": "000000" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .customer_json(
            "POST",
            "/api/totp/disable",
            Some(json!({ "code": current_code(&secret) })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);
}

#[tokio::test]
async fn other_customers_cannot_see_or_cancel_an_order() {
    let app = app().await;
    let order = app
        .h
        .pending_order(ProviderName::Newebpay, "ORD10191230451234")
        .await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/orders/{}/cancel", order.id))
        .header("x-customer-id", Uuid::new_v4().to_string())
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .customer_json("POST", &format!("/api/orders/{}/cancel", order.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["changed"], true);

    let stored = app.h.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn newebpay_notify_over_http_acks_plain_text() {
    let app = app().await;
    let order = app
        .h
        .pending_order(ProviderName::Newebpay, "ORD10191230451234")
        .await;
    let raw = app
        .h
        .newebpay_callback(&newebpay_success("ORD10191230451234", 2500));
    let form = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(raw.form.iter())
        .finish();

    let request = Request::builder()
        .method("POST")
        .uri("/payments/newebpay/notify")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"1|OK");

    let stored = app.h.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
}

#[tokio::test]
async fn customer_on_the_redeem_route_is_audited_as_unauthorized() {
    let app = app().await;
    let order = app
        .h
        .paid_order("ORD10191230451234", CODE, Utc::now() + Duration::days(3))
        .await;

    let (status, _) = app
        .customer_json("POST", "/api/tickets/redeem", Some(json!({ "code": CODE })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = Request::builder()
        .method("POST")
        .uri("/api/tickets/redeem")
        .header("x-merchant-id", app.h.merchant_id.to_string())
        .header("x-forwarded-for", "198.51.100.4, 10.0.0.1")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "code": CODE, "method": "manual" }).to_string()))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let summary: JsonValue = serde_json::from_slice(&body).unwrap();
    assert_eq!(summary["state"], "used");

    let trail = app.h.tickets.audit_trail(order.id).await.unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].outcome, ValidationOutcome::Unauthorized);
    assert_eq!(trail[1].outcome, ValidationOutcome::Success);
    assert_eq!(trail[1].ip_address.as_deref(), Some("198.51.100.4"));

    let stored = app.h.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.ticket_state, TicketState::Used);
}
