mod common;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use common::Harness;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use voucher_gateway::orders::model::OrderStatus;
use voucher_gateway::orders::repository::OrderRepository;
use voucher_gateway::payments::factory::ProviderRegistry;
use voucher_gateway::payments::providers::{LinepayAdapter, LinepayConfig};
use voucher_gateway::payments::signature;
use voucher_gateway::payments::types::{
    CallbackChannel, OutboundRequest, ProviderName, RawCallback,
};
use voucher_gateway::services::checkout::{CheckoutRequest, CheckoutService};
use voucher_gateway::services::webhook_ingestor::{IngestResponse, ResultPage};

const SECRET: &str = "linepay-channel-secret";
const FIRST_TRANSACTION: u64 = 2024101900000000001;

/// Stand-in for the LINE Pay v3 API.
struct MockLinepay {
    next_transaction: AtomicU64,
    confirm_delay_ms: AtomicU64,
    confirm_calls: AtomicUsize,
    confirm_code: Mutex<String>,
    requested_order_ids: Mutex<Vec<String>>,
}

impl MockLinepay {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_transaction: AtomicU64::new(FIRST_TRANSACTION),
            confirm_delay_ms: AtomicU64::new(0),
            confirm_calls: AtomicUsize::new(0),
            confirm_code: Mutex::new("0000".to_string()),
            requested_order_ids: Mutex::new(Vec::new()),
        })
    }
}

fn signed_correctly(headers: &HeaderMap, uri: &str, body: &str) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    match (header("X-LINE-Authorization-Nonce"), header("X-LINE-Authorization")) {
        (Some(nonce), Some(sig)) => {
            header("X-LINE-ChannelId") == Some("1656000000")
                && signature::verify(SECRET, uri, body, nonce, sig)
        }
        _ => false,
    }
}

async fn request_payment(
    State(mock): State<Arc<MockLinepay>>,
    headers: HeaderMap,
    body: String,
) -> Json<JsonValue> {
    if !signed_correctly(&headers, "/v3/payments/request", &body) {
        return Json(json!({ "returnCode": "1106", "returnMessage": "Header information error." }));
    }
    let request: JsonValue = serde_json::from_str(&body).unwrap_or_default();
    if let Some(order_id) = request["orderId"].as_str() {
        mock.requested_order_ids.lock().await.push(order_id.to_string());
    }
    let transaction_id = mock.next_transaction.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "returnCode": "0000",
        "returnMessage": "Success.",
        "info": {
            "transactionId": transaction_id,
            "paymentAccessToken": "187568751124",
            "paymentUrl": {
                "web": format!("https://sandbox-web-pay.line.me/web/payment/wait?transactionReserveId={}", transaction_id),
                "app": "line://pay/payment/abc"
            }
        }
    }))
}

async fn confirm_payment(
    State(mock): State<Arc<MockLinepay>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Json<JsonValue> {
    mock.confirm_calls.fetch_add(1, Ordering::SeqCst);
    let delay = mock.confirm_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }
    let uri = format!("/v3/payments/{}/confirm", transaction_id);
    if !signed_correctly(&headers, &uri, &body) {
        return Json(json!({ "returnCode": "1106", "returnMessage": "Header information error." }));
    }
    let code = mock.confirm_code.lock().await.clone();
    if code != "0000" {
        return Json(json!({ "returnCode": code, "returnMessage": "Declined." }));
    }
    Json(json!({
        "returnCode": "0000",
        "returnMessage": "Success.",
        "info": {
            "transactionId": transaction_id.parse::<u64>().unwrap_or_default(),
            "payInfo": [{
                "method": "CREDIT_CARD",
                "amount": 2500,
                "maskedCreditCardNumber": "************1111"
            }]
        }
    }))
}

async fn spawn_mock(mock: Arc<MockLinepay>) -> SocketAddr {
    let app = Router::new()
        .route("/v3/payments/request", post(request_payment))
        .route("/v3/payments/{transaction_id}/confirm", post(confirm_payment))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn linepay_config(addr: SocketAddr, timeout_secs: u64) -> LinepayConfig {
    LinepayConfig {
        channel_id: "1656000000".to_string(),
        channel_secret: SECRET.to_string(),
        api_url: format!("http://{}", addr),
        confirm_url: "https://shop.example.com/payments/linepay/confirm".to_string(),
        cancel_url: "https://shop.example.com/payments/linepay/cancel".to_string(),
        currency: "TWD".to_string(),
        timeout_secs,
    }
}

struct Fixture {
    h: Harness,
    mock: Arc<MockLinepay>,
    checkout: CheckoutService,
}

async fn fixture(timeout_secs: u64) -> Fixture {
    let mock = MockLinepay::new();
    let addr = spawn_mock(mock.clone()).await;
    let linepay = Arc::new(LinepayAdapter::new(linepay_config(addr, timeout_secs)).unwrap());
    let h = Harness::with_providers(move |newebpay| {
        ProviderRegistry::new()
            .with_adapter(newebpay)
            .with_adapter(linepay)
    })
    .await;
    let checkout = CheckoutService::new(h.orders.clone(), h.catalog.clone(), h.providers.clone());
    Fixture { h, mock, checkout }
}

impl Fixture {
    async fn start_checkout(&self) -> (uuid::Uuid, String, String) {
        let (order, outbound) = self
            .checkout
            .checkout(
                self.h.customer_id,
                &CheckoutRequest {
                    product_id: self.h.product_id,
                    quantity: 5,
                    provider: ProviderName::Linepay,
                    client_amount: Some(2500),
                },
            )
            .await
            .unwrap();
        let OutboundRequest::Redirect {
            url,
            provider_transaction_id,
        } = outbound
        else {
            panic!("LINE Pay checkout must redirect");
        };
        assert!(url.contains(&provider_transaction_id));
        (order.id, order.provider_order_reference, provider_transaction_id)
    }

    async fn confirm(&self, transaction_id: &str, order_id: &str) -> ResultPage {
        let raw = RawCallback::from_query(HashMap::from([
            ("transactionId".to_string(), transaction_id.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ]));
        match self
            .h
            .ingestor
            .ingest(CallbackChannel::Return, ProviderName::Linepay, &raw)
            .await
        {
            IngestResponse::Page(page) => page,
            other => panic!("expected a page, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn confirmed_payment_settles_the_order() {
    let f = fixture(5).await;
    let (order_id, reference, transaction_id) = f.start_checkout().await;
    assert_eq!(transaction_id, FIRST_TRANSACTION.to_string());
    assert!(reference.starts_with("LP"));

    let page = f.confirm(&transaction_id, &reference).await;
    let ResultPage::Success { order_id: shown, amount, .. } = page.clone() else {
        panic!("expected success, got {:?}", page);
    };
    assert_eq!(amount, 2500);

    let stored = f.h.orders.find_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
    assert_eq!(shown, order_id);
    assert!(stored.ticket_code.is_some());
    assert_eq!(stored.provider_transaction_reference.as_deref(), Some(transaction_id.as_str()));
    assert_eq!(stored.card_mask.as_deref(), Some("************1111"));
    assert_eq!(stored.payment_method.as_deref(), Some("CREDIT_CARD"));

    // A reload of the confirm page does not call the provider again.
    let reload = f.confirm(&transaction_id, &reference).await;
    assert!(matches!(reload, ResultPage::Success { .. }));
    assert_eq!(f.mock.confirm_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn confirm_timeout_keeps_order_pending_and_can_be_retried() {
    let f = fixture(1).await;
    let (order_id, reference, transaction_id) = f.start_checkout().await;

    f.mock.confirm_delay_ms.store(2500, Ordering::SeqCst);
    let page = f.confirm(&transaction_id, &reference).await;
    assert!(matches!(page, ResultPage::TryAgainLater { .. }));
    let stored = f.h.orders.find_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
    assert!(stored.ticket_code.is_none());

    f.mock.confirm_delay_ms.store(0, Ordering::SeqCst);
    let retried = f.confirm(&transaction_id, &reference).await;
    assert!(matches!(retried, ResultPage::Success { .. }));
    let stored = f.h.orders.find_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
}

#[tokio::test]
async fn declined_confirm_leaves_order_pending() {
    let f = fixture(5).await;
    let (order_id, reference, transaction_id) = f.start_checkout().await;
    *f.mock.confirm_code.lock().await = "1104".to_string();

    let page = f.confirm(&transaction_id, &reference).await;
    assert!(matches!(page, ResultPage::Failure { .. }));
    let stored = f.h.orders.find_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
}

#[tokio::test]
async fn foreign_transaction_id_is_rejected_without_calling_the_provider() {
    let f = fixture(5).await;
    let (order_id, reference, _) = f.start_checkout().await;

    let page = f.confirm("9999999999999999999", &reference).await;
    assert!(matches!(page, ResultPage::Failure { .. }));
    assert_eq!(f.mock.confirm_calls.load(Ordering::SeqCst), 0);
    let stored = f.h.orders.find_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
}

#[tokio::test]
async fn repayment_uses_a_retry_order_id_and_still_settles() {
    let f = fixture(5).await;
    let (order_id, reference, _) = f.start_checkout().await;

    let outbound = f
        .checkout
        .begin_payment(order_id, f.h.customer_id)
        .await
        .unwrap();
    let OutboundRequest::Redirect {
        provider_transaction_id,
        ..
    } = outbound
    else {
        panic!("LINE Pay checkout must redirect");
    };

    let sent = f.mock.requested_order_ids.lock().await.clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], reference);
    assert!(sent[1].starts_with(&format!("{}-retry-", reference)));

    let page = f.confirm(&provider_transaction_id, &sent[1]).await;
    assert!(matches!(page, ResultPage::Success { .. }));
    let stored = f.h.orders.find_by_id(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
    assert_eq!(
        stored.checkout_transaction_id.as_deref(),
        Some(provider_transaction_id.as_str())
    );
}

#[tokio::test]
async fn client_amount_disagreement_creates_nothing() {
    let f = fixture(5).await;
    let err = f
        .checkout
        .checkout(
            f.h.customer_id,
            &CheckoutRequest {
                product_id: f.h.product_id,
                quantity: 5,
                provider: ProviderName::Linepay,
                client_amount: Some(100),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        voucher_gateway::payments::error::PaymentError::AmountMismatch { expected: 2500, reported: 100 }
    ));
    assert!(f.h.orders.is_empty().await);
    assert!(f.mock.requested_order_ids.lock().await.is_empty());
}
