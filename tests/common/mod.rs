#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use voucher_gateway::orders::model::{NewOrder, Order};
use voucher_gateway::orders::repository::{InMemoryOrderRepository, OrderRepository};
use voucher_gateway::orders::state_machine::OrderStateMachine;
use voucher_gateway::payments::factory::ProviderRegistry;
use voucher_gateway::payments::providers::{NewebpayAdapter, NewebpayConfig};
use voucher_gateway::payments::types::{ProviderName, RawCallback};
use voucher_gateway::services::catalog::{CustomerProfile, InMemoryCatalog, ProductSnapshot};
use voucher_gateway::services::notification::{Notice, NotificationError, NotificationSender};
use voucher_gateway::services::webhook_ingestor::WebhookIngestor;
use voucher_gateway::tickets::repository::InMemoryTicketValidationRepository;
use voucher_gateway::tickets::service::{ReminderWindow, TicketService};

pub fn newebpay_config() -> NewebpayConfig {
    NewebpayConfig {
        merchant_id: "MS12345678".to_string(),
        hash_key: "12345678901234567890123456789012".to_string(),
        hash_iv: "abcdefghijklmnop".to_string(),
        gateway_url: "https://ccore.newebpay.com/MPG/mpg_gateway".to_string(),
        return_url: "https://shop.example.com/payments/newebpay/return".to_string(),
        notify_url: "https://shop.example.com/payments/newebpay/notify".to_string(),
        client_back_url: "https://shop.example.com/orders".to_string(),
        version: "2.3".to_string(),
    }
}

/// Records every notice instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(Uuid, Notice)>>,
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(
        &self,
        recipient: &CustomerProfile,
        notice: &Notice,
    ) -> Result<(), NotificationError> {
        self.sent.lock().await.push((recipient.id, notice.clone()));
        Ok(())
    }
}

pub struct Harness {
    pub orders: Arc<InMemoryOrderRepository>,
    pub validations: Arc<InMemoryTicketValidationRepository>,
    pub catalog: Arc<InMemoryCatalog>,
    pub notifier: Arc<RecordingNotifier>,
    pub newebpay: Arc<NewebpayAdapter>,
    pub providers: ProviderRegistry,
    pub state_machine: Arc<OrderStateMachine>,
    pub tickets: Arc<TicketService>,
    pub ingestor: Arc<WebhookIngestor>,
    pub merchant_id: Uuid,
    pub product_id: Uuid,
    pub customer_id: Uuid,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_providers(|newebpay| ProviderRegistry::new().with_adapter(newebpay)).await
    }

    pub async fn with_providers(
        build: impl FnOnce(Arc<NewebpayAdapter>) -> ProviderRegistry,
    ) -> Self {
        let orders = Arc::new(InMemoryOrderRepository::new());
        let validations = Arc::new(InMemoryTicketValidationRepository::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let merchant_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        catalog
            .add_product(ProductSnapshot {
                id: product_id,
                merchant_id,
                name: "Latte".to_string(),
                unit_price: 500,
                ticket_expiry: None,
                is_active: true,
            })
            .await;
        catalog
            .add_customer(CustomerProfile {
                id: customer_id,
                email: Some("buyer@example.com".to_string()),
                name: Some("Buyer".to_string()),
            })
            .await;

        let newebpay = Arc::new(NewebpayAdapter::new(newebpay_config()).unwrap());
        let providers = build(newebpay.clone());

        let state_machine = Arc::new(OrderStateMachine::new(
            orders.clone(),
            catalog.clone(),
            Duration::days(30),
        ));
        let tickets = Arc::new(TicketService::new(
            orders.clone(),
            validations.clone(),
            catalog.clone(),
            notifier.clone(),
            ReminderWindow::default(),
        ));
        let ingestor = Arc::new(WebhookIngestor::new(
            providers.clone(),
            state_machine.clone(),
            tickets.clone(),
        ));

        Self {
            orders,
            validations,
            catalog,
            notifier,
            newebpay,
            providers,
            state_machine,
            tickets,
            ingestor,
            merchant_id,
            product_id,
            customer_id,
        }
    }

    /// Insert a pending order for five lattes (amount 2500).
    pub async fn pending_order(&self, provider: ProviderName, reference: &str) -> Order {
        let order = Order::new_pending(
            NewOrder {
                provider,
                item_description: "Latte".to_string(),
                quantity: 5,
                unit_price: 500,
                customer_id: self.customer_id,
                product_id: self.product_id,
                provider_order_reference: reference.to_string(),
            },
            Utc::now(),
        )
        .unwrap();
        self.orders.insert(&order).await.unwrap()
    }

    /// Store a paid order with an unused ticket valid until `valid_until`.
    pub async fn paid_order(&self, reference: &str, code: &str, valid_until: DateTime<Utc>) -> Order {
        let mut order = self.pending_order(ProviderName::Newebpay, reference).await;
        order.status = voucher_gateway::orders::model::OrderStatus::Paid;
        order.paid_at = Some(valid_until - Duration::days(30));
        order.ticket_code = Some(code.to_string());
        order.valid_until = Some(valid_until);
        self.orders.overwrite(order.clone()).await;
        order
    }

    /// A correctly encrypted and checksummed NewebPay callback.
    pub fn newebpay_callback(&self, body: &JsonValue) -> RawCallback {
        let trade_info = self.newebpay.codec().encrypt(&body.to_string());
        let trade_sha = self.newebpay.codec().checksum(&trade_info);
        RawCallback::from_form(HashMap::from([
            ("Status".to_string(), "SUCCESS".to_string()),
            ("MerchantID".to_string(), "MS12345678".to_string()),
            ("TradeInfo".to_string(), trade_info),
            ("TradeSha".to_string(), trade_sha),
        ]))
    }
}

pub fn newebpay_success(reference: &str, amount: i64) -> JsonValue {
    json!({
        "Status": "SUCCESS",
        "Message": "Authorized",
        "Result": {
            "MerchantID": "MS12345678",
            "Amt": amount,
            "TradeNo": "24101912000012345",
            "MerchantOrderNo": reference,
            "PaymentType": "CREDIT",
            "Card6No": "400022",
            "Card4No": "1111"
        }
    })
}

pub fn newebpay_failure(reference: &str) -> JsonValue {
    json!({
        "Status": "MPG03008",
        "Message": "Card declined",
        "Result": {
            "MerchantID": "MS12345678",
            "Amt": 2500,
            "MerchantOrderNo": reference
        }
    })
}
