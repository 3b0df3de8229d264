//! Order creation and payment start.

use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::orders::model::{NewOrder, Order};
use crate::orders::repository::OrderRepository;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::factory::ProviderRegistry;
use crate::payments::types::{OrderSnapshot, OutboundRequest, ProviderName};
use crate::services::catalog::Catalog;

const REFERENCE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    pub provider: ProviderName,
    /// Amount the client displayed; must equal the server-side total.
    #[serde(default)]
    pub client_amount: Option<i64>,
}

pub struct CheckoutService {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn Catalog>,
    providers: ProviderRegistry,
}

impl CheckoutService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn Catalog>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            orders,
            catalog,
            providers,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Create a pending order priced from the catalog. A differing
    /// client-reported amount aborts before anything is written.
    pub async fn create_order(
        &self,
        customer_id: Uuid,
        request: &CheckoutRequest,
    ) -> PaymentResult<Order> {
        // Fail fast on a disabled provider.
        self.providers.get(request.provider)?;

        let product = self
            .catalog
            .product(request.product_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| PaymentError::ValidationError {
                message: "product is not available".to_string(),
                field: Some("product_id".to_string()),
            })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let order = Order::new_pending(
                NewOrder {
                    provider: request.provider,
                    item_description: product.name.clone(),
                    quantity: request.quantity,
                    unit_price: product.unit_price,
                    customer_id,
                    product_id: product.id,
                    provider_order_reference: generate_order_reference(request.provider),
                },
                Utc::now(),
            )?;

            if let Some(reported) = request.client_amount {
                if reported != order.amount {
                    warn!(
                        product_id = %product.id,
                        expected = order.amount,
                        reported,
                        "client amount disagrees with server total"
                    );
                    return Err(PaymentError::AmountMismatch {
                        expected: order.amount,
                        reported,
                    });
                }
            }

            match self.orders.insert(&order).await {
                Ok(order) => {
                    info!(
                        order_id = %order.id,
                        order_ref = %order.provider_order_reference,
                        provider = %order.provider,
                        amount = order.amount,
                        "order created"
                    );
                    return Ok(order);
                }
                Err(e) if e.is_unique_violation() && attempt < REFERENCE_ATTEMPTS => {
                    warn!(attempt, "order reference collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Build the gateway request for a pending order owned by `customer_id`.
    /// Paying the same order again marks the request as a retry.
    pub async fn begin_payment(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> PaymentResult<OutboundRequest> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .filter(|o| o.customer_id == customer_id)
            .ok_or_else(|| PaymentError::OrderNotFound {
                reference: order_id.to_string(),
            })?;
        if !order.is_pending() {
            return Err(PaymentError::ValidationError {
                message: format!("order is already {}", order.status),
                field: None,
            });
        }

        let adapter = self.providers.get(order.provider)?;
        let email = self
            .catalog
            .customer(customer_id)
            .await?
            .and_then(|c| c.email);
        let is_retry = order.checkout_transaction_id.is_some();
        let request = adapter
            .build_outbound_request(&OrderSnapshot::from_order(&order, email, is_retry))
            .await?;

        if let OutboundRequest::Redirect {
            url,
            provider_transaction_id,
        } = &request
        {
            if self
                .orders
                .record_checkout_attempt(order.id, provider_transaction_id, url)
                .await?
                .is_none()
            {
                return Err(PaymentError::ValidationError {
                    message: "order is no longer pending".to_string(),
                    field: None,
                });
            }
        }

        info!(
            order_id = %order.id,
            order_ref = %order.provider_order_reference,
            provider = %order.provider,
            is_retry,
            "payment started"
        );
        Ok(request)
    }

    pub async fn checkout(
        &self,
        customer_id: Uuid,
        request: &CheckoutRequest,
    ) -> PaymentResult<(Order, OutboundRequest)> {
        let order = self.create_order(customer_id, request).await?;
        let outbound = self.begin_payment(order.id, customer_id).await?;
        Ok((order, outbound))
    }
}

/// Provider prefix + `MMDDhhmmss` + four random digits, e.g. `ORD10191230451234`.
pub fn generate_order_reference(provider: ProviderName) -> String {
    format!(
        "{}{}{}",
        provider.reference_prefix(),
        Utc::now().format("%m%d%H%M%S"),
        rand::thread_rng().gen_range(1000..=9999)
    )
}
