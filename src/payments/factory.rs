use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::ProviderAdapter;
use crate::payments::providers::{LinepayAdapter, NewebpayAdapter};
use crate::payments::types::ProviderName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Adapters keyed by provider. Built once at startup and shared.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderName, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name(), adapter);
    }

    /// Build every provider listed in `ENABLED_PAYMENT_PROVIDERS`
    /// (default `newebpay,linepay`). A listed provider whose credentials are
    /// missing is an error.
    pub fn from_env() -> PaymentResult<Self> {
        let enabled_raw = std::env::var("ENABLED_PAYMENT_PROVIDERS")
            .unwrap_or_else(|_| "newebpay,linepay".to_string());

        let mut registry = Self::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let adapter: Arc<dyn ProviderAdapter> = match ProviderName::from_str(value)? {
                ProviderName::Newebpay => Arc::new(NewebpayAdapter::from_env()?),
                ProviderName::Linepay => Arc::new(LinepayAdapter::from_env()?),
            };
            info!(provider = %adapter.name(), "payment provider enabled");
            registry.register(adapter);
        }

        if registry.adapters.is_empty() {
            warn!("no payment providers enabled");
        }
        Ok(registry)
    }

    pub fn get(&self, provider: ProviderName) -> PaymentResult<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&provider)
            .cloned()
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("provider {} is disabled", provider),
                field: Some("provider".to_string()),
            })
    }

    pub fn list_available_providers(&self) -> Vec<ProviderName> {
        let mut names: Vec<ProviderName> = self.adapters.keys().copied().collect();
        names.sort_by_key(|p| p.as_str());
        names
    }
}
