use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

/// Outbound HTTP client for provider APIs.
///
/// Every request carries an explicit timeout. Timeouts and connection failures
/// surface as `ProviderUnavailable`; only 5xx responses are retried, and only
/// when `max_retries` is non-zero.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            PaymentError::ProviderUnavailable {
                provider: provider.to_string(),
                message: format!("failed to initialize HTTP client: {}", e),
                timed_out: false,
            }
        })?;

        Ok(Self {
            client,
            provider,
            timeout,
            max_retries,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a pre-serialized JSON body. The body is passed as text because
    /// signed requests must transmit exactly the bytes that were signed.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&str>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut attempt = 0;
        loop {
            let mut request = self.client.request(method.clone(), url).timeout(self.timeout);
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            if let Some(payload) = body {
                request = request
                    .header("Content-Type", "application/json")
                    .body(payload.to_string());
            }

            let resp = request.send().await.map_err(|e| self.transport_error(e))?;
            let status = resp.status();
            let text = resp.text().await.map_err(|e| self.transport_error(e))?;

            if status.is_success() {
                return serde_json::from_str::<T>(&text).map_err(|e| PaymentError::ProviderError {
                    provider: self.provider.to_string(),
                    message: format!("invalid provider JSON response: {}", e),
                    provider_code: None,
                    retryable: false,
                });
            }

            if status.is_server_error() && attempt < self.max_retries {
                warn!(
                    provider = self.provider,
                    status = %status,
                    attempt = attempt + 1,
                    "provider server error, retrying"
                );
                tokio::time::sleep(Duration::from_millis(250 << attempt)).await;
                attempt += 1;
                continue;
            }

            return Err(PaymentError::ProviderError {
                provider: self.provider.to_string(),
                message: format!("HTTP {}: {}", status, text),
                provider_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            });
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> PaymentError {
        let timed_out = e.is_timeout();
        warn!(
            provider = self.provider,
            timed_out,
            error = %e,
            "provider request failed"
        );
        PaymentError::ProviderUnavailable {
            provider: self.provider.to_string(),
            message: if timed_out {
                format!("no response within {}s", self.timeout.as_secs())
            } else {
                format!("provider request failed: {}", e)
            },
            timed_out,
        }
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
