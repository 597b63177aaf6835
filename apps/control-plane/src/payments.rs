// [apps/control-plane/src/payments.rs]
//! `PaymentCharger` backed by a processor HTTP API, in the same
//! bearer/JSON/timeout shape as the node command bus client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{instrument, warn};
use wopr_billing::BillingError;
use wopr_core::Credit;

pub struct HttpPaymentCharger {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpPaymentCharger {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .user_agent("wopr-control-plane/payments")
                .build()
                .expect("reqwest client must build with static config"),
            endpoint,
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct ChargeResponse {
    id: String,
}

#[async_trait]
impl wopr_billing::PaymentCharger for HttpPaymentCharger {
    #[instrument(skip(self))]
    async fn charge(&self, payment_method_ref: &str, amount: Credit) -> Result<String, BillingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .form(&[
                ("amount", amount.cents().to_string()),
                ("currency", "usd".to_string()),
                ("payment_method", payment_method_ref.to_string()),
                ("confirm", "true".to_string()),
            ])
            .send()
            .await
            .map_err(|e| BillingError::Validation(format!("payment processor unreachable: {e}")))?;

        if !response.status().is_success() {
            warn!("payment processor rejected charge: {}", response.status());
            return Err(BillingError::Validation(format!("payment processor returned {}", response.status())));
        }

        let parsed: ChargeResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Validation(format!("malformed payment processor response: {e}")))?;
        Ok(parsed.id)
    }
}
