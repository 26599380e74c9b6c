//! External wallet provider (PayPal)
//!
//! Another synchronous adapter: the UI collects buyer approval and hands the
//! engine an approved order id, which is captured inline here. Uses raw
//! `reqwest` against the PayPal REST API.

use serde::Deserialize;

use crate::config::ProviderConfigStore;
use crate::error::{EngineError, EngineResult};
use crate::providers::{ChargeContext, ChargeOutcome, PaymentProvider};

const PAYPAL_API_BASE: &str = "https://api-m.paypal.com";

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    id: String,
    status: String,
}

/// Wallet charges captured against an approved PayPal order
#[derive(Clone)]
pub struct WalletProvider {
    config: ProviderConfigStore,
    http: reqwest::Client,
    api_base: String,
}

impl WalletProvider {
    pub fn new(config: ProviderConfigStore) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            api_base: PAYPAL_API_BASE.to_string(),
        }
    }

    /// Override the API base, e.g. for the sandbox environment
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn access_token(&self, client_id: &str, client_secret: &str) -> EngineResult<String> {
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Provider(format!(
                "paypal token request failed ({status}): {body}"
            )));
        }

        let token: OAuthTokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

impl PaymentProvider for WalletProvider {
    fn name(&self) -> &'static str {
        "wallet"
    }

    async fn charge(&self, amount_cents: i64, ctx: &ChargeContext) -> EngineResult<ChargeOutcome> {
        let config = self
            .config
            .get(ctx.community_id, passhub_shared::PaymentMethod::Wallet)
            .await?;
        let client_id = config.require_api_key()?;
        let client_secret = config.require_secret()?;

        let order_id = ctx.payment_token.as_deref().ok_or_else(|| {
            EngineError::Validation("wallet payment requires an approved order id".to_string())
        })?;

        let token = self.access_token(client_id, client_secret).await?;

        let response = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{order_id}/capture",
                self.api_base
            ))
            .bearer_auth(&token)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                community_id = %ctx.community_id,
                order_id = %order_id,
                status = %status,
                "Wallet capture rejected"
            );
            return Ok(ChargeOutcome::Failed {
                reason: format!("paypal capture failed ({status}): {body}"),
            });
        }

        let capture: CaptureResponse = response.json().await?;

        tracing::info!(
            community_id = %ctx.community_id,
            plan_id = %ctx.plan_id,
            telegram_user_id = %ctx.user.id,
            amount_cents = amount_cents,
            order_id = %capture.id,
            status = %capture.status,
            "Wallet charge captured"
        );

        if capture.status == "COMPLETED" {
            Ok(ChargeOutcome::Completed {
                reference: capture.id,
            })
        } else {
            Ok(ChargeOutcome::Failed {
                reason: format!("paypal capture ended in status {}", capture.status),
            })
        }
    }
}
