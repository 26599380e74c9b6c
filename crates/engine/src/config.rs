//! Per-community payment provider configuration
//!
//! Each community configures its providers independently (its own Stripe
//! keys, its own wallet credentials). A missing or disabled row is a
//! configuration error surfaced to the buyer as "payment method not
//! available" and never a crash; the other methods stay selectable.

use passhub_shared::PaymentMethod;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Provider credentials and settings for one (community, provider) pair
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProviderConfig {
    pub community_id: Uuid,
    pub provider: PaymentMethod,
    /// Public/publishable key (or client id for wallet providers)
    pub api_key: Option<String>,
    /// Secret key (or client secret); required to charge
    pub secret_key: Option<String>,
    /// Base URL the buyer is sent to for redirect providers
    pub callback_url: Option<String>,
    pub enabled: bool,
}

impl ProviderConfig {
    /// The secret key, or a config error naming the provider
    pub fn require_secret(&self) -> EngineResult<&str> {
        self.secret_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                EngineError::Config(format!("{} secret key not configured", self.provider))
            })
    }

    /// The public key / client id, or a config error naming the provider
    pub fn require_api_key(&self) -> EngineResult<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| EngineError::Config(format!("{} api key not configured", self.provider)))
    }

    pub fn require_callback_url(&self) -> EngineResult<&str> {
        self.callback_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                EngineError::Config(format!("{} callback url not configured", self.provider))
            })
    }
}

/// Read-side store for provider configuration rows
#[derive(Clone)]
pub struct ProviderConfigStore {
    pool: PgPool,
}

impl ProviderConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch the enabled config for a community/provider pair
    pub async fn get(
        &self,
        community_id: Uuid,
        provider: PaymentMethod,
    ) -> EngineResult<ProviderConfig> {
        let config: Option<ProviderConfig> = sqlx::query_as(
            r#"
            SELECT community_id, provider, api_key, secret_key, callback_url, enabled
            FROM payment_provider_config
            WHERE community_id = $1 AND provider = $2
            "#,
        )
        .bind(community_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;

        let config = config.ok_or_else(|| {
            EngineError::Config(format!(
                "{provider} is not configured for community {community_id}"
            ))
        })?;

        if !config.enabled {
            return Err(EngineError::Config(format!(
                "{provider} is disabled for community {community_id}"
            )));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            community_id: Uuid::new_v4(),
            provider: PaymentMethod::Card,
            api_key: Some("pk_test_123".to_string()),
            secret_key: secret.map(str::to_string),
            callback_url: None,
            enabled: true,
        }
    }

    #[test]
    fn missing_secret_is_a_config_error() {
        let err = config(None).require_secret().unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let err = config(Some("")).require_secret().unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn present_secret_passes() {
        let cfg = config(Some("sk_test_123"));
        assert_eq!(cfg.require_secret().unwrap(), "sk_test_123");
    }
}
