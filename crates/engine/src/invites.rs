//! Invite link provisioning
//!
//! Fetches the cached invite link for a community or asks the external
//! invite-issuing function for a fresh one. Group communities come back as a
//! bundle of per-channel links; that distinction is preserved all the way to
//! the caller. Provisioning failure after a successful payment is a
//! degraded-success support case, so every failure path here resolves to
//! `Ok(None)` rather than an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use passhub_shared::{ChannelInvite, InviteLinkBundle};
use serde::Deserialize;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use crate::error::EngineResult;

/// Response shape of the invite-issuing function
///
/// Either `{"inviteLink": "..."}` for a single community or
/// `{"isGroup": true, "groupName": ..., "channels": [...]}` for a group.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueResponse {
    invite_link: Option<String>,
    #[serde(default)]
    is_group: bool,
    group_name: Option<String>,
    main_group_link: Option<String>,
    channels: Option<Vec<ChannelInvite>>,
}

impl IssueResponse {
    fn into_bundle(self) -> Option<InviteLinkBundle> {
        if self.is_group {
            return Some(InviteLinkBundle::Group {
                group_name: self.group_name.unwrap_or_default(),
                main_group_link: self.main_group_link,
                channels: self.channels.unwrap_or_default(),
            });
        }
        self.invite_link
            .filter(|l| !l.is_empty())
            .map(InviteLinkBundle::Single)
    }
}

/// Idempotent invite-link provisioning per community
#[derive(Clone)]
pub struct InviteLinkProvisioner {
    pool: PgPool,
    http: reqwest::Client,
    function_url: String,
    // Serializes provisioning per community so two concurrent payments
    // never both create a link for the same paid slot
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl InviteLinkProvisioner {
    pub fn new(pool: PgPool, function_url: impl Into<String>) -> Self {
        Self {
            pool,
            http: reqwest::Client::new(),
            function_url: function_url.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn lock_for(&self, community_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(community_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return the community's invite link, creating one if needed
    ///
    /// With `force_new = false` an existing stored link is returned
    /// unchanged; with `force_new = true` the issuing function is always
    /// asked for a fresh link (each new payment does this exactly once so a
    /// revoked or previously shared link is never handed to a new buyer).
    pub async fn fetch_or_create(
        &self,
        community_id: Uuid,
        force_new: bool,
    ) -> EngineResult<Option<InviteLinkBundle>> {
        let lock = self.lock_for(community_id).await;
        let _guard = lock.lock().await;

        if !force_new {
            if let Some(existing) = self.stored_bundle(community_id).await? {
                return Ok(Some(existing));
            }
        }

        let Some(bundle) = self.issue_remote(community_id, force_new).await else {
            return Ok(None);
        };

        if let Err(e) = self.store_bundle(community_id, &bundle).await {
            // The link is still valid for this buyer; only the cache missed
            tracing::warn!(
                community_id = %community_id,
                error = %e,
                "Failed to cache issued invite link"
            );
        }

        Ok(Some(bundle))
    }

    async fn stored_bundle(&self, community_id: Uuid) -> EngineResult<Option<InviteLinkBundle>> {
        let raw: Option<Option<String>> =
            sqlx::query_scalar("SELECT invite_link FROM communities WHERE id = $1")
                .bind(community_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(raw
            .flatten()
            .as_deref()
            .and_then(InviteLinkBundle::from_column_value))
    }

    async fn store_bundle(
        &self,
        community_id: Uuid,
        bundle: &InviteLinkBundle,
    ) -> EngineResult<()> {
        let value = bundle.to_column_value()?;
        sqlx::query("UPDATE communities SET invite_link = $1 WHERE id = $2")
            .bind(value)
            .bind(community_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Call the issuing function; any failure resolves to `None`
    async fn issue_remote(&self, community_id: Uuid, force_new: bool) -> Option<InviteLinkBundle> {
        let strategy = ExponentialBackoff::from_millis(200)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(3);

        let request = || async {
            let response = self
                .http
                .post(&self.function_url)
                .json(&serde_json::json!({
                    "communityId": community_id,
                    "forceNew": force_new,
                }))
                .send()
                .await?;
            response.error_for_status()?.json::<IssueResponse>().await
        };

        match Retry::spawn(strategy, request).await {
            Ok(response) => {
                let bundle = response.into_bundle();
                if bundle.is_none() {
                    tracing::warn!(
                        community_id = %community_id,
                        "Invite function responded without a usable link"
                    );
                }
                bundle
            }
            Err(e) => {
                tracing::error!(
                    community_id = %community_id,
                    error = %e,
                    "Invite function call failed"
                );
                None
            }
        }
    }
}
