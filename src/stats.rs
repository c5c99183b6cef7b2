use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use teloxide::types::ChatId;

use crate::error::DispatchError;
use crate::models::FALLBACK_RULE_ID;
use crate::store::RuleStore;
use crate::transport::Transport;

/// Updates rule counters after dispatch and tells the admin about failures.
#[derive(Clone)]
pub struct StatsRecorder {
    store: Arc<dyn RuleStore>,
    transport: Arc<dyn Transport>,
}

impl StatsRecorder {
    pub fn new(store: Arc<dyn RuleStore>, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    /// Bumps `forwarded_count` and `last_triggered_at`. A rule deleted in the
    /// meantime is left alone; the fallback route keeps no stats.
    pub async fn record_success(&self, rule_id: i64, at: DateTime<Utc>) -> Result<()> {
        if rule_id == FALLBACK_RULE_ID {
            return Ok(());
        }
        if !self.store.record_forward(rule_id, at).await? {
            tracing::debug!(rule_id, "Rule vanished before stats update");
        }
        Ok(())
    }

    /// Best-effort notice to the admin. Never fails the caller.
    pub async fn report_failure(&self, admin_id: Option<i64>, rule_id: i64, error: &DispatchError) {
        let Some(admin_id) = admin_id else {
            tracing::warn!(rule_id, error = %error, "No admin configured to notify");
            return;
        };

        let text = if rule_id == FALLBACK_RULE_ID {
            format!("⚠️ Global fallback route failed:\n{}", error)
        } else {
            format!("⚠️ Forwarding rule #{} failed:\n{}", rule_id, error)
        };
        if let Err(e) = self.transport.notify_admin(ChatId(admin_id), &text).await {
            tracing::warn!(rule_id, admin_id, error = %e, "Failed to notify admin");
        }
    }
}
