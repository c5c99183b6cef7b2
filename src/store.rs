use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{GlobalConfig, Rule};

/// Persistence for rules and the global configuration.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_active_rules(&self) -> Result<Vec<Rule>>;

    async fn list_rules(&self) -> Result<Vec<Rule>>;

    async fn get_rule(&self, id: i64) -> Result<Option<Rule>>;

    /// Inserts `rule` and returns it with its new id.
    async fn create_rule(&self, rule: &Rule) -> Result<Rule>;

    async fn save_rule(&self, rule: &Rule) -> Result<()>;

    async fn delete_rule(&self, id: i64) -> Result<()>;

    /// Bumps `forwarded_count` and sets `last_triggered_at` in one write,
    /// leaving every other column alone. Returns false if the rule is gone.
    async fn record_forward(&self, id: i64, at: DateTime<Utc>) -> Result<bool>;

    async fn get_global_config(&self) -> Result<GlobalConfig>;

    async fn save_global_config(&self, config: &GlobalConfig) -> Result<()>;
}
