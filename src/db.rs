use crate::models::{ForwardMode, GlobalConfig, HeaderLayering, Replacement, Rule};
use crate::schedule::TimeWindow;
use crate::store::RuleStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{any::AnyPoolOptions, Any, FromRow, Pool};

const RULE_COLUMNS: &str = "id, source_spec, destination, active, mode, delay_seconds,
    block_links, block_mentions, block_media, block_forwarded, block_replies, block_service,
    remove_buttons, remove_caption, silent, suppress_link_preview,
    blacklist, whitelist, replacements, prefix, suffix, schedule_start, schedule_end,
    forwarded_count, last_triggered_at";

/// Flags are stored as 0/1 integers so both backends decode them the same way.
#[derive(Debug, FromRow)]
struct RuleRow {
    id: i64,
    source_spec: String,
    destination: Option<String>,
    active: i64,
    mode: String,
    delay_seconds: i64,
    block_links: i64,
    block_mentions: i64,
    block_media: i64,
    block_forwarded: i64,
    block_replies: i64,
    block_service: i64,
    remove_buttons: i64,
    remove_caption: i64,
    silent: i64,
    suppress_link_preview: i64,
    blacklist: String,  // JSON array
    whitelist: String,  // JSON array
    replacements: String, // JSON array of {find, replace}
    prefix: String,
    suffix: String,
    schedule_start: Option<String>,
    schedule_end: Option<String>,
    forwarded_count: i64,
    last_triggered_at: Option<i64>,
}

impl TryFrom<RuleRow> for Rule {
    type Error = anyhow::Error;

    fn try_from(row: RuleRow) -> Result<Self> {
        let replacements: Vec<Replacement> = serde_json::from_str(&row.replacements)
            .with_context(|| format!("Corrupt replacements for rule {}", row.id))?;
        let blacklist: Vec<String> = serde_json::from_str(&row.blacklist)
            .with_context(|| format!("Corrupt blacklist for rule {}", row.id))?;
        let whitelist: Vec<String> = serde_json::from_str(&row.whitelist)
            .with_context(|| format!("Corrupt whitelist for rule {}", row.id))?;

        Ok(Rule {
            id: row.id,
            source_spec: row.source_spec,
            destination: row.destination.filter(|d| !d.trim().is_empty()),
            active: row.active != 0,
            mode: ForwardMode::parse(&row.mode).unwrap_or_default(),
            delay_seconds: u32::try_from(row.delay_seconds.max(0)).unwrap_or(u32::MAX),
            block_links: row.block_links != 0,
            block_mentions: row.block_mentions != 0,
            block_media: row.block_media != 0,
            block_forwarded: row.block_forwarded != 0,
            block_replies: row.block_replies != 0,
            block_service: row.block_service != 0,
            remove_buttons: row.remove_buttons != 0,
            remove_caption: row.remove_caption != 0,
            silent: row.silent != 0,
            suppress_link_preview: row.suppress_link_preview != 0,
            blacklist,
            whitelist,
            replacements,
            prefix: row.prefix,
            suffix: row.suffix,
            schedule_window: TimeWindow::from_columns(
                row.schedule_start.as_deref(),
                row.schedule_end.as_deref(),
            )?,
            forwarded_count: row.forwarded_count,
            last_triggered_at: row.last_triggered_at.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
        })
    }
}

#[derive(Debug, FromRow)]
struct GlobalConfigRow {
    admin_id: Option<i64>,
    global_header: String,
    global_footer: String,
    header_layering: String,
    sleep_start: Option<String>,
    sleep_end: Option<String>,
    schedule_active: i64,
    forwarding_active: i64,
    dedup_enabled: i64,
    default_mode: String,
    source_spec: String,
    destination: Option<String>,
    delay_seconds: i64,
    block_links: i64,
    block_mentions: i64,
    replacements: String, // JSON array of {find, replace}
    blacklist: String,    // JSON array
    whitelist: String,    // JSON array
}

impl TryFrom<GlobalConfigRow> for GlobalConfig {
    type Error = anyhow::Error;

    fn try_from(row: GlobalConfigRow) -> Result<Self> {
        let replacements: Vec<Replacement> =
            serde_json::from_str(&row.replacements).context("Corrupt global replacements")?;
        let blacklist: Vec<String> = serde_json::from_str(&row.blacklist).context("Corrupt global blacklist")?;
        let whitelist: Vec<String> = serde_json::from_str(&row.whitelist).context("Corrupt global whitelist")?;

        Ok(GlobalConfig {
            admin_id: row.admin_id,
            global_header: row.global_header,
            global_footer: row.global_footer,
            header_layering: HeaderLayering::parse(&row.header_layering).unwrap_or_default(),
            sleep_window: TimeWindow::from_columns(row.sleep_start.as_deref(), row.sleep_end.as_deref())?,
            schedule_active: row.schedule_active != 0,
            forwarding_active: row.forwarding_active != 0,
            dedup_enabled: row.dedup_enabled != 0,
            default_mode: ForwardMode::parse(&row.default_mode).unwrap_or_default(),
            source_spec: row.source_spec,
            destination: row.destination.filter(|d| !d.trim().is_empty()),
            delay_seconds: u32::try_from(row.delay_seconds.max(0)).unwrap_or(u32::MAX),
            block_links: row.block_links != 0,
            block_mentions: row.block_mentions != 0,
            replacements,
            blacklist,
            whitelist,
        })
    }
}

fn flag(b: bool) -> i64 {
    i64::from(b)
}

fn json_text<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode column as JSON")
}

#[derive(Clone)]
pub struct Db {
    pub pool: Pool<Any>,
}

impl Db {
    pub async fn new(database_url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        // Every connection to an in-memory SQLite database sees its own empty database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let is_sqlite = self.pool.connect_options().database_url.scheme() == "sqlite";

        let create_rules = if is_sqlite {
            "CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_spec TEXT NOT NULL,
                destination TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                mode TEXT NOT NULL DEFAULT 'forward',
                delay_seconds INTEGER NOT NULL DEFAULT 0,
                block_links INTEGER NOT NULL DEFAULT 0,
                block_mentions INTEGER NOT NULL DEFAULT 0,
                block_media INTEGER NOT NULL DEFAULT 0,
                block_forwarded INTEGER NOT NULL DEFAULT 0,
                block_replies INTEGER NOT NULL DEFAULT 0,
                block_service INTEGER NOT NULL DEFAULT 0,
                remove_buttons INTEGER NOT NULL DEFAULT 0,
                remove_caption INTEGER NOT NULL DEFAULT 0,
                silent INTEGER NOT NULL DEFAULT 0,
                suppress_link_preview INTEGER NOT NULL DEFAULT 0,
                blacklist TEXT NOT NULL DEFAULT '[]',
                whitelist TEXT NOT NULL DEFAULT '[]',
                replacements TEXT NOT NULL DEFAULT '[]',
                prefix TEXT NOT NULL DEFAULT '',
                suffix TEXT NOT NULL DEFAULT '',
                schedule_start TEXT,
                schedule_end TEXT,
                forwarded_count INTEGER NOT NULL DEFAULT 0,
                last_triggered_at INTEGER
            )"
        } else {
            "CREATE TABLE IF NOT EXISTS rules (
                id BIGSERIAL PRIMARY KEY,
                source_spec TEXT NOT NULL,
                destination TEXT,
                active BIGINT NOT NULL DEFAULT 1,
                mode TEXT NOT NULL DEFAULT 'forward',
                delay_seconds BIGINT NOT NULL DEFAULT 0,
                block_links BIGINT NOT NULL DEFAULT 0,
                block_mentions BIGINT NOT NULL DEFAULT 0,
                block_media BIGINT NOT NULL DEFAULT 0,
                block_forwarded BIGINT NOT NULL DEFAULT 0,
                block_replies BIGINT NOT NULL DEFAULT 0,
                block_service BIGINT NOT NULL DEFAULT 0,
                remove_buttons BIGINT NOT NULL DEFAULT 0,
                remove_caption BIGINT NOT NULL DEFAULT 0,
                silent BIGINT NOT NULL DEFAULT 0,
                suppress_link_preview BIGINT NOT NULL DEFAULT 0,
                blacklist TEXT NOT NULL DEFAULT '[]',
                whitelist TEXT NOT NULL DEFAULT '[]',
                replacements TEXT NOT NULL DEFAULT '[]',
                prefix TEXT NOT NULL DEFAULT '',
                suffix TEXT NOT NULL DEFAULT '',
                schedule_start TEXT,
                schedule_end TEXT,
                forwarded_count BIGINT NOT NULL DEFAULT 0,
                last_triggered_at BIGINT
            )"
        };
        sqlx::query(create_rules).execute(&self.pool).await?;

        let create_global = if is_sqlite {
            "CREATE TABLE IF NOT EXISTS global_config (
                id INTEGER PRIMARY KEY,
                admin_id INTEGER,
                global_header TEXT NOT NULL DEFAULT '',
                global_footer TEXT NOT NULL DEFAULT '',
                header_layering TEXT NOT NULL DEFAULT 'fallback',
                sleep_start TEXT,
                sleep_end TEXT,
                schedule_active INTEGER NOT NULL DEFAULT 0,
                forwarding_active INTEGER NOT NULL DEFAULT 1,
                dedup_enabled INTEGER NOT NULL DEFAULT 1,
                default_mode TEXT NOT NULL DEFAULT 'forward',
                source_spec TEXT NOT NULL DEFAULT '',
                destination TEXT,
                delay_seconds INTEGER NOT NULL DEFAULT 0,
                block_links INTEGER NOT NULL DEFAULT 0,
                block_mentions INTEGER NOT NULL DEFAULT 0,
                replacements TEXT NOT NULL DEFAULT '[]',
                blacklist TEXT NOT NULL DEFAULT '[]',
                whitelist TEXT NOT NULL DEFAULT '[]'
            )"
        } else {
            "CREATE TABLE IF NOT EXISTS global_config (
                id BIGINT PRIMARY KEY,
                admin_id BIGINT,
                global_header TEXT NOT NULL DEFAULT '',
                global_footer TEXT NOT NULL DEFAULT '',
                header_layering TEXT NOT NULL DEFAULT 'fallback',
                sleep_start TEXT,
                sleep_end TEXT,
                schedule_active BIGINT NOT NULL DEFAULT 0,
                forwarding_active BIGINT NOT NULL DEFAULT 1,
                dedup_enabled BIGINT NOT NULL DEFAULT 1,
                default_mode TEXT NOT NULL DEFAULT 'forward',
                source_spec TEXT NOT NULL DEFAULT '',
                destination TEXT,
                delay_seconds BIGINT NOT NULL DEFAULT 0,
                block_links BIGINT NOT NULL DEFAULT 0,
                block_mentions BIGINT NOT NULL DEFAULT 0,
                replacements TEXT NOT NULL DEFAULT '[]',
                blacklist TEXT NOT NULL DEFAULT '[]',
                whitelist TEXT NOT NULL DEFAULT '[]'
            )"
        };
        sqlx::query(create_global).execute(&self.pool).await?;

        Ok(())
    }

    async fn fetch_rules(&self, only_active: bool) -> Result<Vec<Rule>> {
        let sql = if only_active {
            format!("SELECT {} FROM rules WHERE active = 1 ORDER BY id", RULE_COLUMNS)
        } else {
            format!("SELECT {} FROM rules ORDER BY id", RULE_COLUMNS)
        };
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Rule::try_from).collect()
    }
}

#[async_trait]
impl RuleStore for Db {
    async fn list_active_rules(&self) -> Result<Vec<Rule>> {
        self.fetch_rules(true).await
    }

    async fn list_rules(&self) -> Result<Vec<Rule>> {
        self.fetch_rules(false).await
    }

    async fn get_rule(&self, id: i64) -> Result<Option<Rule>> {
        let row = sqlx::query_as::<_, RuleRow>(&format!("SELECT {} FROM rules WHERE id = $1", RULE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Rule::try_from).transpose()
    }

    async fn create_rule(&self, rule: &Rule) -> Result<Rule> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO rules (source_spec, destination, mode) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&rule.source_spec)
        .bind(rule.destination.clone())
        .bind(rule.mode.as_str())
        .fetch_one(&self.pool)
        .await?;

        let created = Rule { id, ..rule.clone() };
        self.save_rule(&created).await?;
        tracing::info!(rule_id = id, source = %created.source_spec, "Rule created");
        Ok(created)
    }

    async fn save_rule(&self, rule: &Rule) -> Result<()> {
        sqlx::query(
            "UPDATE rules SET
                source_spec = $1, destination = $2, active = $3, mode = $4, delay_seconds = $5,
                block_links = $6, block_mentions = $7, block_media = $8, block_forwarded = $9,
                block_replies = $10, block_service = $11,
                remove_buttons = $12, remove_caption = $13, silent = $14, suppress_link_preview = $15,
                blacklist = $16, whitelist = $17, replacements = $18, prefix = $19, suffix = $20,
                schedule_start = $21, schedule_end = $22,
                forwarded_count = $23, last_triggered_at = $24
             WHERE id = $25",
        )
        .bind(&rule.source_spec)
        .bind(rule.destination.clone())
        .bind(flag(rule.active))
        .bind(rule.mode.as_str())
        .bind(i64::from(rule.delay_seconds))
        .bind(flag(rule.block_links))
        .bind(flag(rule.block_mentions))
        .bind(flag(rule.block_media))
        .bind(flag(rule.block_forwarded))
        .bind(flag(rule.block_replies))
        .bind(flag(rule.block_service))
        .bind(flag(rule.remove_buttons))
        .bind(flag(rule.remove_caption))
        .bind(flag(rule.silent))
        .bind(flag(rule.suppress_link_preview))
        .bind(json_text(&rule.blacklist)?)
        .bind(json_text(&rule.whitelist)?)
        .bind(json_text(&rule.replacements)?)
        .bind(&rule.prefix)
        .bind(&rule.suffix)
        .bind(rule.schedule_window.map(|w| w.start_column()))
        .bind(rule.schedule_window.map(|w| w.end_column()))
        .bind(rule.forwarded_count)
        .bind(rule.last_triggered_at.map(|t| t.timestamp()))
        .bind(rule.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_rule(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        tracing::info!(rule_id = id, "Rule deleted");
        Ok(())
    }

    async fn record_forward(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE rules SET forwarded_count = forwarded_count + 1, last_triggered_at = $1 WHERE id = $2",
        )
        .bind(at.timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_global_config(&self) -> Result<GlobalConfig> {
        let row = sqlx::query_as::<_, GlobalConfigRow>(
            "SELECT admin_id, global_header, global_footer, header_layering, sleep_start, sleep_end,
                    schedule_active, forwarding_active, dedup_enabled, default_mode,
                    source_spec, destination, delay_seconds, block_links, block_mentions,
                    replacements, blacklist, whitelist
             FROM global_config WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => GlobalConfig::try_from(row),
            None => Ok(GlobalConfig::default()),
        }
    }

    async fn save_global_config(&self, config: &GlobalConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO global_config (id, admin_id, global_header, global_footer, header_layering,
                sleep_start, sleep_end, schedule_active, forwarding_active, dedup_enabled, default_mode,
                source_spec, destination, delay_seconds, block_links, block_mentions,
                replacements, blacklist, whitelist)
             VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
             ON CONFLICT(id) DO UPDATE SET admin_id = $1, global_header = $2, global_footer = $3,
                header_layering = $4, sleep_start = $5, sleep_end = $6, schedule_active = $7,
                forwarding_active = $8, dedup_enabled = $9, default_mode = $10,
                source_spec = $11, destination = $12, delay_seconds = $13, block_links = $14,
                block_mentions = $15, replacements = $16, blacklist = $17, whitelist = $18",
        )
        .bind(config.admin_id)
        .bind(&config.global_header)
        .bind(&config.global_footer)
        .bind(config.header_layering.as_str())
        .bind(config.sleep_window.map(|w| w.start_column()))
        .bind(config.sleep_window.map(|w| w.end_column()))
        .bind(flag(config.schedule_active))
        .bind(flag(config.forwarding_active))
        .bind(flag(config.dedup_enabled))
        .bind(config.default_mode.as_str())
        .bind(&config.source_spec)
        .bind(config.destination.clone())
        .bind(i64::from(config.delay_seconds))
        .bind(flag(config.block_links))
        .bind(flag(config.block_mentions))
        .bind(json_text(&config.replacements)?)
        .bind(json_text(&config.blacklist)?)
        .bind(json_text(&config.whitelist)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> Db {
        Db::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_assigns_ids_and_keeps_fields() {
        let db = memory_db().await;

        let mut rule = Rule::new("-100111, @news", Some("-100222".into()), ForwardMode::Copy);
        rule.blacklist = vec!["spam".into()];
        rule.replacements = vec![Replacement::new("foo", "bar"), Replacement::new("bar", "baz")];
        rule.schedule_window = Some("22:00-06:00".parse().unwrap());
        rule.delay_seconds = 5;
        rule.silent = true;

        let first = db.create_rule(&rule).await.unwrap();
        let second = db.create_rule(&rule).await.unwrap();
        assert_ne!(first.id, second.id);

        let loaded = db.get_rule(first.id).await.unwrap().unwrap();
        assert_eq!(loaded, first);
        assert_eq!(loaded.replacements[1], Replacement::new("bar", "baz"));
    }

    #[tokio::test]
    async fn inactive_and_deleted_rules_are_not_listed() {
        let db = memory_db().await;
        let kept = db
            .create_rule(&Rule::new("-1", Some("-2".into()), ForwardMode::Forward))
            .await
            .unwrap();
        let mut paused = db
            .create_rule(&Rule::new("-3", Some("-4".into()), ForwardMode::Forward))
            .await
            .unwrap();
        paused.active = false;
        db.save_rule(&paused).await.unwrap();
        let gone = db
            .create_rule(&Rule::new("-5", None, ForwardMode::Forward))
            .await
            .unwrap();
        db.delete_rule(gone.id).await.unwrap();

        let active: Vec<i64> = db.list_active_rules().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(active, vec![kept.id]);
        assert_eq!(db.list_rules().await.unwrap().len(), 2);
        assert!(db.get_rule(gone.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn global_config_defaults_then_persists() {
        let db = memory_db().await;
        assert_eq!(db.get_global_config().await.unwrap(), GlobalConfig::default());

        let config = GlobalConfig {
            admin_id: Some(42),
            global_header: "HEAD".into(),
            header_layering: HeaderLayering::Stacked,
            sleep_window: Some("23:00-07:00".parse().unwrap()),
            schedule_active: true,
            forwarding_active: false,
            ..Default::default()
        };
        db.save_global_config(&config).await.unwrap();
        db.save_global_config(&config).await.unwrap();
        assert_eq!(db.get_global_config().await.unwrap(), config);
    }

    #[tokio::test]
    async fn stats_round_trip() {
        let db = memory_db().await;
        let mut rule = db
            .create_rule(&Rule::new("-1", Some("-2".into()), ForwardMode::Forward))
            .await
            .unwrap();
        rule.forwarded_count = 3;
        rule.last_triggered_at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0);
        db.save_rule(&rule).await.unwrap();

        let loaded = db.get_rule(rule.id).await.unwrap().unwrap();
        assert_eq!(loaded.forwarded_count, 3);
        assert_eq!(loaded.last_triggered_at, rule.last_triggered_at);
    }

    #[tokio::test]
    async fn record_forward_keeps_other_edits() {
        let db = memory_db().await;
        let stale = db
            .create_rule(&Rule::new("-1", Some("-2".into()), ForwardMode::Forward))
            .await
            .unwrap();

        let mut edited = stale.clone();
        edited.destination = Some("-3".into());
        edited.blacklist = vec!["spam".into()];
        db.save_rule(&edited).await.unwrap();

        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        assert!(db.record_forward(stale.id, at).await.unwrap());
        assert!(db.record_forward(stale.id, at).await.unwrap());

        let loaded = db.get_rule(stale.id).await.unwrap().unwrap();
        assert_eq!(loaded.forwarded_count, 2);
        assert_eq!(loaded.last_triggered_at, Some(at));
        assert_eq!(loaded.destination.as_deref(), Some("-3"));
        assert_eq!(loaded.blacklist, vec!["spam".to_string()]);

        db.delete_rule(stale.id).await.unwrap();
        assert!(!db.record_forward(stale.id, at).await.unwrap());
    }

    #[tokio::test]
    async fn global_fallback_route_persists() {
        let db = memory_db().await;
        let config = GlobalConfig {
            source_spec: "-100111".into(),
            destination: Some("@mirror".into()),
            delay_seconds: 15,
            block_links: true,
            replacements: vec![Replacement::new("old", "new")],
            blacklist: vec!["ads".into()],
            whitelist: vec!["deal".into()],
            ..Default::default()
        };
        db.save_global_config(&config).await.unwrap();
        assert_eq!(db.get_global_config().await.unwrap(), config);
    }
}
