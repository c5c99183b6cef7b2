use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use tokio::task::JoinSet;

use crate::dedup::DedupCache;
use crate::error::DispatchError;
use crate::filters::{self, FilterContext, SkipReason};
use crate::logging::Timer;
use crate::matcher::{source_matches, SourceMatching};
use crate::models::{GlobalConfig, InboundMessage, Rule};
use crate::planner::{self, Plan, PlanError};
use crate::stats::StatsRecorder;
use crate::store::RuleStore;
use crate::transform::transform;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub offset: FixedOffset,
    pub source_matching: SourceMatching,
    pub dedup_ttl: Duration,
    /// Used when the stored configuration has no admin.
    pub fallback_admin: Option<i64>,
}

/// Rules and global config as of the last refresh. Never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub rules: Vec<Rule>,
    pub global: GlobalConfig,
    /// Global route tried when no rule claims a message.
    pub fallback: Option<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Skipped(SkipReason),
    Misconfigured,
    Scheduled { plan: &'static str, delay: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub rule_id: i64,
    pub verdict: Verdict,
}

#[derive(Debug)]
pub struct DispatchReport {
    pub rule_id: i64,
    pub result: Result<&'static str, DispatchError>,
}

/// Everything one inbound message turned into.
pub struct FanOut {
    /// Set when a global check stopped every rule.
    pub halted: Option<SkipReason>,
    pub outcomes: Vec<RuleOutcome>,
    tasks: JoinSet<DispatchReport>,
}

impl FanOut {
    fn new() -> Self {
        Self {
            halted: None,
            outcomes: Vec::new(),
            tasks: JoinSet::new(),
        }
    }

    fn halted(reason: SkipReason) -> Self {
        let mut fan_out = Self::new();
        fan_out.halted = Some(reason);
        fan_out
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every dispatch task. Order follows completion, not rules.
    pub async fn join(mut self) -> Vec<DispatchReport> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!(error = %e, "Dispatch task aborted"),
            }
        }
        reports
    }

    /// Lets the tasks run on their own and logs a summary once they finish.
    pub fn detach(self, chat_id: i64, message_id: i32) {
        if self.tasks.is_empty() {
            return;
        }
        tokio::spawn(async move {
            let reports = self.join().await;
            let failed = reports.iter().filter(|r| r.result.is_err()).count();
            tracing::info!(
                chat_id,
                message_id,
                delivered = reports.len() - failed,
                failed,
                "Fan-out finished"
            );
        });
    }
}

struct DispatchJob {
    rule_id: i64,
    delay: Duration,
    plan: Plan,
    admin_id: Option<i64>,
    transport: Arc<dyn Transport>,
    stats: StatsRecorder,
}

impl DispatchJob {
    async fn run(self) -> DispatchReport {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let rule_id = self.rule_id;
        let kind = self.plan.name();
        let destination = format!("{:?}", self.plan.destination());
        match self.plan.execute(self.transport.as_ref()).await {
            Ok(()) => {
                tracing::info!(rule_id, plan = kind, %destination, "Message relayed");
                if let Err(e) = self.stats.record_success(rule_id, Utc::now()).await {
                    tracing::warn!(rule_id, error = %e, "Failed to update rule stats");
                }
                DispatchReport {
                    rule_id,
                    result: Ok(kind),
                }
            }
            Err(e) => {
                let error = DispatchError::from(e);
                tracing::error!(rule_id, plan = kind, %destination, error = %error, "Dispatch failed");
                self.stats.report_failure(self.admin_id, rule_id, &error).await;
                DispatchReport {
                    rule_id,
                    result: Err(error),
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn RuleStore>,
    transport: Arc<dyn Transport>,
    snapshot: Arc<RwLock<Arc<Snapshot>>>,
    dedup: DedupCache,
    stats: StatsRecorder,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        store: Arc<dyn RuleStore>,
        transport: Arc<dyn Transport>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            stats: StatsRecorder::new(store.clone(), transport.clone()),
            dedup: DedupCache::new(settings.dedup_ttl),
            snapshot: Arc::new(RwLock::new(Arc::new(Snapshot::default()))),
            store,
            transport,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reloads rules and global config from the store.
    pub async fn refresh(&self) -> Result<()> {
        let rules: Vec<Rule> = self
            .store
            .list_active_rules()
            .await?
            .into_iter()
            .map(Rule::normalized)
            .collect();
        let mut global = self.store.get_global_config().await?;
        if global.admin_id.is_none() {
            global.admin_id = self.settings.fallback_admin;
        }

        let fallback = global.fallback_rule();

        let count = rules.len();
        {
            let mut w = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
            *w = Arc::new(Snapshot {
                rules,
                global,
                fallback,
            });
        }

        tracing::debug!("Loaded {} active rules", count);
        Ok(())
    }

    pub fn handle(&self, msg: InboundMessage) -> FanOut {
        self.handle_at(msg, Utc::now())
    }

    /// Evaluates every rule against `msg` as of `now` and spawns one task per
    /// rule that should dispatch. Never waits on the transport.
    pub fn handle_at(&self, msg: InboundMessage, now: DateTime<Utc>) -> FanOut {
        let _timer = Timer::new("engine.handle");
        let snapshot = self.snapshot();
        let global = &snapshot.global;

        if !global.forwarding_active {
            return FanOut::halted(SkipReason::ForwardingPaused);
        }
        if global.schedule_active
            && global
                .sleep_window
                .is_some_and(|w| w.contains_instant(now, self.settings.offset))
        {
            tracing::debug!(chat_id = msg.chat_id.0, "Inside global sleep window");
            return FanOut::halted(SkipReason::GlobalSleep);
        }

        let mut matching: Vec<&Rule> = snapshot
            .rules
            .iter()
            .filter(|r| r.active && self.claims(r, &msg))
            .collect();
        if matching.is_empty() {
            if let Some(fallback) = snapshot.fallback.as_ref().filter(|r| self.claims(r, &msg)) {
                tracing::debug!(chat_id = msg.chat_id.0, "No rule matched, using fallback route");
                matching.push(fallback);
            }
        }

        let mut fan_out = FanOut::new();
        if matching.is_empty() {
            return fan_out;
        }

        let ctx = FilterContext {
            now,
            offset: self.settings.offset,
            duplicate: global.dedup_enabled && self.dedup.check_and_mark(msg.dedup_key()),
        };

        for rule in matching {
            let verdict = self.evaluate_rule(rule, &msg, global, &ctx, &mut fan_out.tasks);
            tracing::debug!(
                rule_id = rule.id,
                chat_id = msg.chat_id.0,
                message_id = msg.message_id.0,
                edit = msg.is_edit,
                verdict = ?verdict,
                "Rule evaluated"
            );
            fan_out.outcomes.push(RuleOutcome {
                rule_id: rule.id,
                verdict,
            });
        }

        fan_out
    }

    /// A rule claims a message posted in, or forwarded from, one of its sources.
    fn claims(&self, rule: &Rule, msg: &InboundMessage) -> bool {
        let matching = self.settings.source_matching;
        source_matches(&rule.source_spec, msg.chat_id, msg.chat_handle.as_deref(), matching)
            || msg.origin_chat_id.is_some_and(|origin| {
                source_matches(&rule.source_spec, origin, msg.origin_handle.as_deref(), matching)
            })
    }

    fn evaluate_rule(
        &self,
        rule: &Rule,
        msg: &InboundMessage,
        global: &GlobalConfig,
        ctx: &FilterContext,
        tasks: &mut JoinSet<DispatchReport>,
    ) -> Verdict {
        if let Some(reason) = filters::evaluate(rule, msg, ctx) {
            return Verdict::Skipped(reason);
        }

        let transformed = transform(msg.body(), rule, global);
        match planner::plan(rule, msg, transformed) {
            Ok(plan) => {
                let delay = Duration::from_secs(u64::from(rule.delay_seconds));
                let verdict = Verdict::Scheduled {
                    plan: plan.name(),
                    delay,
                };
                let job = DispatchJob {
                    rule_id: rule.id,
                    delay,
                    plan,
                    admin_id: global.admin_id,
                    transport: self.transport.clone(),
                    stats: self.stats.clone(),
                };
                tasks.spawn(job.run());
                verdict
            }
            Err(PlanError::Skip(reason)) => Verdict::Skipped(reason),
            Err(PlanError::Config(error)) => {
                tracing::warn!(rule_id = rule.id, error = %error, "Rule cannot be dispatched");
                let stats = self.stats.clone();
                let admin_id = global.admin_id;
                let rule_id = rule.id;
                tasks.spawn(async move {
                    stats.report_failure(admin_id, rule_id, &error).await;
                    DispatchReport {
                        rule_id,
                        result: Err(error),
                    }
                });
                Verdict::Misconfigured
            }
        }
    }
}
