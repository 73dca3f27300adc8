use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use upkeep_core::config::SchedulerConfig;
use uuid::Uuid;

use crate::{
    assets::AssetStateLoader,
    db::format_timestamp,
    error::{Result, SchedulerError},
    evaluator::{compute_next_due, evaluate},
    idempotency::{idempotency_key, work_order_id},
    repository::PmRepository,
    result::{RuleFailure, RuleOutcome, RuleReport, RunnerResult},
    types::{
        BlockedReason, Decision, EvaluationLogEntry, EvaluationResult, PmRule, RuleRecord,
        TriggerReason, TriggerStamp, WorkOrderDraft, WorkOrderStatus,
    },
};

/// Parameters of a single pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Restrict the pass to one organization; `None` runs fleet-wide over
    /// the listed organizations.
    pub org_id: Option<String>,
    /// Maximum number of due rules processed in this pass.
    pub batch_size: usize,
    /// Evaluate and report without writing anything.
    pub dry_run: bool,
}

/// Snapshot served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub total_active_rules: u64,
    pub recent_evaluations: u64,
    pub last_evaluation: Option<EvaluationLogEntry>,
}

/// Orchestrates scheduler passes: select due rules, evaluate each one, apply
/// its side effects once per due period and aggregate a [`RunnerResult`].
///
/// Overlapping passes are tolerated without a lock. Work-order ids are
/// deterministic per rule and due date and the repository's create is
/// create-if-absent, so a second pass over the same due period finds the
/// work order already present and only advances the rule.
pub struct SchedulerRunner {
    repo: Arc<dyn PmRepository>,
    assets: AssetStateLoader,
    config: SchedulerConfig,
}

impl SchedulerRunner {
    pub fn new(repo: Arc<dyn PmRepository>, config: SchedulerConfig) -> Self {
        Self {
            assets: AssetStateLoader::new(Arc::clone(&repo)),
            repo,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Options for a pass using the configured defaults.
    pub fn default_options(&self) -> RunOptions {
        RunOptions {
            org_id: None,
            batch_size: self.config.default_batch_size.max(1),
            dry_run: false,
        }
    }

    pub async fn run(&self, options: &RunOptions) -> Result<RunnerResult> {
        self.run_at(options, Utc::now()).await
    }

    /// Run one pass as of `now`.
    ///
    /// Returns `Err` only when the due rules cannot be selected at all. Every
    /// per-rule failure is reported inside the result under `errors`.
    pub async fn run_at(&self, options: &RunOptions, now: DateTime<Utc>) -> Result<RunnerResult> {
        let started = Instant::now();
        let run_id = Uuid::now_v7().to_string();

        let rules = self.select_due_rules(options, now).await?;
        info!(
            %run_id,
            org_id = ?options.org_id,
            due = rules.len(),
            dry_run = options.dry_run,
            "PM scheduler pass started"
        );

        let concurrency = self.config.concurrency.max(1);
        let outcomes: Vec<(RuleOutcome, u64)> = stream::iter(rules)
            .map(|record| self.handle_rule(record, now, options.dry_run))
            .buffered(concurrency)
            .collect()
            .await;

        let mut result = RunnerResult::new(run_id, options.dry_run, now);
        for (outcome, latency_ms) in &outcomes {
            result.record(outcome, *latency_ms, self.config.detail_limit);
        }
        result.duration_ms = elapsed_ms(started);

        info!(
            run_id = %result.run_id,
            rules_checked = result.rules_checked,
            should_trigger = result.should_trigger,
            created = result.created,
            blocked = result.blocked,
            wait = result.wait,
            errors = result.errors,
            duration_ms = result.duration_ms,
            "PM scheduler pass finished"
        );
        Ok(result)
    }

    pub async fn status(&self, now: DateTime<Utc>) -> Result<SchedulerStatus> {
        let since = Duration::try_hours(self.config.recent_window_hours.max(0))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(SchedulerStatus {
            total_active_rules: self.repo.count_active_rules(None).await?,
            recent_evaluations: self.repo.count_evaluations_since(since).await?,
            last_evaluation: self.repo.last_evaluation().await?,
        })
    }

    // --- private helpers ---------------------------------------------------

    /// Fleet-wide passes only visit rules whose `organization_id` appears in
    /// the organization listing; rules of unlisted organizations run only
    /// when a pass names their organization explicitly.
    async fn select_due_rules(
        &self,
        options: &RunOptions,
        now: DateTime<Utc>,
    ) -> Result<Vec<RuleRecord>> {
        let due_before = Duration::try_days(self.config.lookahead_days.max(0))
            .and_then(|lookahead| now.checked_add_signed(lookahead))
            .unwrap_or(now);

        if let Some(org_id) = options.org_id.as_deref() {
            return self
                .repo
                .load_due_rules(Some(org_id), due_before, options.batch_size)
                .await;
        }

        // Fleet-wide: one indexed query per organization, then interleave so
        // a backlog in one organization cannot crowd out the others.
        let mut per_org = Vec::new();
        for org in self.repo.list_organizations().await? {
            if org.is_demo && self.config.exclude_demo_organizations {
                debug!(org_id = %org.id, "skipping demo organization");
                continue;
            }
            let rules = self
                .repo
                .load_due_rules(Some(&org.id), due_before, options.batch_size)
                .await?;
            if !rules.is_empty() {
                per_org.push(rules);
            }
        }
        Ok(round_robin(per_org, options.batch_size))
    }

    /// Process one rule, write its audit entry and time the whole thing.
    async fn handle_rule(
        &self,
        record: RuleRecord,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> (RuleOutcome, u64) {
        let started = Instant::now();

        let outcome = match self.process_rule(&record, now, dry_run).await {
            Ok(report) => RuleOutcome::Evaluated(report),
            Err(e) => {
                warn!(rule_id = %record.rule_id, error = %e, "PM rule processing failed");
                let blocked_reason = matches!(e, SchedulerError::Validation { .. })
                    .then_some(BlockedReason::ValidationError);
                if !dry_run {
                    // Either write stamps last_evaluated_at, which rotates the
                    // rule behind fresh ones in the next due query.
                    let stamped = match blocked_reason {
                        Some(reason) => {
                            self.repo
                                .mark_rule_blocked(&record.rule_id, reason, now)
                                .await
                        }
                        None => self.repo.touch_rule_evaluated(&record.rule_id, now).await,
                    };
                    if let Err(stamp_err) = stamped {
                        warn!(rule_id = %record.rule_id, error = %stamp_err, "could not stamp failed rule");
                    }
                }
                RuleOutcome::Failed(RuleFailure {
                    rule_id: record.rule_id.clone(),
                    organization_id: record.organization_id.clone(),
                    blocked_reason,
                    message: e.to_string(),
                })
            }
        };

        let latency_ms = elapsed_ms(started);
        if !dry_run {
            let entry = outcome.log_entry(latency_ms, now);
            if let Err(e) = self.repo.append_evaluation_log(&entry).await {
                warn!(rule_id = %entry.rule_id, error = %e, "evaluation log write failed; continuing");
            }
        }
        (outcome, latency_ms)
    }

    async fn process_rule(
        &self,
        record: &RuleRecord,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<RuleReport> {
        let rule = PmRule::from_record(record)?;
        let asset = self.assets.load(&rule).await?;
        let evaluation = evaluate(&rule, &asset, now);

        debug!(
            rule_id = %rule.rule_id,
            decision = ?evaluation.decision,
            message = %evaluation.message,
            "rule evaluated"
        );

        match evaluation.decision {
            Decision::ShouldTrigger => self.apply_trigger(rule, evaluation, now, dry_run).await,
            Decision::Blocked => {
                if let (false, Some(reason)) = (dry_run, evaluation.blocked_reason) {
                    self.repo
                        .mark_rule_blocked(&rule.rule_id, reason, now)
                        .await?;
                }
                Ok(report(&rule, evaluation, None, false))
            }
            // Not reachable with a lookahead of zero; nothing to persist.
            Decision::Wait => Ok(report(&rule, evaluation, None, false)),
        }
    }

    /// Create the work order for this due period if needed, then always
    /// advance the rule so it leaves the due set.
    async fn apply_trigger(
        &self,
        rule: PmRule,
        evaluation: EvaluationResult,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<RuleReport> {
        let next_due = evaluation
            .next_due
            .or_else(|| compute_next_due(&rule, now))
            .ok_or_else(|| SchedulerError::Validation {
                rule_id: rule.rule_id.clone(),
                reason: format!("interval_days out of range (got {})", rule.interval_days),
            })?;
        let wo_id = work_order_id(&rule.rule_id, rule.next_due);

        if dry_run {
            return Ok(report(&rule, evaluation, Some(wo_id), false));
        }

        let reason = evaluation.trigger_reason.unwrap_or(TriggerReason::Scheduled);
        let (wo_id, created) = self.ensure_work_order(&rule, wo_id, reason, now).await?;

        self.repo
            .update_rule_next_due(
                &rule.rule_id,
                next_due,
                &TriggerStamp {
                    evaluated_at: now,
                    triggered_at: now,
                    work_order_id: wo_id.clone(),
                },
            )
            .await?;

        info!(
            rule_id = %rule.rule_id,
            work_order_id = %wo_id,
            created,
            next_due = %format_timestamp(next_due),
            "PM rule triggered"
        );
        Ok(report(&rule, evaluation, Some(wo_id), created))
    }

    /// Returns the id of the work order covering this due period and whether
    /// this call created it.
    async fn ensure_work_order(
        &self,
        rule: &PmRule,
        wo_id: String,
        reason: TriggerReason,
        now: DateTime<Utc>,
    ) -> Result<(String, bool)> {
        if self.repo.work_order_exists(&wo_id).await? {
            debug!(rule_id = %rule.rule_id, work_order_id = %wo_id, "work order already present");
            return Ok((wo_id, false));
        }

        let key = idempotency_key(&rule.rule_id, rule.next_due);
        if let Some(existing) = self.repo.get_by_idempotency_key(&key).await? {
            debug!(
                rule_id = %rule.rule_id,
                work_order_id = %existing.id,
                "work order for this due period found by idempotency key"
            );
            return Ok((existing.id, false));
        }

        let draft = work_order_draft(rule, reason, key, now);
        let created = self
            .repo
            .save_work_order(&wo_id, &draft)
            .await
            .map_err(|e| SchedulerError::WriteFailure {
                work_order_id: wo_id.clone(),
                reason: e.to_string(),
            })?;
        if !created {
            info!(
                rule_id = %rule.rule_id,
                work_order_id = %wo_id,
                "work order created concurrently by another pass"
            );
        }
        Ok((wo_id, created))
    }
}

fn work_order_draft(
    rule: &PmRule,
    reason: TriggerReason,
    idempotency_key: String,
    now: DateTime<Utc>,
) -> WorkOrderDraft {
    WorkOrderDraft {
        organization_id: rule.organization_id.clone(),
        asset_id: rule.asset_id.clone(),
        title: format!("PM: {}", rule.asset_id),
        description: format!(
            "Preventive maintenance every {} day(s), due {}",
            rule.interval_days,
            rule.next_due.format("%Y-%m-%d")
        ),
        priority: rule.priority.clone(),
        status: WorkOrderStatus::Open,
        work_type: "preventive".to_string(),
        checklist: rule.checklist.clone(),
        pm_rule_id: rule.rule_id.clone(),
        pm_trigger_reason: reason,
        due_date: format_timestamp(rule.next_due),
        idempotency_key,
        created_at: format_timestamp(now),
    }
}

fn report(
    rule: &PmRule,
    evaluation: EvaluationResult,
    work_order_id: Option<String>,
    created: bool,
) -> RuleReport {
    RuleReport {
        rule_id: rule.rule_id.clone(),
        organization_id: rule.organization_id.clone(),
        evaluation,
        work_order_id,
        created,
    }
}

/// Take one rule from each queue in turn until `limit` rules are taken or
/// every queue is drained.
fn round_robin(queues: Vec<Vec<RuleRecord>>, limit: usize) -> Vec<RuleRecord> {
    let mut queues: Vec<_> = queues.into_iter().map(Vec::into_iter).collect();
    let mut picked = Vec::new();
    while picked.len() < limit {
        let before = picked.len();
        for queue in &mut queues {
            if picked.len() == limit {
                break;
            }
            if let Some(rule) = queue.next() {
                picked.push(rule);
            }
        }
        if picked.len() == before {
            break;
        }
    }
    picked
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(org: &str, n: usize) -> Vec<RuleRecord> {
        (0..n)
            .map(|i| RuleRecord {
                rule_id: format!("{org}-{i}"),
                organization_id: org.to_string(),
                asset_id: "a".to_string(),
                interval_days: 1,
                tolerance_days: 0,
                next_due: "2026-01-01T00:00:00.000Z".to_string(),
                is_active: true,
                cooldown_hours: 0,
                priority: "low".to_string(),
                checklist: "[]".to_string(),
                last_evaluated_at: None,
                last_triggered_at: None,
                last_work_order_id: None,
                blocked_reason: None,
            })
            .collect()
    }

    fn ids(rules: &[RuleRecord]) -> Vec<&str> {
        rules.iter().map(|r| r.rule_id.as_str()).collect()
    }

    #[test]
    fn round_robin_interleaves_organizations() {
        let picked = round_robin(vec![queue("a", 3), queue("b", 1), queue("c", 2)], 5);
        assert_eq!(ids(&picked), vec!["a-0", "b-0", "c-0", "a-1", "c-1"]);
    }

    #[test]
    fn round_robin_stops_when_drained() {
        let picked = round_robin(vec![queue("a", 2), queue("b", 1)], 10);
        assert_eq!(picked.len(), 3);
        assert!(round_robin(Vec::new(), 10).is_empty());
    }
}
