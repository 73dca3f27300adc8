use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BlockedReason, Decision, EvaluationLogEntry, EvaluationResult, Outcome};

/// What happened to one rule that made it through processing.
#[derive(Debug, Clone)]
pub struct RuleReport {
    pub rule_id: String,
    pub organization_id: String,
    pub evaluation: EvaluationResult,
    /// Deterministic id of the work order for this due period (trigger only).
    pub work_order_id: Option<String>,
    /// Whether this pass inserted the work order.
    pub created: bool,
}

/// A rule that could not be processed. Never aborts the batch.
#[derive(Debug, Clone)]
pub struct RuleFailure {
    pub rule_id: String,
    pub organization_id: String,
    pub blocked_reason: Option<BlockedReason>,
    pub message: String,
}

/// Per-rule tagged result aggregated by the runner.
#[derive(Debug, Clone)]
pub enum RuleOutcome {
    Evaluated(RuleReport),
    Failed(RuleFailure),
}

impl RuleOutcome {
    pub fn outcome(&self) -> Outcome {
        match self {
            RuleOutcome::Evaluated(r) => r.evaluation.decision.into(),
            RuleOutcome::Failed(_) => Outcome::Error,
        }
    }

    /// Validation failures are reported like a block but counted as errors.
    pub fn counts_as_error(&self) -> bool {
        match self {
            RuleOutcome::Evaluated(r) => {
                r.evaluation.blocked_reason == Some(BlockedReason::ValidationError)
            }
            RuleOutcome::Failed(_) => true,
        }
    }

    pub fn log_entry(&self, latency_ms: u64, evaluated_at: DateTime<Utc>) -> EvaluationLogEntry {
        match self {
            RuleOutcome::Evaluated(r) => EvaluationLogEntry {
                rule_id: r.rule_id.clone(),
                organization_id: r.organization_id.clone(),
                decision: r.evaluation.decision.into(),
                trigger_reason: r.evaluation.trigger_reason.map(|t| t.to_string()),
                blocked_reason: r.evaluation.blocked_reason.map(|b| b.to_string()),
                message: r.evaluation.message.clone(),
                created_wo_id: r.created.then(|| r.work_order_id.clone()).flatten(),
                latency_ms,
                evaluated_at,
            },
            RuleOutcome::Failed(f) => EvaluationLogEntry {
                rule_id: f.rule_id.clone(),
                organization_id: f.organization_id.clone(),
                decision: Outcome::Error,
                trigger_reason: None,
                blocked_reason: f.blocked_reason.map(|b| b.to_string()),
                message: f.message.clone(),
                created_wo_id: None,
                latency_ms,
                evaluated_at,
            },
        }
    }

    pub fn detail(&self, latency_ms: u64) -> RuleDetail {
        match self {
            RuleOutcome::Evaluated(r) => RuleDetail {
                rule_id: r.rule_id.clone(),
                organization_id: r.organization_id.clone(),
                decision: r.evaluation.decision.into(),
                trigger_reason: r.evaluation.trigger_reason.map(|t| t.to_string()),
                blocked_reason: r.evaluation.blocked_reason.map(|b| b.to_string()),
                message: r.evaluation.message.clone(),
                work_order_id: r.work_order_id.clone(),
                created: r.created,
                next_due: r.evaluation.next_due,
                latency_ms,
            },
            RuleOutcome::Failed(f) => RuleDetail {
                rule_id: f.rule_id.clone(),
                organization_id: f.organization_id.clone(),
                decision: Outcome::Error,
                trigger_reason: None,
                blocked_reason: f.blocked_reason.map(|b| b.to_string()),
                message: f.message.clone(),
                work_order_id: None,
                created: false,
                next_due: None,
                latency_ms,
            },
        }
    }
}

/// One line of a run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDetail {
    pub rule_id: String,
    pub organization_id: String,
    pub decision: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_order_id: Option<String>,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_due: Option<DateTime<Utc>>,
    pub latency_ms: u64,
}

/// Serializable summary of one scheduler pass.
///
/// Counts cover every rule in the pass; `details` is truncated to the
/// configured limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerResult {
    pub run_id: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub rules_checked: u64,
    pub should_trigger: u64,
    pub created: u64,
    pub blocked: u64,
    pub wait: u64,
    pub errors: u64,
    pub duration_ms: u64,
    pub details: Vec<RuleDetail>,
}

impl RunnerResult {
    pub fn new(run_id: String, dry_run: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            dry_run,
            started_at,
            rules_checked: 0,
            should_trigger: 0,
            created: 0,
            blocked: 0,
            wait: 0,
            errors: 0,
            duration_ms: 0,
            details: Vec::new(),
        }
    }

    /// Fold one rule's outcome into the counters, keeping at most
    /// `detail_limit` details.
    pub fn record(&mut self, outcome: &RuleOutcome, latency_ms: u64, detail_limit: usize) {
        self.rules_checked += 1;

        if outcome.counts_as_error() {
            self.errors += 1;
        } else if let RuleOutcome::Evaluated(report) = outcome {
            match report.evaluation.decision {
                Decision::ShouldTrigger => {
                    self.should_trigger += 1;
                    if report.created {
                        self.created += 1;
                    }
                }
                Decision::Blocked => self.blocked += 1,
                Decision::Wait => self.wait += 1,
            }
        }

        if self.details.len() < detail_limit {
            self.details.push(outcome.detail(latency_ms));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TriggerReason;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()
    }

    fn evaluated(evaluation: EvaluationResult, created: bool) -> RuleOutcome {
        RuleOutcome::Evaluated(RuleReport {
            rule_id: "r".to_string(),
            organization_id: "o".to_string(),
            work_order_id: Some("pm_r_20260401".to_string()),
            created,
            evaluation,
        })
    }

    #[test]
    fn counters_follow_decisions() {
        let mut result = RunnerResult::new("run".to_string(), false, at());
        result.record(
            &evaluated(
                EvaluationResult::should_trigger(TriggerReason::Scheduled, at(), "due"),
                true,
            ),
            1,
            50,
        );
        result.record(
            &evaluated(
                EvaluationResult::should_trigger(TriggerReason::Scheduled, at(), "due"),
                false,
            ),
            1,
            50,
        );
        result.record(
            &evaluated(
                EvaluationResult::blocked(BlockedReason::AssetUnavailable, "down"),
                false,
            ),
            1,
            50,
        );
        result.record(&evaluated(EvaluationResult::wait("later"), false), 1, 50);
        result.record(
            &RuleOutcome::Failed(RuleFailure {
                rule_id: "bad".to_string(),
                organization_id: "o".to_string(),
                blocked_reason: None,
                message: "boom".to_string(),
            }),
            1,
            50,
        );

        assert_eq!(result.rules_checked, 5);
        assert_eq!(result.should_trigger, 2);
        assert_eq!(result.created, 1);
        assert_eq!(result.blocked, 1);
        assert_eq!(result.wait, 1);
        assert_eq!(result.errors, 1);
        assert_eq!(result.details.last().unwrap().decision, Outcome::Error);
    }

    #[test]
    fn validation_block_counts_as_error() {
        let mut result = RunnerResult::new("run".to_string(), false, at());
        result.record(
            &evaluated(
                EvaluationResult::blocked(BlockedReason::ValidationError, "bad interval"),
                false,
            ),
            0,
            50,
        );
        assert_eq!(result.errors, 1);
        assert_eq!(result.blocked, 0);
        assert_eq!(
            result.details[0].blocked_reason.as_deref(),
            Some("validation_error")
        );
    }

    #[test]
    fn details_truncate_but_counts_do_not() {
        let mut result = RunnerResult::new("run".to_string(), true, at());
        for _ in 0..75 {
            result.record(&evaluated(EvaluationResult::wait("later"), false), 0, 50);
        }
        assert_eq!(result.rules_checked, 75);
        assert_eq!(result.wait, 75);
        assert_eq!(result.details.len(), 50);
    }

    #[test]
    fn log_entry_only_names_created_work_orders() {
        let trigger = EvaluationResult::should_trigger(TriggerReason::Scheduled, at(), "due");
        let fresh = evaluated(trigger.clone(), true).log_entry(2, at());
        let existing = evaluated(trigger, false).log_entry(2, at());
        assert_eq!(fresh.created_wo_id.as_deref(), Some("pm_r_20260401"));
        assert_eq!(existing.created_wo_id, None);
        assert_eq!(fresh.trigger_reason.as_deref(), Some("scheduled"));
    }

    #[test]
    fn summary_serializes_snake_case_decisions() {
        let mut result = RunnerResult::new("run".to_string(), true, at());
        result.record(
            &evaluated(
                EvaluationResult::should_trigger(TriggerReason::Scheduled, at(), "due"),
                false,
            ),
            0,
            50,
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["details"][0]["decision"], "should_trigger");
        assert_eq!(json["should_trigger"], 1);
        assert!(json["details"][0].get("blocked_reason").is_none());
    }
}
