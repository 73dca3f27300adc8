use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::parse_timestamp;
use crate::error::{Result, SchedulerError};

/// Operational status of an asset as reported by the asset collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Operational,
    Maintenance,
    Breakdown,
    OutOfService,
}

impl AssetStatus {
    /// Assets undergoing unplanned repair or retired from service never get
    /// new planned work.
    pub fn is_unavailable(self) -> bool {
        matches!(self, AssetStatus::Breakdown | AssetStatus::OutOfService)
    }
}

impl std::fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssetStatus::Operational => "operational",
            AssetStatus::Maintenance => "maintenance",
            AssetStatus::Breakdown => "breakdown",
            AssetStatus::OutOfService => "out_of_service",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AssetStatus {
    type Err = String;

    /// Accepts the canonical snake_case names plus the title-cased labels the
    /// asset UI writes ("Out of Service", "Breakdown", ...).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "operational" => Ok(AssetStatus::Operational),
            "maintenance" => Ok(AssetStatus::Maintenance),
            "breakdown" => Ok(AssetStatus::Breakdown),
            "out_of_service" => Ok(AssetStatus::OutOfService),
            _ => Err(format!("unknown asset status: {s}")),
        }
    }
}

/// Snapshot of an asset assembled fresh for each evaluation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetState {
    pub asset_id: String,
    pub status: AssetStatus,
    pub has_pending_pm_work_order: bool,
}

/// What the evaluator decided for one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    ShouldTrigger,
    Blocked,
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    Scheduled,
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerReason::Scheduled => write!(f, "scheduled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    AssetUnavailable,
    PendingWorkOrderExists,
    ValidationError,
}

impl std::fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BlockedReason::AssetUnavailable => "asset_unavailable",
            BlockedReason::PendingWorkOrderExists => "pending_work_order_exists",
            BlockedReason::ValidationError => "validation_error",
        };
        write!(f, "{s}")
    }
}

/// Immutable output of [`crate::evaluator::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_reason: Option<TriggerReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<BlockedReason>,
    pub message: String,
    /// Computed next due instant; present only on `ShouldTrigger`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_due: Option<DateTime<Utc>>,
}

impl EvaluationResult {
    pub fn should_trigger(
        reason: TriggerReason,
        next_due: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            decision: Decision::ShouldTrigger,
            trigger_reason: Some(reason),
            blocked_reason: None,
            message: message.into(),
            next_due: Some(next_due),
        }
    }

    pub fn blocked(reason: BlockedReason, message: impl Into<String>) -> Self {
        Self {
            decision: Decision::Blocked,
            trigger_reason: None,
            blocked_reason: Some(reason),
            message: message.into(),
            next_due: None,
        }
    }

    pub fn wait(message: impl Into<String>) -> Self {
        Self {
            decision: Decision::Wait,
            trigger_reason: None,
            blocked_reason: None,
            message: message.into(),
            next_due: None,
        }
    }
}

/// A PM schedule rule exactly as persisted in `pm_rules`.
///
/// Timestamps and the checklist are kept in their stored text form; the
/// typed, validated view is [`PmRule`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub rule_id: String,
    pub organization_id: String,
    pub asset_id: String,
    pub interval_days: i64,
    pub tolerance_days: i64,
    /// ISO-8601 UTC.
    pub next_due: String,
    pub is_active: bool,
    pub cooldown_hours: i64,
    pub priority: String,
    /// JSON array of checklist items.
    pub checklist: String,
    pub last_evaluated_at: Option<String>,
    pub last_triggered_at: Option<String>,
    pub last_work_order_id: Option<String>,
    pub blocked_reason: Option<String>,
}

/// Upper bound for `interval_days` and `tolerance_days` (about a century).
pub const MAX_SCHEDULE_DAYS: i64 = 36_500;

/// Validated schedule rule, built once per evaluation from a [`RuleRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmRule {
    pub rule_id: String,
    pub organization_id: String,
    pub asset_id: String,
    pub interval_days: i64,
    pub tolerance_days: i64,
    pub next_due: DateTime<Utc>,
    pub is_active: bool,
    pub cooldown_hours: i64,
    pub priority: String,
    pub checklist: Vec<String>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl PmRule {
    /// Parse and validate a persisted rule.
    ///
    /// Rejects `interval_days` outside `1..=MAX_SCHEDULE_DAYS`, tolerance
    /// outside `0..=MAX_SCHEDULE_DAYS`, negative cooldown, an
    /// unparseable `next_due` and a checklist that is not a JSON string array.
    pub fn from_record(record: &RuleRecord) -> Result<Self> {
        let invalid = |reason: String| SchedulerError::Validation {
            rule_id: record.rule_id.clone(),
            reason,
        };

        if record.interval_days <= 0 {
            return Err(invalid(format!(
                "interval_days must be positive (got {})",
                record.interval_days
            )));
        }
        if record.interval_days > MAX_SCHEDULE_DAYS {
            return Err(invalid(format!(
                "interval_days must be at most {MAX_SCHEDULE_DAYS} (got {})",
                record.interval_days
            )));
        }
        if record.tolerance_days < 0 {
            return Err(invalid(format!(
                "tolerance_days must not be negative (got {})",
                record.tolerance_days
            )));
        }
        if record.tolerance_days > MAX_SCHEDULE_DAYS {
            return Err(invalid(format!(
                "tolerance_days must be at most {MAX_SCHEDULE_DAYS} (got {})",
                record.tolerance_days
            )));
        }
        if record.cooldown_hours < 0 {
            return Err(invalid(format!(
                "cooldown_hours must not be negative (got {})",
                record.cooldown_hours
            )));
        }

        let next_due = parse_timestamp(&record.next_due)
            .ok_or_else(|| invalid(format!("next_due is not a timestamp: {}", record.next_due)))?;

        let checklist: Vec<String> = if record.checklist.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&record.checklist)
                .map_err(|e| invalid(format!("checklist is not a string array: {e}")))?
        };

        let last_triggered_at = record.last_triggered_at.as_deref().and_then(parse_timestamp);

        Ok(Self {
            rule_id: record.rule_id.clone(),
            organization_id: record.organization_id.clone(),
            asset_id: record.asset_id.clone(),
            interval_days: record.interval_days,
            tolerance_days: record.tolerance_days,
            next_due,
            is_active: record.is_active,
            cooldown_hours: record.cooldown_hours,
            priority: record.priority.clone(),
            checklist,
            last_triggered_at,
        })
    }
}

/// Lifecycle status of a work order as written by the work-order subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkOrderStatus {
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    Pending,
    Completed,
    Cancelled,
}

impl WorkOrderStatus {
    /// Statuses that count as "still open" for the pending-work-order guard.
    pub const ACTIVE: [WorkOrderStatus; 3] = [
        WorkOrderStatus::Open,
        WorkOrderStatus::InProgress,
        WorkOrderStatus::Pending,
    ];
}

impl std::fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkOrderStatus::Open => "Open",
            WorkOrderStatus::InProgress => "In Progress",
            WorkOrderStatus::Pending => "Pending",
            WorkOrderStatus::Completed => "Completed",
            WorkOrderStatus::Cancelled => "Cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for WorkOrderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Open" => Ok(WorkOrderStatus::Open),
            "In Progress" => Ok(WorkOrderStatus::InProgress),
            "Pending" => Ok(WorkOrderStatus::Pending),
            "Completed" => Ok(WorkOrderStatus::Completed),
            "Cancelled" => Ok(WorkOrderStatus::Cancelled),
            other => Err(format!("unknown work order status: {other}")),
        }
    }
}

/// Body of a generated PM work order. The id is supplied separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderDraft {
    pub organization_id: String,
    pub asset_id: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub status: WorkOrderStatus,
    pub work_type: String,
    pub checklist: Vec<String>,
    pub pm_rule_id: String,
    pub pm_trigger_reason: TriggerReason,
    /// ISO-8601 UTC due instant this work order satisfies.
    pub due_date: String,
    pub idempotency_key: String,
    pub created_at: String,
}

/// A stored work order, as read back by id or idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: String,
    pub organization_id: String,
    pub asset_id: String,
    pub title: String,
    pub status: String,
    pub priority: String,
    pub pm_rule_id: Option<String>,
    pub pm_trigger_reason: Option<String>,
    pub due_date: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: String,
}

/// Rule fields written after a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerStamp {
    pub evaluated_at: DateTime<Utc>,
    pub triggered_at: DateTime<Utc>,
    pub work_order_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub is_demo: bool,
}

/// Decision recorded for a rule in logs and run summaries. Adds `Error` to
/// the evaluator's three outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    ShouldTrigger,
    Blocked,
    Wait,
    Error,
}

impl From<Decision> for Outcome {
    fn from(d: Decision) -> Self {
        match d {
            Decision::ShouldTrigger => Outcome::ShouldTrigger,
            Decision::Blocked => Outcome::Blocked,
            Decision::Wait => Outcome::Wait,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::ShouldTrigger => "should_trigger",
            Outcome::Blocked => "blocked",
            Outcome::Wait => "wait",
            Outcome::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "should_trigger" => Ok(Outcome::ShouldTrigger),
            "blocked" => Ok(Outcome::Blocked),
            "wait" => Ok(Outcome::Wait),
            "error" => Ok(Outcome::Error),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

/// Append-only audit record written once per rule per pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationLogEntry {
    pub rule_id: String,
    pub organization_id: String,
    pub decision: Outcome,
    pub trigger_reason: Option<String>,
    pub blocked_reason: Option<String>,
    pub message: String,
    pub created_wo_id: Option<String>,
    pub latency_ms: u64,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationLogEntry {
    /// Document id: `{rule_id}_{epoch_seconds}`.
    pub fn log_id(&self) -> String {
        format!("{}_{}", self.rule_id, self.evaluated_at.timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RuleRecord {
        RuleRecord {
            rule_id: "r-1".to_string(),
            organization_id: "org-1".to_string(),
            asset_id: "a-1".to_string(),
            interval_days: 30,
            tolerance_days: 2,
            next_due: "2026-03-01T08:00:00.000Z".to_string(),
            is_active: true,
            cooldown_hours: 0,
            priority: "medium".to_string(),
            checklist: r#"["grease bearings","check belts"]"#.to_string(),
            last_evaluated_at: None,
            last_triggered_at: None,
            last_work_order_id: None,
            blocked_reason: None,
        }
    }

    #[test]
    fn valid_record_converts() {
        let rule = PmRule::from_record(&record()).expect("valid record");
        assert_eq!(rule.interval_days, 30);
        assert_eq!(rule.checklist.len(), 2);
        assert_eq!(rule.next_due.to_rfc3339(), "2026-03-01T08:00:00+00:00");
    }

    #[test]
    fn zero_interval_rejected() {
        let mut r = record();
        r.interval_days = 0;
        let err = PmRule::from_record(&r).unwrap_err();
        assert!(matches!(err, SchedulerError::Validation { .. }));
        assert!(err.to_string().contains("interval_days"));
    }

    #[test]
    fn negative_tolerance_rejected() {
        let mut r = record();
        r.tolerance_days = -1;
        assert!(PmRule::from_record(&r).is_err());
    }

    #[test]
    fn oversized_interval_and_tolerance_rejected() {
        let mut r = record();
        r.interval_days = 200_000_000;
        assert!(PmRule::from_record(&r).unwrap_err().to_string().contains("at most"));

        let mut r = record();
        r.tolerance_days = MAX_SCHEDULE_DAYS + 1;
        assert!(PmRule::from_record(&r).is_err());

        let mut r = record();
        r.interval_days = MAX_SCHEDULE_DAYS;
        assert!(PmRule::from_record(&r).is_ok());
    }

    #[test]
    fn garbage_next_due_rejected() {
        let mut r = record();
        r.next_due = "next tuesday".to_string();
        assert!(PmRule::from_record(&r).is_err());
    }

    #[test]
    fn empty_checklist_is_allowed() {
        let mut r = record();
        r.checklist = String::new();
        assert!(PmRule::from_record(&r).unwrap().checklist.is_empty());
    }

    #[test]
    fn asset_status_accepts_ui_labels() {
        assert_eq!("Out of Service".parse::<AssetStatus>(), Ok(AssetStatus::OutOfService));
        assert_eq!("breakdown".parse::<AssetStatus>(), Ok(AssetStatus::Breakdown));
        assert_eq!("Operational".parse::<AssetStatus>(), Ok(AssetStatus::Operational));
        assert!("melted".parse::<AssetStatus>().is_err());
    }

    #[test]
    fn log_id_uses_epoch_seconds() {
        let entry = EvaluationLogEntry {
            rule_id: "r-1".to_string(),
            organization_id: "org-1".to_string(),
            decision: Outcome::Wait,
            trigger_reason: None,
            blocked_reason: None,
            message: String::new(),
            created_wo_id: None,
            latency_ms: 0,
            evaluated_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        assert_eq!(entry.log_id(), "r-1_1700000000");
    }
}
