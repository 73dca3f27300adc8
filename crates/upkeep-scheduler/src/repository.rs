use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::{
    db::{canonical_timestamp, format_timestamp, init_db, parse_timestamp},
    error::{Result, SchedulerError},
    types::{
        AssetStatus, BlockedReason, EvaluationLogEntry, Organization, Outcome, RuleRecord,
        TriggerStamp, WorkOrder, WorkOrderDraft, WorkOrderStatus,
    },
};

/// Storage surface the scheduler runner depends on.
///
/// Rules are created and deleted by the planning collaborator; the runner
/// only ever issues partial updates against them. Work orders are owned by
/// the work-order subsystem once created.
#[async_trait]
pub trait PmRepository: Send + Sync {
    /// All organizations, demo ones included (`is_demo` tells them apart).
    async fn list_organizations(&self) -> Result<Vec<Organization>>;

    /// Active rules with `next_due <= due_before`, at most `limit`.
    ///
    /// Never-evaluated rules come first, then the least recently evaluated,
    /// then the oldest `next_due`. Rules that stay blocked therefore rotate to
    /// the back instead of pinning the head of every batch.
    ///
    /// `org_id = None` selects across every organization.
    async fn load_due_rules(
        &self,
        org_id: Option<&str>,
        due_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RuleRecord>>;

    /// Current status of an asset, `None` if the asset is unknown.
    async fn get_asset_status(&self, asset_id: &str) -> Result<Option<AssetStatus>>;

    /// Whether a work order carrying `pm_rule_id == rule_id` is Open, In Progress or Pending.
    async fn has_open_pm_work_order(&self, rule_id: &str) -> Result<bool>;

    async fn work_order_exists(&self, id: &str) -> Result<bool>;

    /// Create-if-absent under an explicit id.
    ///
    /// Returns `true` when this call inserted the row, `false` when a work
    /// order with the same id or idempotency key already existed.
    async fn save_work_order(&self, id: &str, draft: &WorkOrderDraft) -> Result<bool>;

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<WorkOrder>>;

    /// Advance `next_due` and record the trigger. Touches only scheduler-owned
    /// fields and never moves `next_due` backwards.
    async fn update_rule_next_due(
        &self,
        rule_id: &str,
        next_due: DateTime<Utc>,
        stamp: &TriggerStamp,
    ) -> Result<()>;

    /// Record why a rule could not trigger. `next_due` is left untouched.
    async fn mark_rule_blocked(
        &self,
        rule_id: &str,
        reason: BlockedReason,
        evaluated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Stamp `last_evaluated_at` after a failed attempt. Nothing else changes.
    async fn touch_rule_evaluated(&self, rule_id: &str, evaluated_at: DateTime<Utc>) -> Result<()>;

    async fn append_evaluation_log(&self, entry: &EvaluationLogEntry) -> Result<()>;

    async fn count_active_rules(&self, org_id: Option<&str>) -> Result<u64>;

    async fn count_evaluations_since(&self, since: DateTime<Utc>) -> Result<u64>;

    async fn last_evaluation(&self) -> Result<Option<EvaluationLogEntry>>;
}

/// SQLite-backed [`PmRepository`].
///
/// Wraps a single connection in a `Mutex`; the gateway opens one per
/// subsystem against the same WAL-mode database file.
pub struct SqliteRepository {
    db: Mutex<Connection>,
}

impl SqliteRepository {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn db(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    // --- collaborator-side writes (planning, asset and work-order subsystems) ---

    pub fn insert_organization(&self, org: &Organization) -> Result<()> {
        let db = self.db()?;
        db.execute(
            "INSERT OR REPLACE INTO organizations (id, name, is_demo) VALUES (?1, ?2, ?3)",
            rusqlite::params![org.id, org.name, org.is_demo],
        )?;
        Ok(())
    }

    pub fn insert_asset(
        &self,
        id: &str,
        organization_id: &str,
        name: &str,
        status: &str,
    ) -> Result<()> {
        let db = self.db()?;
        db.execute(
            "INSERT OR REPLACE INTO assets (id, organization_id, name, status)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, organization_id, name, status],
        )?;
        Ok(())
    }

    pub fn set_asset_status(&self, id: &str, status: &str) -> Result<()> {
        let db = self.db()?;
        db.execute(
            "UPDATE assets SET status = ?1 WHERE id = ?2",
            rusqlite::params![status, id],
        )?;
        Ok(())
    }

    /// Insert or replace a rule as the planning collaborator would.
    ///
    /// Timestamps are stored in canonical UTC form so the due query's text
    /// comparison matches chronological order.
    pub fn insert_rule(&self, rule: &RuleRecord) -> Result<()> {
        let db = self.db()?;
        let now = format_timestamp(Utc::now());
        db.execute(
            "INSERT OR REPLACE INTO pm_rules
             (id, organization_id, asset_id, interval_days, tolerance_days, next_due,
              is_active, cooldown_hours, priority, checklist, last_evaluated_at,
              last_triggered_at, last_work_order_id, blocked_reason, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?15)",
            rusqlite::params![
                rule.rule_id,
                rule.organization_id,
                rule.asset_id,
                rule.interval_days,
                rule.tolerance_days,
                canonical_timestamp(&rule.next_due),
                rule.is_active,
                rule.cooldown_hours,
                rule.priority,
                rule.checklist,
                rule.last_evaluated_at.as_deref().map(canonical_timestamp),
                rule.last_triggered_at.as_deref().map(canonical_timestamp),
                rule.last_work_order_id,
                rule.blocked_reason,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_rule(&self, id: &str) -> Result<RuleRecord> {
        let db = self.db()?;
        db.query_row(
            &format!("SELECT {RULE_COLUMNS} FROM pm_rules WHERE id = ?1"),
            [id],
            row_to_rule,
        )
        .optional()?
        .ok_or_else(|| SchedulerError::RuleNotFound { id: id.to_string() })
    }

    pub fn get_work_order(&self, id: &str) -> Result<Option<WorkOrder>> {
        let db = self.db()?;
        Ok(db
            .query_row(
                &format!("SELECT {WORK_ORDER_COLUMNS} FROM work_orders WHERE id = ?1"),
                [id],
                row_to_work_order,
            )
            .optional()?)
    }

    pub fn work_orders_for_rule(&self, rule_id: &str) -> Result<Vec<WorkOrder>> {
        let db = self.db()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {WORK_ORDER_COLUMNS} FROM work_orders
             WHERE pm_rule_id = ?1 ORDER BY created_at"
        ))?;
        let orders = stmt
            .query_map([rule_id], row_to_work_order)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(orders)
    }

    pub fn set_work_order_status(&self, id: &str, status: WorkOrderStatus) -> Result<()> {
        let db = self.db()?;
        db.execute(
            "UPDATE work_orders SET status = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![status.to_string(), format_timestamp(Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn evaluation_logs_for_rule(&self, rule_id: &str) -> Result<Vec<EvaluationLogEntry>> {
        let db = self.db()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM pm_evaluation_logs
             WHERE rule_id = ?1 ORDER BY evaluated_at"
        ))?;
        let entries = stmt
            .query_map([rule_id], row_to_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

#[async_trait]
impl PmRepository for SqliteRepository {
    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        let db = self.db()?;
        let mut stmt = db.prepare("SELECT id, name, is_demo FROM organizations ORDER BY id")?;
        let orgs = stmt
            .query_map([], |row| {
                Ok(Organization {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    is_demo: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(orgs)
    }

    async fn load_due_rules(
        &self,
        org_id: Option<&str>,
        due_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RuleRecord>> {
        let db = self.db()?;
        let due_before = format_timestamp(due_before);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rules = match org_id {
            Some(org) => {
                let mut stmt = db.prepare_cached(&format!(
                    "SELECT {RULE_COLUMNS} FROM pm_rules
                     WHERE organization_id = ?1 AND is_active = 1 AND next_due <= ?2
                     ORDER BY last_evaluated_at IS NOT NULL, last_evaluated_at, next_due
                     LIMIT ?3"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![org, due_before, limit], row_to_rule)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = db.prepare_cached(&format!(
                    "SELECT {RULE_COLUMNS} FROM pm_rules
                     WHERE is_active = 1 AND next_due <= ?1
                     ORDER BY last_evaluated_at IS NOT NULL, last_evaluated_at, next_due
                     LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![due_before, limit], row_to_rule)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        debug!(org_id = ?org_id, count = rules.len(), "due rules loaded");
        Ok(rules)
    }

    async fn get_asset_status(&self, asset_id: &str) -> Result<Option<AssetStatus>> {
        let db = self.db()?;
        let raw: Option<String> = db
            .query_row("SELECT status FROM assets WHERE id = ?1", [asset_id], |row| {
                row.get(0)
            })
            .optional()?;
        raw.map(|s| s.parse::<AssetStatus>().map_err(SchedulerError::Storage))
            .transpose()
    }

    async fn has_open_pm_work_order(&self, rule_id: &str) -> Result<bool> {
        let db = self.db()?;
        let [a, b, c] = WorkOrderStatus::ACTIVE.map(|s| s.to_string());
        let open: bool = db.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM work_orders
                WHERE pm_rule_id = ?1 AND status IN (?2, ?3, ?4)
             )",
            rusqlite::params![rule_id, a, b, c],
            |row| row.get(0),
        )?;
        Ok(open)
    }

    async fn work_order_exists(&self, id: &str) -> Result<bool> {
        let db = self.db()?;
        let exists: bool = db.query_row(
            "SELECT EXISTS (SELECT 1 FROM work_orders WHERE id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn save_work_order(&self, id: &str, draft: &WorkOrderDraft) -> Result<bool> {
        let db = self.db()?;
        let checklist = serde_json::to_string(&draft.checklist)?;
        let inserted = db.execute(
            "INSERT OR IGNORE INTO work_orders
             (id, organization_id, asset_id, title, description, status, priority,
              work_type, checklist, pm_rule_id, pm_trigger_reason, due_date,
              idempotency_key, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?14)",
            rusqlite::params![
                id,
                draft.organization_id,
                draft.asset_id,
                draft.title,
                draft.description,
                draft.status.to_string(),
                draft.priority,
                draft.work_type,
                checklist,
                draft.pm_rule_id,
                draft.pm_trigger_reason.to_string(),
                draft.due_date,
                draft.idempotency_key,
                draft.created_at,
            ],
        )?;
        Ok(inserted == 1)
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<WorkOrder>> {
        let db = self.db()?;
        Ok(db
            .query_row(
                &format!("SELECT {WORK_ORDER_COLUMNS} FROM work_orders WHERE idempotency_key = ?1"),
                [key],
                row_to_work_order,
            )
            .optional()?)
    }

    async fn update_rule_next_due(
        &self,
        rule_id: &str,
        next_due: DateTime<Utc>,
        stamp: &TriggerStamp,
    ) -> Result<()> {
        let db = self.db()?;
        let n = db.execute(
            "UPDATE pm_rules SET
                next_due = ?1, last_evaluated_at = ?2, last_triggered_at = ?3,
                last_work_order_id = ?4, blocked_reason = NULL, updated_at = ?2
             WHERE id = ?5 AND next_due < ?1",
            rusqlite::params![
                format_timestamp(next_due),
                format_timestamp(stamp.evaluated_at),
                format_timestamp(stamp.triggered_at),
                stamp.work_order_id,
                rule_id,
            ],
        )?;
        if n == 0 {
            let exists: bool = db.query_row(
                "SELECT EXISTS (SELECT 1 FROM pm_rules WHERE id = ?1)",
                [rule_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(SchedulerError::RuleNotFound {
                    id: rule_id.to_string(),
                });
            }
            debug!(rule_id, "next_due already advanced past this value; left as is");
        }
        Ok(())
    }

    async fn mark_rule_blocked(
        &self,
        rule_id: &str,
        reason: BlockedReason,
        evaluated_at: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.db()?;
        let n = db.execute(
            "UPDATE pm_rules SET blocked_reason = ?1, last_evaluated_at = ?2, updated_at = ?2
             WHERE id = ?3",
            rusqlite::params![reason.to_string(), format_timestamp(evaluated_at), rule_id],
        )?;
        if n == 0 {
            return Err(SchedulerError::RuleNotFound {
                id: rule_id.to_string(),
            });
        }
        Ok(())
    }

    async fn touch_rule_evaluated(
        &self,
        rule_id: &str,
        evaluated_at: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.db()?;
        let at = format_timestamp(evaluated_at);
        let n = db.execute(
            "UPDATE pm_rules SET last_evaluated_at = ?1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![at, rule_id],
        )?;
        if n == 0 {
            return Err(SchedulerError::RuleNotFound {
                id: rule_id.to_string(),
            });
        }
        Ok(())
    }

    async fn append_evaluation_log(&self, entry: &EvaluationLogEntry) -> Result<()> {
        let db = self.db()?;
        db.execute(
            "INSERT OR REPLACE INTO pm_evaluation_logs
             (id, rule_id, organization_id, decision, trigger_reason, blocked_reason,
              message, created_wo_id, latency_ms, evaluated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            rusqlite::params![
                entry.log_id(),
                entry.rule_id,
                entry.organization_id,
                entry.decision.to_string(),
                entry.trigger_reason,
                entry.blocked_reason,
                entry.message,
                entry.created_wo_id,
                i64::try_from(entry.latency_ms).unwrap_or(i64::MAX),
                format_timestamp(entry.evaluated_at),
            ],
        )?;
        Ok(())
    }

    async fn count_active_rules(&self, org_id: Option<&str>) -> Result<u64> {
        let db = self.db()?;
        let n: i64 = match org_id {
            Some(org) => db.query_row(
                "SELECT COUNT(*) FROM pm_rules WHERE organization_id = ?1 AND is_active = 1",
                [org],
                |row| row.get(0),
            )?,
            None => db.query_row(
                "SELECT COUNT(*) FROM pm_rules WHERE is_active = 1",
                [],
                |row| row.get(0),
            )?,
        };
        Ok(n.max(0) as u64)
    }

    async fn count_evaluations_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let db = self.db()?;
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM pm_evaluation_logs WHERE evaluated_at >= ?1",
            [format_timestamp(since)],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    async fn last_evaluation(&self) -> Result<Option<EvaluationLogEntry>> {
        let db = self.db()?;
        Ok(db
            .query_row(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM pm_evaluation_logs
                     ORDER BY evaluated_at DESC LIMIT 1"
                ),
                [],
                row_to_log,
            )
            .optional()?)
    }
}

// --- row mapping -------------------------------------------------------------

const RULE_COLUMNS: &str = "id, organization_id, asset_id, interval_days, tolerance_days, \
     next_due, is_active, cooldown_hours, priority, checklist, last_evaluated_at, \
     last_triggered_at, last_work_order_id, blocked_reason";

const WORK_ORDER_COLUMNS: &str = "id, organization_id, asset_id, title, status, priority, \
     pm_rule_id, pm_trigger_reason, due_date, idempotency_key, created_at";

const LOG_COLUMNS: &str = "rule_id, organization_id, decision, trigger_reason, \
     blocked_reason, message, created_wo_id, latency_ms, evaluated_at";

fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<RuleRecord> {
    Ok(RuleRecord {
        rule_id: row.get(0)?,
        organization_id: row.get(1)?,
        asset_id: row.get(2)?,
        interval_days: row.get(3)?,
        tolerance_days: row.get(4)?,
        next_due: row.get(5)?,
        is_active: row.get(6)?,
        cooldown_hours: row.get(7)?,
        priority: row.get(8)?,
        checklist: row.get(9)?,
        last_evaluated_at: row.get(10)?,
        last_triggered_at: row.get(11)?,
        last_work_order_id: row.get(12)?,
        blocked_reason: row.get(13)?,
    })
}

fn row_to_work_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkOrder> {
    Ok(WorkOrder {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        asset_id: row.get(2)?,
        title: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        pm_rule_id: row.get(6)?,
        pm_trigger_reason: row.get(7)?,
        due_date: row.get(8)?,
        idempotency_key: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<EvaluationLogEntry> {
    let decision: String = row.get(2)?;
    let latency_ms: i64 = row.get(7)?;
    let evaluated_at: String = row.get(8)?;
    Ok(EvaluationLogEntry {
        rule_id: row.get(0)?,
        organization_id: row.get(1)?,
        decision: decision.parse().unwrap_or(Outcome::Error),
        trigger_reason: row.get(3)?,
        blocked_reason: row.get(4)?,
        message: row.get(5)?,
        created_wo_id: row.get(6)?,
        latency_ms: latency_ms.max(0) as u64,
        evaluated_at: parse_timestamp(&evaluated_at).unwrap_or_default(),
    })
}
