//! Pure PM rule evaluation.
//!
//! [`evaluate`] takes a rule, a fresh asset snapshot and the current instant
//! and decides whether the rule should produce a work order now. It performs
//! no I/O and holds no state, so it is safe to call from any number of tasks
//! at once and always returns the same result for the same inputs.

use chrono::{DateTime, Duration, Utc};

use crate::types::{AssetState, BlockedReason, EvaluationResult, PmRule, TriggerReason};

/// Decide SHOULD_TRIGGER / BLOCKED / WAIT for `rule`.
///
/// Checks, in order:
/// 1. `interval_days <= 0` → blocked (`validation_error`)
/// 2. asset in breakdown or out of service → blocked (`asset_unavailable`)
/// 3. an open PM work order for this rule → blocked (`pending_work_order_exists`)
/// 4. `now < next_due - tolerance_days` → wait
/// 5. otherwise → should trigger, with `next_due = max(now, next_due) + interval_days`
///
/// Step 5 anchors on `max(now, next_due)` so that a rule left untriggered
/// through a long outage fires once and moves forward instead of replaying
/// every missed period. The original cadence phase is not preserved.
pub fn evaluate(rule: &PmRule, asset: &AssetState, now: DateTime<Utc>) -> EvaluationResult {
    if rule.interval_days <= 0 {
        return EvaluationResult::blocked(
            BlockedReason::ValidationError,
            format!("interval_days must be positive (got {})", rule.interval_days),
        );
    }

    if asset.status.is_unavailable() {
        return EvaluationResult::blocked(
            BlockedReason::AssetUnavailable,
            format!(
                "asset {} is {}; planned maintenance deferred",
                asset.asset_id, asset.status
            ),
        );
    }

    if asset.has_pending_pm_work_order {
        return EvaluationResult::blocked(
            BlockedReason::PendingWorkOrderExists,
            format!("an open PM work order already exists for rule {}", rule.rule_id),
        );
    }

    let Some(window_opens) = Duration::try_days(rule.tolerance_days.max(0))
        .and_then(|tolerance| rule.next_due.checked_sub_signed(tolerance))
    else {
        return EvaluationResult::blocked(
            BlockedReason::ValidationError,
            format!("tolerance_days out of range (got {})", rule.tolerance_days),
        );
    };
    if now < window_opens {
        return EvaluationResult::wait(format!(
            "not due yet; window opens at {}",
            window_opens.to_rfc3339()
        ));
    }

    let Some(next_due) = compute_next_due(rule, now) else {
        return EvaluationResult::blocked(
            BlockedReason::ValidationError,
            format!("interval_days out of range (got {})", rule.interval_days),
        );
    };
    EvaluationResult::should_trigger(
        TriggerReason::Scheduled,
        next_due,
        format!(
            "due at {}; next due {}",
            rule.next_due.to_rfc3339(),
            next_due.to_rfc3339()
        ),
    )
}

/// `max(now, rule.next_due) + interval_days`. Always later than `rule.next_due`
/// for a positive interval; `None` when the result is not representable.
pub fn compute_next_due(rule: &PmRule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Duration::try_days(rule.interval_days)
        .and_then(|interval| now.max(rule.next_due).checked_add_signed(interval))
}
