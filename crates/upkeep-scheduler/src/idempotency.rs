//! Deterministic identifiers for generated work orders.
//!
//! Two passes that trigger the same rule for the same due date derive the
//! same id, so the second create is a no-op instead of a duplicate.

use chrono::{DateTime, Utc};

/// `pm_{sanitized_rule_id}_{YYYYMMDD}` for the due date being satisfied.
pub fn work_order_id(rule_id: &str, due: DateTime<Utc>) -> String {
    format!("pm_{}_{}", sanitize(rule_id), due.format("%Y%m%d"))
}

/// Secondary dedupe key, stored in the unique `idempotency_key` column.
pub fn idempotency_key(rule_id: &str, due: DateTime<Utc>) -> String {
    format!("pm:{}:{}", rule_id, due.format("%Y-%m-%d"))
}

/// Replace every character that is not ASCII alphanumeric or `_` with `_`.
pub fn sanitize(rule_id: &str) -> String {
    rule_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn id_format() {
        let due = Utc.with_ymd_and_hms(2026, 2, 3, 17, 45, 0).unwrap();
        assert_eq!(work_order_id("rule42", due), "pm_rule42_20260203");
    }

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize("org/a.b-c d"), "org_a_b_c_d");
        assert_eq!(sanitize("keep_me_1"), "keep_me_1");
        assert_eq!(sanitize("mötor"), "m_tor");
    }

    #[test]
    fn same_day_same_id() {
        let morning = Utc.with_ymd_and_hms(2026, 2, 3, 1, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2026, 2, 3, 23, 0, 0).unwrap();
        assert_eq!(work_order_id("r-1", morning), work_order_id("r-1", evening));
        assert_eq!(idempotency_key("r-1", morning), "pm:r-1:2026-02-03");
    }
}
