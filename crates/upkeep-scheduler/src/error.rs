use thiserror::Error;

/// Errors that can occur within the PM scheduling subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A persisted rule failed validation when converted into a typed rule.
    #[error("Invalid rule {rule_id}: {reason}")]
    Validation { rule_id: String, reason: String },

    /// A storage collaborator failed for a reason other than SQLite itself.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Creating the generated work order failed; the rule is not advanced.
    #[error("Work order {work_order_id} could not be written: {reason}")]
    WriteFailure {
        work_order_id: String,
        reason: String,
    },

    /// No rule with the given ID exists in the store.
    #[error("Rule not found: {id}")]
    RuleNotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A connection mutex was poisoned by a panicking holder.
    #[error("Storage lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
