//! `upkeep-scheduler`: preventive-maintenance rule evaluation and idempotent
//! work-order scheduling.
//!
//! # Overview
//!
//! A pass is driven by [`runner::SchedulerRunner`]: it selects due rules via
//! the indexed query on [`repository::PmRepository`], builds an
//! [`types::AssetState`] for each ([`assets::AssetStateLoader`]), asks the pure
//! [`evaluator::evaluate`] for a decision and applies side effects:
//!
//! | Decision         | Side effects (skipped on dry run)                          |
//! |------------------|------------------------------------------------------------|
//! | `ShouldTrigger`  | create-if-absent work order `pm_{rule}_{YYYYMMDD}`, then advance `next_due` |
//! | `Blocked`        | persist `blocked_reason` + `last_evaluated_at`             |
//! | `Wait`           | none                                                       |
//!
//! Outside dry runs every processed rule gets an evaluation log entry; log write failures are
//! swallowed. One rule failing never stops the rest of the batch.

pub mod assets;
pub mod db;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod idempotency;
pub mod repository;
pub mod result;
pub mod runner;
pub mod types;

pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use repository::{PmRepository, SqliteRepository};
pub use result::{RuleDetail, RunnerResult};
pub use runner::{RunOptions, SchedulerRunner, SchedulerStatus};
pub use types::{
    AssetState, AssetStatus, BlockedReason, Decision, EvaluationResult, Outcome, PmRule,
    RuleRecord,
};
