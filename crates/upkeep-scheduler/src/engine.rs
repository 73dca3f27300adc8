use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::runner::{RunOptions, SchedulerRunner};

/// Built-in periodic trigger: runs a pass every `every` until shutdown.
///
/// External cron triggers and this loop can overlap freely; see
/// [`SchedulerRunner`] for why that is safe.
pub struct SchedulerEngine {
    runner: Arc<SchedulerRunner>,
    options: RunOptions,
    every: Duration,
}

impl SchedulerEngine {
    pub fn new(runner: Arc<SchedulerRunner>, options: RunOptions, every: Duration) -> Self {
        Self {
            runner,
            options,
            every,
        }
    }

    /// Main loop. Ticks immediately, then every `every`, until `shutdown`
    /// broadcasts `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(every_secs = self.every.as_secs(), "PM scheduler engine started");

        let mut interval = tokio::time::interval(self.every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.runner.run(&self.options).await {
                        error!("PM scheduler pass could not start: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("PM scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::format_timestamp;
    use crate::repository::SqliteRepository;
    use crate::types::{Organization, RuleRecord};
    use chrono::Utc;
    use upkeep_core::config::SchedulerConfig;

    #[tokio::test]
    async fn first_tick_runs_a_pass_and_shutdown_stops_the_loop() {
        let repo = Arc::new(SqliteRepository::open_in_memory().unwrap());
        repo.insert_organization(&Organization {
            id: "org".to_string(),
            name: "Org".to_string(),
            is_demo: false,
        })
        .unwrap();
        repo.insert_rule(&RuleRecord {
            rule_id: "r1".to_string(),
            organization_id: "org".to_string(),
            asset_id: "a1".to_string(),
            interval_days: 7,
            tolerance_days: 0,
            next_due: format_timestamp(Utc::now() - chrono::Duration::days(1)),
            is_active: true,
            cooldown_hours: 0,
            priority: "medium".to_string(),
            checklist: "[]".to_string(),
            last_evaluated_at: None,
            last_triggered_at: None,
            last_work_order_id: None,
            blocked_reason: None,
        })
        .unwrap();

        let runner = Arc::new(SchedulerRunner::new(repo.clone(), SchedulerConfig::default()));
        let options = runner.default_options();
        let engine = SchedulerEngine::new(runner, options, Duration::from_secs(3600));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(rx));

        for _ in 0..50 {
            if !repo.work_orders_for_rule("r1").unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(repo.work_orders_for_rule("r1").unwrap().len(), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("engine should stop")
            .unwrap();
    }
}
