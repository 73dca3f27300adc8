use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    error::Result,
    repository::PmRepository,
    types::{AssetState, AssetStatus, PmRule},
};

/// Assembles the [`AssetState`] snapshot the evaluator needs for one rule.
///
/// Asset lookups are fail-open: if the asset read fails the status defaults
/// to `operational` and a warning is logged, so a storage hiccup results in
/// an evaluation on default data rather than a silently skipped PM. A missing
/// asset record is treated the same way. The open-work-order lookup is not
/// fail-open; its errors propagate and fail the rule for this pass.
pub struct AssetStateLoader {
    repo: Arc<dyn PmRepository>,
}

impl AssetStateLoader {
    pub fn new(repo: Arc<dyn PmRepository>) -> Self {
        Self { repo }
    }

    pub async fn load(&self, rule: &PmRule) -> Result<AssetState> {
        let status = match self.repo.get_asset_status(&rule.asset_id).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                debug!(
                    rule_id = %rule.rule_id,
                    asset_id = %rule.asset_id,
                    "asset record not found; assuming operational"
                );
                AssetStatus::Operational
            }
            Err(e) => {
                warn!(
                    rule_id = %rule.rule_id,
                    asset_id = %rule.asset_id,
                    error = %e,
                    "asset lookup failed; evaluating as operational (fail-open)"
                );
                AssetStatus::Operational
            }
        };

        let has_pending_pm_work_order = self.repo.has_open_pm_work_order(&rule.rule_id).await?;

        Ok(AssetState {
            asset_id: rule.asset_id.clone(),
            status,
            has_pending_pm_work_order,
        })
    }
}
