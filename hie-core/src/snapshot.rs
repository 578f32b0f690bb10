use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::DashboardViews, lineage::reconcile, metrics::derive_all, DashboardConfig,
    DerivedRecord, NormalizedBatch,
};

/// Kết quả bất biến của một lần làm mới.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub records: Vec<DerivedRecord>,
    pub views: DashboardViews,
}

impl DashboardSnapshot {
    pub fn build(batch: &NormalizedBatch, config: &DashboardConfig) -> Self {
        let reconciled = reconcile(&batch.reports, &batch.orders, &batch.specimens);
        let records = derive_all(reconciled);
        let views = DashboardViews::build(&records, config);

        tracing::info!(
            reports = batch.reports.len(),
            orders = batch.orders.len(),
            specimens = batch.specimens.len(),
            "built dashboard snapshot"
        );

        Self {
            generated_at: Utc::now(),
            records,
            views,
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn views(&self) -> &DashboardViews {
        &self.views
    }
}

/// Snapshot rỗng (timeline vẫn đủ độ dài).
pub fn empty_snapshot(config: &DashboardConfig) -> DashboardSnapshot {
    DashboardSnapshot::build(&NormalizedBatch::default(), config)
}
