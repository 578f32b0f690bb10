//! Refresh cycle owning the published snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hie_core::{DashboardConfig, DashboardSnapshot, HieError};
use serde::Serialize;

use crate::fetch::{fetch_all, BundleSource};
use crate::normalize::normalize_batch;

/// Outcome of the most recent refresh attempts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshStatus {
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<RefreshFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshFailure {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl RefreshStatus {
    /// True when nothing was published yet or the latest attempt failed.
    pub fn is_stale(&self) -> bool {
        match (&self.last_success, &self.last_failure) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(success), Some(failure)) => failure.at >= *success,
        }
    }
}

/// Fetch → normalize → join → derive → aggregate, on demand.
///
/// `refresh` takes `&mut self`, so two cycles can never overlap. A snapshot
/// is published only once it is complete; a failed cycle leaves the previous
/// one in place.
pub struct RefreshPipeline<S> {
    source: S,
    start_url: String,
    config: DashboardConfig,
    current: Option<Arc<DashboardSnapshot>>,
    status: RefreshStatus,
}

impl<S: BundleSource> RefreshPipeline<S> {
    pub fn new(source: S, start_url: impl Into<String>, config: DashboardConfig) -> Self {
        Self {
            source,
            start_url: start_url.into(),
            config,
            current: None,
            status: RefreshStatus::default(),
        }
    }

    pub fn refresh(&mut self) -> Result<Arc<DashboardSnapshot>, HieError> {
        match self.run_cycle() {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.status.last_success = Some(snapshot.generated_at);
                self.current = Some(Arc::clone(&snapshot));
                tracing::info!(
                    records = snapshot.record_count(),
                    "published dashboard snapshot"
                );
                Ok(snapshot)
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    has_previous = self.current.is_some(),
                    "refresh failed, keeping previous snapshot"
                );
                self.status.last_failure = Some(RefreshFailure {
                    at: Utc::now(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn run_cycle(&self) -> Result<DashboardSnapshot, HieError> {
        let fetched = fetch_all(&self.source, &self.start_url)?;
        tracing::debug!(
            pages = fetched.pages,
            reported_total = ?fetched.reported_total,
            reports = fetched.diagnostic_reports.len(),
            "fetch complete"
        );
        let batch = normalize_batch(&fetched, &self.config);
        Ok(DashboardSnapshot::build(&batch, &self.config))
    }

    /// Last fully built snapshot, if any.
    pub fn current(&self) -> Option<Arc<DashboardSnapshot>> {
        self.current.clone()
    }

    pub fn status(&self) -> &RefreshStatus {
        &self.status
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}
