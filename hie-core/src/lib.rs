//! Logic lõi đối soát chỉ định, mẫu bệnh phẩm và kết quả xét nghiệm gen.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod lineage;
pub mod metrics;
pub mod snapshot;

pub use aggregate::{
    DashboardViews, Milestone, OrderToSpecimenByRequester, OrderToSpecimenByTest,
    ReleaseDurationCount, RequesterIndicationCount, RequesterTestCount, TestingDurationCount,
    TimelineDay, TimelineEntry,
};
pub use lineage::reconcile;
pub use metrics::{derive_all, DerivedRecord, DurationMetrics, ORDER_TO_SPECIMEN_UNKNOWN};
pub use snapshot::{empty_snapshot, DashboardSnapshot};

pub const DEFAULT_TIMELINE_DAYS: u32 = 100;

pub const DEFAULT_TIMELINE_ANCHOR: NaiveDate = match NaiveDate::from_ymd_opt(2025, 10, 1) {
    Some(date) => date,
    None => panic!("ngày bắt đầu timeline không hợp lệ"),
};

pub const DEFAULT_INDICATION_SYSTEM: &str =
    "https://fhir.nhs.uk/CodeSystem/England-GenomicTestDirectory";

/// Cấu hình cửa sổ timeline và bộ lọc các bảng tổng hợp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardConfig {
    pub timeline_anchor: NaiveDate,
    pub timeline_days: u32,
    /// Chỉ đếm bản ghi có mốc thời gian sau thời điểm này (UTC).
    #[serde(default)]
    pub reporting_cutoff: Option<NaiveDateTime>,
    /// Hệ mã dùng cho chỉ định lâm sàng; `None` lấy coding cuối cùng.
    #[serde(default)]
    pub indication_system: Option<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            timeline_anchor: DEFAULT_TIMELINE_ANCHOR,
            timeline_days: DEFAULT_TIMELINE_DAYS,
            reporting_cutoff: None,
            indication_system: Some(DEFAULT_INDICATION_SYSTEM.to_string()),
        }
    }
}

/// Chỉ định xét nghiệm (ServiceRequest).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Order {
    pub id: String,
    pub requester_display: Option<String>,
    pub requester_code: Option<String>,
    pub order_date: Option<DateTime<FixedOffset>>,
    pub reason_code: String,
    pub reason_display: String,
}

/// Mẫu bệnh phẩm đã nhận.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Specimen {
    pub id: String,
    pub received_date: Option<DateTime<FixedOffset>>,
}

/// Kết quả xét nghiệm (DiagnosticReport).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Report {
    pub id: String,
    pub performer_display: Option<String>,
    pub performer_code: Option<String>,
    pub test_code: String,
    pub test_display: String,
    /// `meta.lastUpdated`, tức thời điểm gửi kết quả.
    pub last_updated_date: Option<DateTime<FixedOffset>>,
    pub issued_date: Option<DateTime<FixedOffset>>,
    pub effective_date: Option<DateTime<FixedOffset>>,
    pub order_id: Option<String>,
    pub specimen_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NormalizedBatch {
    pub orders: Vec<Order>,
    pub specimens: Vec<Specimen>,
    pub reports: Vec<Report>,
}

/// Một kết quả kèm chỉ định và mẫu tương ứng (nếu có).
///
/// Mọi mốc thời gian đã quy về UTC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReconciledRecord {
    pub report_id: String,
    pub performer_display: Option<String>,
    pub performer_code: Option<String>,
    pub test_code: String,
    pub test_display: String,
    pub report_last_updated: Option<NaiveDateTime>,
    pub report_issued: Option<NaiveDateTime>,
    pub report_effective: Option<NaiveDateTime>,
    pub order_id: Option<String>,
    pub specimen_id: Option<String>,
    pub requester_display: Option<String>,
    pub requester_code: Option<String>,
    pub order_date: Option<NaiveDateTime>,
    pub reason_code: Option<String>,
    pub reason_display: Option<String>,
    pub specimen_received: Option<NaiveDateTime>,
}

/// Lỗi chung khi làm mới dữ liệu.
#[derive(Debug, thiserror::Error)]
pub enum HieError {
    #[error("Cấu hình không hợp lệ: {0}")]
    Config(String),
    #[error("Lỗi kết nối: {0}")]
    Transport(String),
    #[error("Máy chủ trả về HTTP {status} cho {url}")]
    Status { status: u16, url: String },
    #[error("Không đọc được dữ liệu: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_reporting_window() {
        let config = DashboardConfig::default();
        assert_eq!(
            config.timeline_anchor,
            NaiveDate::from_ymd_opt(2025, 10, 1).unwrap()
        );
        assert_eq!(config.timeline_anchor, DEFAULT_TIMELINE_ANCHOR);
        assert_eq!(config.timeline_days, 100);
        assert!(config.reporting_cutoff.is_none());
    }

    #[test]
    fn config_deserializes_without_optional_fields() {
        let config: DashboardConfig = serde_json::from_str(
            r#"{"timeline_anchor":"2026-01-01","timeline_days":7}"#,
        )
        .unwrap();
        assert_eq!(config.timeline_days, 7);
        assert!(config.indication_system.is_none());
    }

    #[test]
    fn status_error_names_url() {
        let err = HieError::Status {
            status: 503,
            url: "https://fhir.example/DiagnosticReport".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Máy chủ trả về HTTP 503 cho https://fhir.example/DiagnosticReport"
        );
    }
}
