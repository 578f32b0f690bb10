//! Chỉ số thời gian giữa các mốc quy trình.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::ReconciledRecord;

/// Giá trị `order_to_specimen_days` khi thiếu một trong hai mốc
/// ("chưa nhận mẫu"). Các chỉ số khác khi đó là `None`.
pub const ORDER_TO_SPECIMEN_UNKNOWN: i64 = -1;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DurationMetrics {
    pub order_to_specimen_days: i64,
    /// Thời gian xét nghiệm (ngày).
    pub specimen_to_report_days: Option<i64>,
    /// Thời gian phát hành kết quả (ngày).
    pub report_to_release_days: Option<i64>,
    /// Cùng khoảng trên, tính bằng phút.
    pub report_to_release_minutes: Option<f64>,
    pub order_to_report_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivedRecord {
    #[serde(flatten)]
    pub record: ReconciledRecord,
    #[serde(flatten)]
    pub metrics: DurationMetrics,
}

impl DurationMetrics {
    pub fn derive(record: &ReconciledRecord) -> Self {
        Self {
            order_to_specimen_days: elapsed_days(record.order_date, record.specimen_received)
                .unwrap_or(ORDER_TO_SPECIMEN_UNKNOWN),
            specimen_to_report_days: elapsed_days(record.specimen_received, record.report_issued),
            report_to_release_days: elapsed_days(record.report_issued, record.report_last_updated),
            report_to_release_minutes: elapsed_minutes(
                record.report_issued,
                record.report_last_updated,
            ),
            order_to_report_days: elapsed_days(record.order_date, record.report_issued),
        }
    }
}

pub fn derive_all(records: Vec<ReconciledRecord>) -> Vec<DerivedRecord> {
    records
        .into_iter()
        .map(|record| {
            let metrics = DurationMetrics::derive(&record);
            DerivedRecord { record, metrics }
        })
        .collect()
}

/// `end - start` làm tròn xuống theo ngày.
pub fn elapsed_days(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Option<i64> {
    Some(floor_days(end? - start?))
}

/// `end - start` tính bằng phút (có phần lẻ).
pub fn elapsed_minutes(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Option<f64> {
    let delta = end? - start?;
    let minutes = match delta.num_microseconds() {
        Some(micros) => micros as f64 / 60_000_000.0,
        None => delta.num_seconds() as f64 / 60.0,
    };
    Some(minutes)
}

fn floor_days(delta: Duration) -> i64 {
    let seconds = delta.num_seconds();
    let days = seconds.div_euclid(SECONDS_PER_DAY);
    // num_seconds cắt về 0: phần lẻ âm dưới một giây vẫn thuộc ngày trước.
    if seconds.rem_euclid(SECONDS_PER_DAY) == 0 && delta < Duration::seconds(seconds) {
        days - 1
    } else {
        days
    }
}
