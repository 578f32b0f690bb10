//! Các bảng đếm theo nhóm và timeline theo ngày.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{DashboardConfig, DerivedRecord};

/// Số kết quả theo đơn vị chỉ định và mã xét nghiệm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequesterTestCount {
    pub requester_code: Option<String>,
    pub test_code: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequesterIndicationCount {
    pub requester_code: Option<String>,
    pub reason_code: Option<String>,
    pub count: usize,
}

/// Phân bố thời gian từ nhận mẫu đến phát hành kết quả.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestingDurationCount {
    pub specimen_received: NaiveDateTime,
    pub specimen_to_report_days: Option<i64>,
    pub test_code: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderToSpecimenByRequester {
    pub order_date: NaiveDateTime,
    pub order_to_specimen_days: i64,
    pub requester_code: Option<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderToSpecimenByTest {
    pub order_date: NaiveDateTime,
    pub order_to_specimen_days: i64,
    pub test_code: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseDurationCount {
    pub report_issued: NaiveDateTime,
    pub report_to_release_days: Option<i64>,
    pub test_code: String,
    pub count: usize,
}

/// Các mốc quy trình hiển thị trên timeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    ReportSent,
    ReportIssued,
    OrderAuthored,
    SpecimenReceived,
}

impl Milestone {
    pub const ALL: [Milestone; 4] = [
        Milestone::ReportSent,
        Milestone::ReportIssued,
        Milestone::OrderAuthored,
        Milestone::SpecimenReceived,
    ];

    pub fn timestamp(self, record: &DerivedRecord) -> Option<NaiveDateTime> {
        let record = &record.record;
        match self {
            Milestone::ReportSent => record.report_last_updated,
            Milestone::ReportIssued => record.report_issued,
            Milestone::OrderAuthored => record.order_date,
            Milestone::SpecimenReceived => record.specimen_received,
        }
    }
}

/// Một ngày trên timeline; `None` khi mốc đó không có sự kiện nào trong ngày.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineDay {
    pub date: NaiveDate,
    pub report_sent: Option<usize>,
    pub report_issued: Option<usize>,
    pub order_authored: Option<usize>,
    pub specimen_received: Option<usize>,
}

impl TimelineDay {
    pub fn count(&self, milestone: Milestone) -> Option<usize> {
        match milestone {
            Milestone::ReportSent => self.report_sent,
            Milestone::ReportIssued => self.report_issued,
            Milestone::OrderAuthored => self.order_authored,
            Milestone::SpecimenReceived => self.specimen_received,
        }
    }
}

/// Dòng timeline dạng dài `(date, event, count)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineEntry {
    pub date: NaiveDate,
    pub event: Milestone,
    pub count: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DashboardViews {
    pub reports_by_requester: Vec<RequesterTestCount>,
    pub orders_by_indication: Vec<RequesterIndicationCount>,
    pub testing_durations: Vec<TestingDurationCount>,
    pub order_to_specimen_by_requester: Vec<OrderToSpecimenByRequester>,
    pub order_to_specimen_by_test: Vec<OrderToSpecimenByTest>,
    pub release_durations: Vec<ReleaseDurationCount>,
    pub timeline: Vec<TimelineDay>,
}

impl DashboardViews {
    pub fn build(records: &[DerivedRecord], config: &DashboardConfig) -> Self {
        let cutoff = config.reporting_cutoff;
        Self {
            reports_by_requester: reports_by_requester(records, cutoff),
            orders_by_indication: orders_by_indication(records, cutoff),
            testing_durations: testing_durations(records, cutoff),
            order_to_specimen_by_requester: order_to_specimen_by_requester(records, cutoff),
            order_to_specimen_by_test: order_to_specimen_by_test(records, cutoff),
            release_durations: release_durations(records, cutoff),
            timeline: daily_timeline(records, config.timeline_anchor, config.timeline_days),
        }
    }

    /// Chuyển timeline sang dạng dài, nhóm theo từng mốc.
    pub fn timeline_long(&self) -> Vec<TimelineEntry> {
        Milestone::ALL
            .iter()
            .flat_map(|&event| {
                self.timeline.iter().map(move |day| TimelineEntry {
                    date: day.date,
                    event,
                    count: day.count(event),
                })
            })
            .collect()
    }
}

/// Giữ bản ghi có mốc thời gian lớn hơn hẳn `cutoff`.
///
/// Khi có `cutoff`, bản ghi thiếu mốc thời gian bị loại.
pub fn after_cutoff<'a>(
    records: &'a [DerivedRecord],
    cutoff: Option<NaiveDateTime>,
    relevant: impl Fn(&DerivedRecord) -> Option<NaiveDateTime> + 'a,
) -> impl Iterator<Item = &'a DerivedRecord> + 'a {
    records.iter().filter(move |record| match cutoff {
        None => true,
        Some(cutoff) => relevant(record).is_some_and(|date| date > cutoff),
    })
}

/// Nhóm lớn nhất đứng trước.
pub fn reports_by_requester(
    records: &[DerivedRecord],
    cutoff: Option<NaiveDateTime>,
) -> Vec<RequesterTestCount> {
    let groups = count_by(
        after_cutoff(records, cutoff, |r| r.record.report_last_updated).map(|r| {
            (r.record.requester_code.clone(), r.record.test_code.clone())
        }),
    );

    let mut rows: Vec<RequesterTestCount> = groups
        .into_iter()
        .map(|((requester_code, test_code), count)| RequesterTestCount {
            requester_code,
            test_code,
            count,
        })
        .collect();
    // sort ổn định: giữ thứ tự khoá khi bằng nhau.
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

pub fn orders_by_indication(
    records: &[DerivedRecord],
    cutoff: Option<NaiveDateTime>,
) -> Vec<RequesterIndicationCount> {
    count_by(
        after_cutoff(records, cutoff, |r| r.record.order_date).map(|r| {
            (r.record.requester_code.clone(), r.record.reason_code.clone())
        }),
    )
    .into_iter()
    .map(|((requester_code, reason_code), count)| RequesterIndicationCount {
        requester_code,
        reason_code,
        count,
    })
    .collect()
}

pub fn testing_durations(
    records: &[DerivedRecord],
    cutoff: Option<NaiveDateTime>,
) -> Vec<TestingDurationCount> {
    count_by(
        after_cutoff(records, cutoff, |r| r.record.specimen_received).filter_map(|r| {
            let received = r.record.specimen_received?;
            Some((
                received,
                r.metrics.specimen_to_report_days,
                r.record.test_code.clone(),
            ))
        }),
    )
    .into_iter()
    .map(
        |((specimen_received, specimen_to_report_days, test_code), count)| TestingDurationCount {
            specimen_received,
            specimen_to_report_days,
            test_code,
            count,
        },
    )
    .collect()
}

pub fn order_to_specimen_by_requester(
    records: &[DerivedRecord],
    cutoff: Option<NaiveDateTime>,
) -> Vec<OrderToSpecimenByRequester> {
    count_by(
        after_cutoff(records, cutoff, |r| r.record.order_date).filter_map(|r| {
            let ordered = r.record.order_date?;
            Some((
                ordered,
                r.metrics.order_to_specimen_days,
                r.record.requester_code.clone(),
            ))
        }),
    )
    .into_iter()
    .map(
        |((order_date, order_to_specimen_days, requester_code), count)| {
            OrderToSpecimenByRequester {
                order_date,
                order_to_specimen_days,
                requester_code,
                count,
            }
        },
    )
    .collect()
}

pub fn order_to_specimen_by_test(
    records: &[DerivedRecord],
    cutoff: Option<NaiveDateTime>,
) -> Vec<OrderToSpecimenByTest> {
    count_by(
        after_cutoff(records, cutoff, |r| r.record.order_date).filter_map(|r| {
            let ordered = r.record.order_date?;
            Some((
                ordered,
                r.metrics.order_to_specimen_days,
                r.record.test_code.clone(),
            ))
        }),
    )
    .into_iter()
    .map(
        |((order_date, order_to_specimen_days, test_code), count)| OrderToSpecimenByTest {
            order_date,
            order_to_specimen_days,
            test_code,
            count,
        },
    )
    .collect()
}

pub fn release_durations(
    records: &[DerivedRecord],
    cutoff: Option<NaiveDateTime>,
) -> Vec<ReleaseDurationCount> {
    count_by(
        after_cutoff(records, cutoff, |r| r.record.report_issued).filter_map(|r| {
            let issued = r.record.report_issued?;
            Some((
                issued,
                r.metrics.report_to_release_days,
                r.record.test_code.clone(),
            ))
        }),
    )
    .into_iter()
    .map(
        |((report_issued, report_to_release_days, test_code), count)| ReleaseDurationCount {
            report_issued,
            report_to_release_days,
            test_code,
            count,
        },
    )
    .collect()
}

/// Đếm từng mốc theo ngày trong `days` ngày liên tiếp từ `anchor`.
///
/// Luôn trả về đúng `days` dòng, mỗi ngày một dòng.
pub fn daily_timeline(records: &[DerivedRecord], anchor: NaiveDate, days: u32) -> Vec<TimelineDay> {
    let per_day = |milestone: Milestone| -> BTreeMap<NaiveDate, usize> {
        count_by(
            records
                .iter()
                .filter_map(|record| milestone.timestamp(record))
                .map(|timestamp| timestamp.date()),
        )
    };

    let sent = per_day(Milestone::ReportSent);
    let issued = per_day(Milestone::ReportIssued);
    let authored = per_day(Milestone::OrderAuthored);
    let received = per_day(Milestone::SpecimenReceived);

    anchor
        .iter_days()
        .take(days as usize)
        .map(|date| TimelineDay {
            date,
            report_sent: sent.get(&date).copied(),
            report_issued: issued.get(&date).copied(),
            order_authored: authored.get(&date).copied(),
            specimen_received: received.get(&date).copied(),
        })
        .collect()
}

fn count_by<K: Ord>(keys: impl Iterator<Item = K>) -> BTreeMap<K, usize> {
    let mut groups = BTreeMap::new();
    for key in keys {
        *groups.entry(key).or_insert(0) += 1;
    }
    groups
}
