//! Ghép chỉ định → mẫu → kết quả.

use std::collections::{hash_map::Entry, HashMap};

use chrono::{DateTime, FixedOffset, NaiveDateTime};

use crate::{Order, ReconciledRecord, Report, Specimen};

/// Mỗi kết quả cho đúng một bản ghi, cùng thứ tự với `reports`.
///
/// Hai phép left join nối tiếp: theo `order_id` rồi theo `specimen_id`.
pub fn reconcile(
    reports: &[Report],
    orders: &[Order],
    specimens: &[Specimen],
) -> Vec<ReconciledRecord> {
    let with_orders = join_orders(reports, orders);
    join_specimens(with_orders, specimens)
}

pub fn join_orders(reports: &[Report], orders: &[Order]) -> Vec<ReconciledRecord> {
    let index = first_by_id(orders, |order| &order.id);
    let mut unmatched = 0usize;

    let records: Vec<ReconciledRecord> = reports
        .iter()
        .map(|report| {
            let order = report
                .order_id
                .as_deref()
                .and_then(|id| index.get(id).copied());
            if order.is_none() {
                unmatched += 1;
            }

            ReconciledRecord {
                report_id: report.id.clone(),
                performer_display: report.performer_display.clone(),
                performer_code: report.performer_code.clone(),
                test_code: report.test_code.clone(),
                test_display: report.test_display.clone(),
                report_last_updated: to_canonical(report.last_updated_date),
                report_issued: to_canonical(report.issued_date),
                report_effective: to_canonical(report.effective_date),
                order_id: report.order_id.clone(),
                specimen_id: report.specimen_id.clone(),
                requester_display: order.and_then(|o| o.requester_display.clone()),
                requester_code: order.and_then(|o| o.requester_code.clone()),
                order_date: order.and_then(|o| to_canonical(o.order_date)),
                reason_code: order.map(|o| o.reason_code.clone()),
                reason_display: order.map(|o| o.reason_display.clone()),
                specimen_received: None,
            }
        })
        .collect();

    tracing::debug!(reports = records.len(), unmatched, "joined reports to orders");

    records
}

pub fn join_specimens(
    records: Vec<ReconciledRecord>,
    specimens: &[Specimen],
) -> Vec<ReconciledRecord> {
    let index = first_by_id(specimens, |specimen| &specimen.id);
    let mut unmatched = 0usize;

    let joined: Vec<ReconciledRecord> = records
        .into_iter()
        .map(|record| {
            let specimen = record
                .specimen_id
                .as_deref()
                .and_then(|id| index.get(id).copied());
            if specimen.is_none() {
                unmatched += 1;
            }
            ReconciledRecord {
                specimen_received: specimen.and_then(|s| to_canonical(s.received_date)),
                ..record
            }
        })
        .collect();

    tracing::debug!(reports = joined.len(), unmatched, "joined reports to specimens");

    joined
}

/// Quy về UTC rồi bỏ múi giờ.
pub fn to_canonical(timestamp: Option<DateTime<FixedOffset>>) -> Option<NaiveDateTime> {
    timestamp.map(|dt| dt.naive_utc())
}

/// Trùng id thì giữ bản đầu tiên.
fn first_by_id<'a, T>(items: &'a [T], id: impl Fn(&T) -> &String) -> HashMap<&'a str, &'a T> {
    let mut index = HashMap::with_capacity(items.len());
    let mut duplicates = 0usize;
    for item in items {
        match index.entry(id(item).as_str()) {
            Entry::Occupied(_) => duplicates += 1,
            Entry::Vacant(entry) => {
                entry.insert(item);
            }
        }
    }
    if duplicates > 0 {
        tracing::warn!(duplicates, "duplicate resource ids, keeping first occurrence");
    }
    index
}
