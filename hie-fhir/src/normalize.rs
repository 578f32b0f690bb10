//! Flatten typed FHIR resources into the rows the joiner consumes.
//!
//! Lists are resolved with a "last element wins" rule: the last coding of a
//! concept, the last non-empty reference, the last performer or requester.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use hie_core::{DashboardConfig, NormalizedBatch, Order, Report, Specimen};

use crate::bundle::FetchedResources;
use crate::resources::{
    CodeableConcept, Coding, DiagnosticReportResource, Reference, ServiceRequestResource,
    SpecimenResource, TypedResource,
};

pub const SERVICE_REQUEST_PREFIX: &str = "ServiceRequest/";
pub const SPECIMEN_PREFIX: &str = "Specimen/";

/// Normalize everything fetched in one cycle.
pub fn normalize_batch(fetched: &FetchedResources, config: &DashboardConfig) -> NormalizedBatch {
    let indication_system = config.indication_system.as_deref();
    NormalizedBatch {
        orders: fetched
            .service_requests
            .iter()
            .map(|request| normalize_order(request, indication_system))
            .collect(),
        specimens: fetched.specimens.iter().map(normalize_specimen).collect(),
        reports: fetched
            .diagnostic_reports
            .iter()
            .map(normalize_report)
            .collect(),
    }
}

pub fn normalize_order(request: &ServiceRequestResource, indication_system: Option<&str>) -> Order {
    let (requester_display, requester_code) = last_identity(request.requester.as_deref());
    let concepts = request.reason_code.as_deref().unwrap_or_default();
    let reason = match indication_system {
        Some(system) => last_coding_in_system(concepts, system),
        None => last_coding_of_all(concepts),
    };

    Order {
        id: request.resource_id(),
        requester_display,
        requester_code,
        order_date: parse_timestamp(request.authored_on.as_deref()),
        reason_code: coding_code(reason),
        reason_display: coding_display(reason),
    }
}

pub fn normalize_specimen(specimen: &SpecimenResource) -> Specimen {
    Specimen {
        id: specimen.resource_id(),
        received_date: parse_timestamp(specimen.received_time.as_deref()),
    }
}

pub fn normalize_report(report: &DiagnosticReportResource) -> Report {
    let (performer_display, performer_code) = last_identity(report.performer.as_deref());
    let test = last_coding(report.code.as_ref());

    Report {
        id: report.resource_id(),
        performer_display,
        performer_code,
        test_code: coding_code(test),
        test_display: coding_display(test),
        last_updated_date: parse_timestamp(
            report
                .meta
                .as_ref()
                .and_then(|meta| meta.last_updated.as_deref()),
        ),
        issued_date: parse_timestamp(report.issued.as_deref()),
        effective_date: parse_timestamp(report.effective_date_time.as_deref()),
        order_id: last_reference_id(report.based_on.as_deref(), SERVICE_REQUEST_PREFIX),
        specimen_id: last_reference_id(report.specimen.as_deref(), SPECIMEN_PREFIX),
    }
}

/// Last coding of a concept.
pub fn last_coding(concept: Option<&CodeableConcept>) -> Option<&Coding> {
    concept?.codings().last()
}

/// Last coding across a list of concepts.
pub fn last_coding_of_all(concepts: &[CodeableConcept]) -> Option<&Coding> {
    concepts
        .iter()
        .flat_map(CodeableConcept::codings)
        .last()
}

/// Last coding across a list of concepts whose `system` equals `system`.
pub fn last_coding_in_system<'a>(
    concepts: &'a [CodeableConcept],
    system: &str,
) -> Option<&'a Coding> {
    concepts
        .iter()
        .flat_map(CodeableConcept::codings)
        .filter(|coding| coding.system.as_deref() == Some(system))
        .last()
}

/// Code of a coding, empty when absent.
pub fn coding_code(coding: Option<&Coding>) -> String {
    coding
        .and_then(|coding| coding.code.clone())
        .unwrap_or_default()
}

/// Display of a coding, empty when absent.
pub fn coding_display(coding: Option<&Coding>) -> String {
    coding
        .and_then(|coding| coding.display.clone())
        .unwrap_or_default()
}

/// Bare id of the last reference that carries one, with `prefix` removed.
pub fn last_reference_id(references: Option<&[Reference]>, prefix: &str) -> Option<String> {
    references?
        .iter()
        .filter_map(|item| item.reference.as_deref())
        .last()
        .map(|reference| reference.strip_prefix(prefix).unwrap_or(reference).to_string())
}

/// Display name and identifier value of a reference.
pub fn reference_identity(reference: Option<&Reference>) -> (Option<String>, Option<String>) {
    match reference {
        Some(reference) => (
            reference.display.clone(),
            reference
                .identifier
                .as_ref()
                .and_then(|identifier| identifier.value.clone()),
        ),
        None => (None, None),
    }
}

/// Identity of the last reference in a performer or requester list.
pub fn last_identity(references: Option<&[Reference]>) -> (Option<String>, Option<String>) {
    reference_identity(references.and_then(|list| list.last()))
}

/// Parse a FHIR date, dateTime or instant.
///
/// Values without an offset are read as UTC; partial dates resolve to the
/// first instant of the period. Anything unparseable becomes `None`.
pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<FixedOffset>> {
    let text = value?.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt);
    }

    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| parse_partial_date(text).and_then(|date| date.and_hms_opt(0, 0, 0)));

    match naive {
        Some(naive) => FixedOffset::east_opt(0)?.from_local_datetime(&naive).single(),
        None => {
            tracing::debug!(value = text, "unparseable timestamp");
            None
        }
    }
}

fn parse_partial_date(text: &str) -> Option<NaiveDate> {
    match text.len() {
        10 => NaiveDate::parse_from_str(text, "%Y-%m-%d").ok(),
        7 => NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d").ok(),
        4 => text
            .parse::<i32>()
            .ok()
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Identifier;
    use chrono::{Datelike, Timelike};

    fn coding(system: Option<&str>, code: &str) -> Coding {
        Coding {
            system: system.map(str::to_string),
            code: Some(code.to_string()),
            display: Some(format!("{code} display")),
        }
    }

    fn concept(codings: Vec<Coding>) -> CodeableConcept {
        CodeableConcept {
            coding: Some(codings),
            text: None,
        }
    }

    fn reference(value: Option<&str>) -> Reference {
        Reference {
            reference: value.map(str::to_string),
            ..Reference::default()
        }
    }

    #[test]
    fn coding_extraction_takes_last_entry() {
        let code = concept(vec![coding(None, "A"), coding(None, "B")]);

        let last = last_coding(Some(&code));

        assert_eq!(coding_code(last), "B");
        assert_eq!(coding_display(last), "B display");
    }

    #[test]
    fn empty_or_missing_concept_yields_empty_code() {
        assert_eq!(coding_code(last_coding(None)), "");
        assert_eq!(coding_code(last_coding(Some(&concept(vec![])))), "");
        assert_eq!(coding_display(last_coding(Some(&CodeableConcept::default()))), "");
    }

    #[test]
    fn system_filter_takes_last_matching_coding() {
        let concepts = vec![
            concept(vec![coding(Some("http://snomed.info/sct"), "1234")]),
            concept(vec![
                coding(Some("urn:test-directory"), "R210"),
                coding(Some("urn:test-directory"), "R210.2"),
                coding(Some("http://snomed.info/sct"), "5678"),
            ]),
        ];

        let matched = last_coding_in_system(&concepts, "urn:test-directory");
        assert_eq!(coding_code(matched), "R210.2");

        let unmatched = last_coding_in_system(&concepts, "urn:other");
        assert_eq!(coding_code(unmatched), "");

        assert_eq!(coding_code(last_coding_of_all(&concepts)), "5678");
    }

    #[test]
    fn reference_extraction_strips_prefix() {
        let based_on = vec![reference(Some("ServiceRequest/123"))];
        assert_eq!(
            last_reference_id(Some(based_on.as_slice()), SERVICE_REQUEST_PREFIX).as_deref(),
            Some("123")
        );
    }

    #[test]
    fn reference_extraction_skips_null_and_takes_last() {
        let specimens = vec![
            reference(Some("Specimen/sp-1")),
            reference(Some("Specimen/sp-2")),
            reference(None),
        ];
        assert_eq!(
            last_reference_id(Some(specimens.as_slice()), SPECIMEN_PREFIX).as_deref(),
            Some("sp-2")
        );

        assert_eq!(last_reference_id(Some(&[][..]), SPECIMEN_PREFIX), None);
        assert_eq!(last_reference_id(Some(&[reference(None)][..]), SPECIMEN_PREFIX), None);
        assert_eq!(last_reference_id(None, SPECIMEN_PREFIX), None);
    }

    #[test]
    fn identity_splits_display_and_identifier() {
        let requester = Reference {
            reference: Some("Organization/1".to_string()),
            display: Some("Manchester University NHS FT".to_string()),
            identifier: Some(Identifier {
                system: Some("https://fhir.nhs.uk/Id/ods-organization-code".to_string()),
                value: Some("R0A".to_string()),
            }),
        };

        let (display, code) = reference_identity(Some(&requester));
        assert_eq!(display.as_deref(), Some("Manchester University NHS FT"));
        assert_eq!(code.as_deref(), Some("R0A"));

        assert_eq!(reference_identity(None), (None, None));
        assert_eq!(last_identity(Some(&[][..])), (None, None));
    }

    #[test]
    fn performer_identity_uses_last_entry() {
        let performers = vec![
            Reference {
                display: Some("First lab".to_string()),
                ..Reference::default()
            },
            Reference {
                display: Some("Second lab".to_string()),
                identifier: None,
                ..Reference::default()
            },
        ];

        let (display, code) = last_identity(Some(performers.as_slice()));
        assert_eq!(display.as_deref(), Some("Second lab"));
        assert_eq!(code, None);
    }

    #[test]
    fn timestamps_keep_offset() {
        let parsed = parse_timestamp(Some("2025-12-02T10:15:00+01:00")).unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), 3600);
        assert_eq!(parsed.naive_utc().hour(), 9);

        let fractional = parse_timestamp(Some("2025-12-02T10:15:00.123Z")).unwrap();
        assert_eq!(fractional.naive_utc().nanosecond(), 123_000_000);
    }

    #[test]
    fn partial_and_naive_timestamps_are_read_as_utc() {
        let date = parse_timestamp(Some("2025-11-30")).unwrap();
        assert_eq!(date.naive_utc().date(), NaiveDate::from_ymd_opt(2025, 11, 30).unwrap());
        assert_eq!(date.naive_utc().hour(), 0);

        let month = parse_timestamp(Some("2025-11")).unwrap();
        assert_eq!(month.day(), 1);

        let year = parse_timestamp(Some("2025")).unwrap();
        assert_eq!(year.ordinal(), 1);

        let naive = parse_timestamp(Some("2025-11-30T08:00:00")).unwrap();
        assert_eq!(naive.offset().local_minus_utc(), 0);
    }

    #[test]
    fn null_or_garbage_timestamps_yield_none() {
        assert_eq!(parse_timestamp(None), None);
        assert_eq!(parse_timestamp(Some("")), None);
        assert_eq!(parse_timestamp(Some("yesterday")), None);
    }

    #[test]
    fn report_normalization_flattens_lineage() {
        let report = DiagnosticReportResource {
            id: Some("dr-1".to_string()),
            code: Some(concept(vec![coding(None, "R208"), coding(None, "R210")])),
            issued: Some("2025-12-05T12:00:00Z".to_string()),
            based_on: Some(vec![reference(Some("ServiceRequest/sr-9"))]),
            specimen: Some(vec![reference(Some("Specimen/sp-4"))]),
            ..DiagnosticReportResource::default()
        };

        let row = normalize_report(&report);

        assert_eq!(row.id, "dr-1");
        assert_eq!(row.test_code, "R210");
        assert_eq!(row.order_id.as_deref(), Some("sr-9"));
        assert_eq!(row.specimen_id.as_deref(), Some("sp-4"));
        assert!(row.issued_date.is_some());
        assert!(row.last_updated_date.is_none());
        assert!(row.performer_display.is_none());
    }

    #[test]
    fn order_normalization_reads_indication_system() {
        let request = ServiceRequestResource {
            id: Some("sr-1".to_string()),
            authored_on: Some("2025-11-01T09:30:00Z".to_string()),
            reason_code: Some(vec![concept(vec![
                coding(Some("urn:test-directory"), "R210.2"),
                coding(Some("http://snomed.info/sct"), "1234"),
            ])]),
            ..ServiceRequestResource::default()
        };

        let filtered = normalize_order(&request, Some("urn:test-directory"));
        assert_eq!(filtered.reason_code, "R210.2");

        let unfiltered = normalize_order(&request, None);
        assert_eq!(unfiltered.reason_code, "1234");
        assert!(unfiltered.requester_code.is_none());
        assert!(unfiltered.order_date.is_some());
    }

    #[test]
    fn requester_list_uses_last_entry() {
        let request = ServiceRequestResource {
            id: Some("sr-2".to_string()),
            requester: Some(vec![
                Reference {
                    display: Some("Old Trust".to_string()),
                    ..Reference::default()
                },
                Reference {
                    display: Some("New Trust".to_string()),
                    identifier: Some(Identifier {
                        system: None,
                        value: Some("RW3".to_string()),
                    }),
                    ..Reference::default()
                },
            ]),
            ..ServiceRequestResource::default()
        };

        let order = normalize_order(&request, None);
        assert_eq!(order.requester_display.as_deref(), Some("New Trust"));
        assert_eq!(order.requester_code.as_deref(), Some("RW3"));
        assert_eq!(order.reason_code, "");
    }
}
