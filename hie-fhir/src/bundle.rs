//! Search-result bundles and the resources collected from them.

use serde::Deserialize;
use serde_json::Value;

use crate::resources::{
    DiagnosticReportResource, ServiceRequestResource, SpecimenResource, TypedResource,
};

/// One page of a FHIR search result.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Bundle {
    pub total: Option<u64>,
    pub entry: Option<Vec<BundleEntry>>,
    pub link: Option<Vec<BundleLink>>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct BundleEntry {
    pub resource: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct BundleLink {
    pub relation: Option<String>,
    pub url: Option<String>,
}

impl Bundle {
    pub fn entries(&self) -> &[BundleEntry] {
        self.entry.as_deref().unwrap_or_default()
    }

    /// URL of the following page. The last `next` link wins.
    pub fn next_link(&self) -> Option<&str> {
        self.link
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|link| link.relation.as_deref() == Some("next"))
            .filter_map(|link| link.url.as_deref())
            .last()
    }
}

/// Resource types the pipeline keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ServiceRequest,
    Specimen,
    DiagnosticReport,
}

impl ResourceKind {
    pub fn from_resource_type(resource_type: &str) -> Option<Self> {
        match resource_type {
            "ServiceRequest" => Some(Self::ServiceRequest),
            "Specimen" => Some(Self::Specimen),
            "DiagnosticReport" => Some(Self::DiagnosticReport),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceRequest => "ServiceRequest",
            Self::Specimen => "Specimen",
            Self::DiagnosticReport => "DiagnosticReport",
        }
    }
}

/// Everything gathered across the pages of one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedResources {
    pub service_requests: Vec<ServiceRequestResource>,
    pub specimens: Vec<SpecimenResource>,
    pub diagnostic_reports: Vec<DiagnosticReportResource>,
    /// Pages requested, including the terminating one.
    pub pages: usize,
    /// `total` reported by the first page, when the server sends it.
    pub reported_total: Option<u64>,
}

impl FetchedResources {
    /// Collect saved bundle pages without following their links.
    pub fn from_bundles(bundles: impl IntoIterator<Item = Bundle>) -> Self {
        let mut fetched = Self::default();
        for bundle in bundles {
            fetched.pages += 1;
            if fetched.reported_total.is_none() {
                fetched.reported_total = bundle.total;
            }
            fetched.absorb(bundle.entries());
        }
        fetched
    }

    /// Sort entries into the typed collections. Unknown kinds are skipped.
    pub fn absorb(&mut self, entries: &[BundleEntry]) {
        for entry in entries {
            let Some(resource) = entry.resource.as_ref() else {
                continue;
            };

            let kind = resource
                .get("resourceType")
                .and_then(Value::as_str)
                .and_then(ResourceKind::from_resource_type);

            match kind {
                Some(ResourceKind::ServiceRequest) => self
                    .service_requests
                    .push(ServiceRequestResource::parse(resource)),
                Some(ResourceKind::Specimen) => {
                    self.specimens.push(SpecimenResource::parse(resource))
                }
                Some(ResourceKind::DiagnosticReport) => self
                    .diagnostic_reports
                    .push(DiagnosticReportResource::parse(resource)),
                None => {}
            }
        }

        tracing::debug!(
            service_requests = self.service_requests.len(),
            specimens = self.specimens.len(),
            diagnostic_reports = self.diagnostic_reports.len(),
            "collected resources"
        );
    }

    pub fn is_empty(&self) -> bool {
        self.service_requests.is_empty()
            && self.specimens.is_empty()
            && self.diagnostic_reports.is_empty()
    }
}
