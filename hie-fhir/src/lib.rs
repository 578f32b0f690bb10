//! FHIR search results to `DashboardSnapshot`: paging, typed parsing and
//! normalization of ServiceRequest, Specimen and DiagnosticReport resources.

use hie_core::{DashboardConfig, DashboardSnapshot, HieError, NormalizedBatch};

pub mod bundle;
pub mod fetch;
pub mod normalize;
pub mod pipeline;
pub mod resources;

pub use bundle::{Bundle, FetchedResources, ResourceKind};
pub use fetch::{fetch_all, BundleSource, FhirQuery, FhirSettings, HttpBundleSource};
pub use normalize::normalize_batch;
pub use pipeline::{RefreshFailure, RefreshPipeline, RefreshStatus};

/// Parse one bundle page from JSON text.
pub fn parse_bundle_str(bundle_json: &str) -> Result<Bundle, HieError> {
    serde_json::from_str(bundle_json).map_err(|err| HieError::Parse(err.to_string()))
}

/// Normalize saved bundle pages without following their links.
pub fn normalize_bundle_strs<I, T>(pages: I, config: &DashboardConfig) -> Result<NormalizedBatch, HieError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let bundles = pages
        .into_iter()
        .map(|page| parse_bundle_str(page.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let fetched = FetchedResources::from_bundles(bundles);
    Ok(normalize_batch(&fetched, config))
}

/// Build a snapshot from saved bundle pages.
pub fn snapshot_from_bundle_strs<I, T>(
    pages: I,
    config: &DashboardConfig,
) -> Result<DashboardSnapshot, HieError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let batch = normalize_bundle_strs(pages, config)?;
    Ok(DashboardSnapshot::build(&batch, config))
}
