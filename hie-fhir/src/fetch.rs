//! Link-following retrieval of search results.

use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use hie_core::HieError;
use reqwest::header::ACCEPT;

use crate::bundle::{Bundle, FetchedResources};

pub const ENV_SERVER: &str = "FHIR_SERVER";
pub const ENV_USERNAME: &str = "FHIR_USERNAME";
pub const ENV_PASSWORD: &str = "FHIR_PASSWORD";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Connection settings for the FHIR server.
#[derive(Clone, PartialEq)]
pub struct FhirSettings {
    /// Base URL, e.g. `https://fhir.example/r4/`.
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

impl FhirSettings {
    /// Read `FHIR_SERVER`, `FHIR_USERNAME` and `FHIR_PASSWORD` from the process environment.
    pub fn from_env() -> Result<Self, HieError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HieError> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let server = non_empty(ENV_SERVER)
            .ok_or_else(|| HieError::Config(format!("{ENV_SERVER} is not set")))?;

        Ok(Self {
            server,
            username: non_empty(ENV_USERNAME),
            password: non_empty(ENV_PASSWORD),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        })
    }

    /// Basic-auth pair, present when either credential is configured.
    /// A missing username is sent as empty.
    pub fn credentials(&self) -> Option<(String, Option<String>)> {
        if self.username.is_none() && self.password.is_none() {
            return None;
        }
        Some((
            self.username.clone().unwrap_or_default(),
            self.password.clone(),
        ))
    }

    /// Base URL with exactly one trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}/", self.server.trim_end_matches('/'))
    }
}

impl fmt::Debug for FhirSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FhirSettings")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// The search that seeds a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FhirQuery {
    pub resource_type: String,
    pub includes: Vec<String>,
    /// Only resources updated strictly after this day (`_lastUpdated=gt`).
    pub last_updated_after: Option<NaiveDate>,
}

impl Default for FhirQuery {
    fn default() -> Self {
        Self {
            resource_type: "DiagnosticReport".to_string(),
            includes: vec![
                "DiagnosticReport:based-on".to_string(),
                "DiagnosticReport:specimen".to_string(),
            ],
            last_updated_after: NaiveDate::from_ymd_opt(2025, 12, 1),
        }
    }
}

impl FhirQuery {
    /// First page URL against `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        let mut params: Vec<String> = self
            .includes
            .iter()
            .map(|include| format!("_include={include}"))
            .collect();
        if let Some(after) = self.last_updated_after {
            params.push(format!("_lastUpdated=gt{}", after.format("%Y-%m-%d")));
        }

        let base = base_url.trim_end_matches('/');
        if params.is_empty() {
            format!("{base}/{}", self.resource_type)
        } else {
            format!("{base}/{}?{}", self.resource_type, params.join("&"))
        }
    }
}

/// Anything that can return a bundle page for a URL.
pub trait BundleSource {
    fn fetch_page(&self, url: &str) -> Result<Bundle, HieError>;
}

/// Blocking HTTP source with optional basic authentication.
pub struct HttpBundleSource {
    client: reqwest::blocking::Client,
    credentials: Option<(String, Option<String>)>,
}

impl HttpBundleSource {
    pub fn new(settings: &FhirSettings) -> Result<Self, HieError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| HieError::Transport(format!("cannot build HTTP client: {err}")))?;

        Ok(Self {
            client,
            credentials: settings.credentials(),
        })
    }
}

impl BundleSource for HttpBundleSource {
    fn fetch_page(&self, url: &str) -> Result<Bundle, HieError> {
        let mut request = self.client.get(url).header(ACCEPT, "application/fhir+json");
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, password.as_deref());
        }

        let response = request.send().map_err(|err| {
            if err.is_timeout() {
                HieError::Transport(format!("request to {url} timed out"))
            } else {
                HieError::Transport(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HieError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .json::<Bundle>()
            .map_err(|err| HieError::Parse(format!("{url}: {err}")))
    }
}

/// Follow `next` links from `start_url` until the server stops paging.
///
/// Stops on the first page with no entries or the first page without a
/// `next` link. There is no page limit and no retry; the first failure is
/// returned as is.
pub fn fetch_all<S: BundleSource + ?Sized>(
    source: &S,
    start_url: &str,
) -> Result<FetchedResources, HieError> {
    let mut fetched = FetchedResources::default();
    let mut url = start_url.to_string();

    loop {
        let bundle = source.fetch_page(&url)?;
        fetched.pages += 1;
        if fetched.reported_total.is_none() {
            fetched.reported_total = bundle.total;
        }

        let entries = bundle.entries();
        tracing::info!(
            page = fetched.pages,
            entries = entries.len(),
            total = ?bundle.total,
            "fetched bundle page"
        );
        if entries.is_empty() {
            break;
        }
        fetched.absorb(entries);

        match bundle.next_link() {
            Some(next) => url = next.to_string(),
            None => break,
        }
    }

    Ok(fetched)
}


#[cfg(test)]
mod tests {
    use super::mock::ScriptedSource;
    use super::*;
    use serde_json::json;

    fn report(id: &str) -> serde_json::Value {
        json!({ "resource": { "resourceType": "DiagnosticReport", "id": id } })
    }

    #[test]
    fn follows_next_links_until_empty_page() {
        let source = ScriptedSource::new(vec![
            Some(json!({
                "resourceType": "Bundle",
                "total": 3,
                "entry": [report("dr-1"), report("dr-2"),
                    { "resource": { "resourceType": "Specimen", "id": "sp-1" } }],
                "link": [{ "relation": "next", "url": "https://fhir.example/page2" }]
            })),
            Some(json!({
                "resourceType": "Bundle",
                "entry": [report("dr-3"),
                    { "resource": { "resourceType": "ServiceRequest", "id": "sr-1" } }],
                "link": [{ "relation": "next", "url": "https://fhir.example/page3" }]
            })),
            Some(json!({ "resourceType": "Bundle", "entry": [], "link": [] })),
            Some(json!({
                "resourceType": "Bundle",
                "entry": [report("dr-never")]
            })),
        ]);

        let fetched = fetch_all(&source, "https://fhir.example/start").unwrap();

        assert_eq!(
            *source.requests.borrow(),
            vec![
                "https://fhir.example/start",
                "https://fhir.example/page2",
                "https://fhir.example/page3",
            ]
        );
        assert_eq!(fetched.pages, 3);
        assert_eq!(fetched.reported_total, Some(3));
        assert_eq!(fetched.diagnostic_reports.len(), 3);
        assert_eq!(fetched.specimens.len(), 1);
        assert_eq!(fetched.service_requests.len(), 1);
    }

    #[test]
    fn stops_when_page_has_no_next_link() {
        let source = ScriptedSource::new(vec![Some(json!({
            "resourceType": "Bundle",
            "entry": [report("dr-1")],
            "link": [{ "relation": "self", "url": "https://fhir.example/start" }]
        }))]);

        let fetched = fetch_all(&source, "https://fhir.example/start").unwrap();

        assert_eq!(source.requests.borrow().len(), 1);
        assert_eq!(fetched.diagnostic_reports.len(), 1);
    }

    #[test]
    fn empty_first_page_yields_nothing() {
        let source = ScriptedSource::new(vec![Some(json!({
            "resourceType": "Bundle",
            "total": 0,
            "link": [{ "relation": "next", "url": "https://fhir.example/ignored" }]
        }))]);

        let fetched = fetch_all(&source, "https://fhir.example/start").unwrap();

        assert_eq!(source.requests.borrow().len(), 1);
        assert!(fetched.is_empty());
    }

    #[test]
    fn transport_failure_mid_fetch_propagates() {
        let source = ScriptedSource::new(vec![
            Some(json!({
                "entry": [report("dr-1")],
                "link": [{ "relation": "next", "url": "https://fhir.example/page2" }]
            })),
            None,
        ]);

        let err = fetch_all(&source, "https://fhir.example/start").unwrap_err();

        assert!(matches!(err, HieError::Transport(_)));
        assert_eq!(source.requests.borrow().len(), 2);
    }

    #[test]
    fn malformed_bundle_is_a_parse_failure() {
        let source = ScriptedSource::new(vec![Some(json!({ "entry": "oops" }))]);

        let err = fetch_all(&source, "https://fhir.example/start").unwrap_err();

        assert!(matches!(err, HieError::Parse(_)));
    }

    #[test]
    fn default_query_matches_report_search() {
        let url = FhirQuery::default().url("https://fhir.example/r4/");
        assert_eq!(
            url,
            "https://fhir.example/r4/DiagnosticReport?_include=DiagnosticReport:based-on\
             &_include=DiagnosticReport:specimen&_lastUpdated=gt2025-12-01"
        );
    }

    #[test]
    fn query_without_parameters_has_no_question_mark() {
        let query = FhirQuery {
            resource_type: "Specimen".to_string(),
            includes: Vec::new(),
            last_updated_after: None,
        };
        assert_eq!(query.url("https://fhir.example"), "https://fhir.example/Specimen");
    }

    #[test]
    fn settings_require_server() {
        let err = FhirSettings::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, HieError::Config(_)));
    }

    #[test]
    fn settings_read_credentials_and_redact_password() {
        let settings = FhirSettings::from_lookup(|name| match name {
            ENV_SERVER => Some("https://fhir.example/r4".to_string()),
            ENV_USERNAME => Some("monitor".to_string()),
            ENV_PASSWORD => Some("s3cret".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(settings.base_url(), "https://fhir.example/r4/");
        assert_eq!(settings.username.as_deref(), Some("monitor"));
        assert_eq!(
            settings.credentials(),
            Some(("monitor".to_string(), Some("s3cret".to_string())))
        );
        assert!(!format!("{settings:?}").contains("s3cret"));
    }

    #[test]
    fn blank_credentials_are_treated_as_absent() {
        let settings = FhirSettings::from_lookup(|name| match name {
            ENV_SERVER => Some("https://fhir.example/r4/".to_string()),
            ENV_USERNAME => Some("  ".to_string()),
            _ => None,
        })
        .unwrap();

        assert!(settings.username.is_none());
        assert!(settings.password.is_none());
        assert!(settings.credentials().is_none());
    }

    #[test]
    fn password_without_username_is_still_sent() {
        let settings = FhirSettings::from_lookup(|name| match name {
            ENV_SERVER => Some("https://fhir.example/r4".to_string()),
            ENV_PASSWORD => Some("s3cret".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(
            settings.credentials(),
            Some((String::new(), Some("s3cret".to_string())))
        );
    }
}
