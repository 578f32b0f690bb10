//! Typed views of the FHIR resources the dashboard reads.
//!
//! Only the fields used downstream are modelled. Each field is read on its
//! own: a value of the wrong shape blanks that field and nothing else.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::bundle::ResourceKind;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Coding {
    #[serde(default, deserialize_with = "lenient")]
    pub system: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct CodeableConcept {
    #[serde(default, deserialize_with = "one_or_many")]
    pub coding: Option<Vec<Coding>>,
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
}

impl CodeableConcept {
    pub fn codings(&self) -> &[Coding] {
        self.coding.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Identifier {
    #[serde(default, deserialize_with = "lenient")]
    pub system: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Reference {
    #[serde(default, deserialize_with = "lenient")]
    pub reference: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub display: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub identifier: Option<Identifier>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default, deserialize_with = "lenient")]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequestResource {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    /// One reference or a list of them.
    #[serde(default, deserialize_with = "one_or_many")]
    pub requester: Option<Vec<Reference>>,
    #[serde(default, deserialize_with = "lenient")]
    pub authored_on: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub reason_code: Option<Vec<CodeableConcept>>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpecimenResource {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub received_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReportResource {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub meta: Option<Meta>,
    #[serde(default, deserialize_with = "lenient")]
    pub code: Option<CodeableConcept>,
    /// One reference or a list of them.
    #[serde(default, deserialize_with = "one_or_many")]
    pub performer: Option<Vec<Reference>>,
    #[serde(default, deserialize_with = "lenient")]
    pub issued: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub effective_date_time: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub based_on: Option<Vec<Reference>>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub specimen: Option<Vec<Reference>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

/// Read a field, or `None` when it is null or of the wrong shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => {
            tracing::debug!(error = %err, "ignoring malformed field");
            Ok(None)
        }
    }
}

/// Read a field sent either as a single item or as a list.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(lenient::<D, OneOrMany<T>>(deserializer)?.map(|items| match items {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    }))
}

/// A resource type that can be parsed out of a bundle entry.
pub trait TypedResource: DeserializeOwned + Default {
    const KIND: ResourceKind;

    fn id(&self) -> Option<&str>;

    fn with_id(id: Option<String>) -> Self;

    /// Parse one resource on its own.
    ///
    /// Field-level problems are absorbed by the field readers. Only a
    /// resource that is not an object at all falls back to its `id`.
    fn parse(resource: &Value) -> Self {
        match Self::deserialize(resource) {
            Ok(parsed) => parsed,
            Err(err) => {
                let id = resource
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                tracing::warn!(
                    kind = Self::KIND.as_str(),
                    id = id.as_deref().unwrap_or("<none>"),
                    error = %err,
                    "malformed resource, keeping id only"
                );
                Self::with_id(id)
            }
        }
    }

    /// Resource id, or `<Kind>-unknown` when the server sent none.
    fn resource_id(&self) -> String {
        self.id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-unknown", Self::KIND.as_str()))
    }
}

impl TypedResource for ServiceRequestResource {
    const KIND: ResourceKind = ResourceKind::ServiceRequest;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn with_id(id: Option<String>) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

impl TypedResource for SpecimenResource {
    const KIND: ResourceKind = ResourceKind::Specimen;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn with_id(id: Option<String>) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

impl TypedResource for DiagnosticReportResource {
    const KIND: ResourceKind = ResourceKind::DiagnosticReport;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn with_id(id: Option<String>) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}
