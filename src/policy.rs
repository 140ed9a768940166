//! Access policy carried by every container
//!
//! The policy is stored base64-encoded in the manifest and bound to each key
//! share by HMAC. It is validated before any custodian or cipher work.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("The given policy object requires the following properties: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Policy must be a JSON object")]
    NotAnObject,

    #[error("Policy serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl PolicyError {
    /// Returns a suggestion for how to fix this error, if available
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            PolicyError::MissingFields(_) => {
                Some("Build the policy with PolicyBuilder, which always sets uuid and body")
            }
            PolicyError::NotAnObject => Some("Pass a JSON object with uuid and body"),
            PolicyError::SerializationError(_) => None,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            PolicyError::MissingFields(_) => "TDF_E_POLICY_MISSING_FIELDS",
            PolicyError::NotAnObject => "TDF_E_POLICY_NOT_OBJECT",
            PolicyError::SerializationError(_) => "TDF_E_POLICY_SERIALIZATION",
        }
    }
}

/// A data attribute attached to the policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeObject {
    /// Attribute URL, e.g. `https://example.com/attr/Classification/value/S`
    pub attribute: String,
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "isDefault", default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
    #[serde(rename = "pubKey", default, skip_serializing_if = "Option::is_none")]
    pub pub_key: Option<String>,
    #[serde(rename = "kasUrl", default, skip_serializing_if = "Option::is_none")]
    pub kas_url: Option<String>,
}

impl AttributeObject {
    pub fn new(attribute: impl Into<String>) -> Self {
        AttributeObject {
            attribute: attribute.into(),
            display_name: None,
            is_default: None,
            pub_key: None,
            kas_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyBody {
    #[serde(rename = "dataAttributes", default)]
    pub data_attributes: Vec<AttributeObject>,
    /// Entities the data may be disseminated to
    pub dissem: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub uuid: String,
    pub body: PolicyBody,
}

impl Policy {
    /// Parse and validate a policy object
    ///
    /// Every missing required property is reported at once.
    pub fn from_value(value: Value) -> Result<Self, PolicyError> {
        let object = value.as_object().ok_or(PolicyError::NotAnObject)?;
        let mut missing = Vec::new();
        if !object.contains_key("uuid") {
            missing.push("uuid".to_string());
        }
        match object.get("body") {
            None => {
                missing.push("body".to_string());
                missing.push("body.dissem".to_string());
            }
            Some(body) if body.get("dissem").is_none() => missing.push("body.dissem".to_string()),
            Some(_) => {}
        }
        if !missing.is_empty() {
            return Err(PolicyError::MissingFields(missing));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string(self)?)
    }

    /// JSON of the identifier-only form kept once a custodian holds the policy
    pub fn reference_json(uuid: &str) -> String {
        serde_json::json!({ "uuid": uuid }).to_string()
    }
}

/// Builder for [`Policy`]
///
/// # Example
///
/// ```
/// use tdf3::policy::PolicyBuilder;
///
/// let policy = PolicyBuilder::new()
///     .id_auto()
///     .dissem("user@example.com")
///     .attribute("https://example.com/attr/Classification/value/S")
///     .build();
/// assert_eq!(policy.body.dissem, vec!["user@example.com"]);
/// ```
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    uuid: Option<String>,
    attributes: Vec<AttributeObject>,
    dissem: Vec<String>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn id(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Use a fresh UUID v4
    #[must_use]
    pub fn id_auto(mut self) -> Self {
        self.uuid = Some(uuid::Uuid::new_v4().to_string());
        self
    }

    #[must_use]
    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attributes.push(AttributeObject::new(attribute));
        self
    }

    #[must_use]
    pub fn attribute_object(mut self, attribute: AttributeObject) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn dissem(mut self, target: impl Into<String>) -> Self {
        self.dissem.push(target.into());
        self
    }

    #[must_use]
    pub fn dissemination(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dissem.extend(targets.into_iter().map(Into::into));
        self
    }

    /// Build the policy, generating a UUID if none was set
    pub fn build(self) -> Policy {
        Policy {
            uuid: self
                .uuid
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            body: PolicyBody {
                data_attributes: self.attributes,
                dissem: self.dissem,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_fields_reported_together() {
        let err = Policy::from_value(json!({})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The given policy object requires the following properties: uuid, body, body.dissem"
        );

        let err = Policy::from_value(json!({"uuid": "x", "body": {}})).unwrap_err();
        match err {
            PolicyError::MissingFields(fields) => assert_eq!(fields, vec!["body.dissem"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(
            Policy::from_value(json!("policy")),
            Err(PolicyError::NotAnObject)
        ));
    }

    #[test]
    fn test_wire_shape() {
        let policy = PolicyBuilder::new()
            .id("2c1d6ae4-6c39-4c6c-9d8a-1b1b1b1b1b1b")
            .dissemination(["a@example.com", "b@example.com"])
            .attribute("https://example.com/attr/A/value/1")
            .build();
        let value: Value = serde_json::from_str(&policy.to_json().unwrap()).unwrap();
        assert_eq!(value["body"]["dataAttributes"][0]["attribute"], "https://example.com/attr/A/value/1");
        assert!(value["body"]["dataAttributes"][0].get("kasUrl").is_none());
        assert_eq!(value["body"]["dissem"][1], "b@example.com");

        let parsed = Policy::from_json(&policy.to_json().unwrap()).unwrap();
        assert_eq!(parsed, policy);
    }

    #[test]
    fn test_builder_generates_uuid() {
        let policy = PolicyBuilder::new().build();
        assert!(uuid::Uuid::parse_str(&policy.uuid).is_ok());
        assert!(policy.body.dissem.is_empty());
    }

    #[test]
    fn test_reference_form() {
        assert_eq!(Policy::reference_json("abc"), r#"{"uuid":"abc"}"#);
    }
}
