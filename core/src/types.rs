//! Wire DTOs for the Facility Registry API.
//!
//! # Design
//! Facility bodies are kept as raw JSON objects (`Record`) until they reach
//! `Facility`, because registries attach backend-specific members that the
//! fixed schema does not know about. Only the identifier sub-record and the
//! list envelope get typed structs.

use serde::{Deserialize, Serialize};

/// A facility as it appears on the wire, after backend translation.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// One entry of a facility's `identifiers` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub id: String,
    #[serde(default)]
    pub agency: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

impl Identifier {
    pub fn new(id: &str, agency: &str, context: &str) -> Self {
        Self {
            id: id.to_string(),
            agency: Some(agency.to_string()),
            context: Some(context.to_string()),
        }
    }

    /// `None` filters match anything.
    pub fn matches(&self, agency: Option<&str>, context: Option<&str>) -> bool {
        agency.map_or(true, |a| self.agency.as_deref() == Some(a))
            && context.map_or(true, |c| self.context.as_deref() == Some(c))
    }
}

/// Body of `GET /facilities.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityList {
    pub facilities: Vec<Record>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_deserializes_without_optional_members() {
        let id: Identifier = serde_json::from_str(r#"{"id":"OU_222702"}"#).unwrap();
        assert_eq!(id.id, "OU_222702");
        assert!(id.agency.is_none());
    }

    #[test]
    fn identifier_matching_treats_none_as_wildcard() {
        let id = Identifier::new("OU_222702", "DHIS2", "DHIS2_CODE");
        assert!(id.matches(None, None));
        assert!(id.matches(Some("DHIS2"), None));
        assert!(id.matches(None, Some("DHIS2_CODE")));
        assert!(id.matches(Some("DHIS2"), Some("DHIS2_CODE")));
        assert!(!id.matches(Some("MOH"), None));
        assert!(!id.matches(Some("DHIS2"), Some("OTHER")));
    }

    #[test]
    fn facility_list_ignores_extra_envelope_members() {
        let list: FacilityList =
            serde_json::from_str(r#"{"facilities":[{"id":"a"}],"total":1}"#).unwrap();
        assert_eq!(list.facilities.len(), 1);
    }
}
