//! Translation between registry dialects and the canonical facility schema.
//!
//! # Design
//! Registries disagree on field names: DHIS2 sends `uuid`/`href` where
//! Resource Map and the reference schema use `id`/`url`. All translation
//! happens here, at the transport boundary, so `Facility` only ever sees
//! canonical names.
//!
//! Incoming records are normalized the same way for every backend, since
//! servers are not consistent even within one dialect. Outgoing records drop
//! the members the server owns (`id`, `url`, timestamps); the identifier is
//! already part of the request path, except that DHIS2 expects it in the
//! body as `uuid`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FredError;
use crate::types::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Dhis2,
    ResourceMap,
    #[default]
    Generic,
}

const SERVER_MANAGED: [&str; 3] = ["createdAt", "updatedAt", "url"];

impl Backend {
    /// Guess the dialect from an endpoint URL.
    pub fn detect(url: &str) -> Self {
        let url = url.to_ascii_lowercase();
        if url.contains("dhis2") {
            Backend::Dhis2
        } else if url.contains("resmap") || url.contains("resourcemap") {
            Backend::ResourceMap
        } else {
            Backend::Generic
        }
    }

    /// Server record to canonical names.
    pub fn incoming(&self, mut record: Record) -> Record {
        if let Some(uuid) = record.remove("uuid") {
            record.insert("id".to_string(), uuid);
        }
        if let Some(href) = record.remove("href") {
            record.insert("url".to_string(), href);
        }
        record
    }

    /// Canonical record to the body a create or update sends.
    pub fn outgoing(&self, mut record: Record) -> Record {
        for key in SERVER_MANAGED {
            record.remove(key);
        }
        let id = record.remove("id");
        if let (Backend::Dhis2, Some(id)) = (self, id) {
            record.insert("uuid".to_string(), id);
        }
        record
    }
}

impl FromStr for Backend {
    type Err = FredError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dhis2" => Ok(Backend::Dhis2),
            "resourcemap" | "resmap" | "resource-map" => Ok(Backend::ResourceMap),
            "generic" => Ok(Backend::Generic),
            other => Err(FredError::validation(
                "backend",
                &format!("unknown backend '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn detects_dialect_from_url() {
        assert_eq!(Backend::detect("http://apps.dhis2.org/dev/api-fred/v1"), Backend::Dhis2);
        assert_eq!(Backend::detect("http://resmap.instedd.org/api"), Backend::ResourceMap);
        assert_eq!(Backend::detect("http://localhost:3000"), Backend::Generic);
    }

    #[test]
    fn incoming_renames_uuid_and_href() {
        let rec = Backend::Dhis2.incoming(record(json!({
            "uuid": "ueuQlqb8ccl",
            "href": "http://x/facilities/ueuQlqb8ccl",
            "name": "Panderu MCHP"
        })));
        assert_eq!(
            serde_json::Value::Object(rec),
            json!({
                "id": "ueuQlqb8ccl",
                "url": "http://x/facilities/ueuQlqb8ccl",
                "name": "Panderu MCHP"
            })
        );
    }

    #[test]
    fn incoming_leaves_canonical_names_alone() {
        let input = json!({"id": "a", "url": "http://x/a"});
        let rec = Backend::Generic.incoming(record(input.clone()));
        assert_eq!(serde_json::Value::Object(rec), input);
    }

    #[test]
    fn outgoing_drops_server_managed_members() {
        let rec = Backend::ResourceMap.outgoing(record(json!({
            "id": "a",
            "url": "http://x/a",
            "name": "Foo",
            "createdAt": "2013-02-05T03:25:27Z",
            "updatedAt": "2013-02-05T03:25:27Z",
            "active": true
        })));
        assert_eq!(serde_json::Value::Object(rec), json!({"name": "Foo", "active": true}));
    }

    #[test]
    fn outgoing_dhis2_carries_uuid() {
        let rec = Backend::Dhis2.outgoing(record(json!({"id": "a", "name": "Foo"})));
        assert_eq!(serde_json::Value::Object(rec), json!({"uuid": "a", "name": "Foo"}));
    }

    #[test]
    fn parses_backend_names() {
        assert_eq!("DHIS2".parse::<Backend>().unwrap(), Backend::Dhis2);
        assert_eq!("resmap".parse::<Backend>().unwrap(), Backend::ResourceMap);
        assert!(matches!(
            "couchdb".parse::<Backend>(),
            Err(FredError::Validation { .. })
        ));
    }

    #[test]
    fn deserializes_from_config_names() {
        let backend: Backend = serde_json::from_str(r#""resourcemap""#).unwrap();
        assert_eq!(backend, Backend::ResourceMap);
    }
}
