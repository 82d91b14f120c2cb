//! The registry facade.
//!
//! `Registry` ties a `RegistryClient` to a `Transport`: every operation
//! builds a request, executes it, and hands the response back to the client
//! to parse. Facilities and queries borrow the registry they came from.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, trace, warn};

use crate::client::RegistryClient;
use crate::config::RegistryConfig;
use crate::error::FredError;
use crate::facility::Facility;
use crate::http::{HttpRequest, HttpResponse};
use crate::query::{Facilities, FacilityQuery, QueryRequest};
use crate::transport::Transport;
use crate::types::Record;
use crate::value::PropertyValue;

pub struct Registry {
    client: RegistryClient,
    transport: Box<dyn Transport>,
    extended_date_properties: Vec<String>,
}

impl Registry {
    pub fn new(config: &RegistryConfig, transport: impl Transport + 'static) -> Self {
        let mut client = RegistryClient::new(&config.base_url).with_backend(config.backend());
        if let Some(username) = &config.username {
            client = client.with_credentials(username, config.password.as_deref().unwrap_or(""));
        }
        Self {
            client,
            transport: Box::new(transport),
            extended_date_properties: config.extended_date_properties.clone(),
        }
    }

    /// A registry talking HTTP through `ureq`, honouring the configured
    /// timeout.
    #[cfg(feature = "ureq")]
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(config, crate::transport::UreqTransport::new(config.timeout()))
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// Extended property names whose values are dates.
    pub fn extended_date_properties(&self) -> &[String] {
        &self.extended_date_properties
    }

    /// Fetch one facility by id.
    pub fn get(&self, id: &str) -> Result<Facility<'_>, FredError> {
        let request = self.client.build_get_facility(id)?;
        let response = self.send(&request)?;
        let record = self.client.parse_get_facility(&request, response)?;
        Facility::hydrate(Some(self), record, &self.extended_date_properties, false)
    }

    /// A new, unsaved facility bound to this registry. Nothing is sent until
    /// it is saved.
    pub fn create<I, K, V>(&self, fields: I) -> Result<Facility<'_>, FredError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        Facility::create(self, fields, &self.extended_date_properties)
    }

    /// Create or update `facility` and return the record the server sent
    /// back. The facility itself is left untouched; `Facility::save` merges
    /// the result.
    pub fn save(&self, facility: &Facility<'_>) -> Result<Record, FredError> {
        facility.check_savable()?;
        trace!(
            id = facility.id().unwrap_or("<new>"),
            modified = facility.is_modified(),
            touched = facility.is_touched(),
            "saving facility"
        );

        let record = facility.to_record();
        match facility.id() {
            Some(id) => {
                let request = self.client.build_update_facility(id, &record)?;
                let response = self.send(&request)?;
                self.client.parse_update_facility(&request, response)
            }
            None => {
                let request = self.client.build_create_facility(&record)?;
                let response = self.send(&request)?;
                let created = self.client.parse_create_facility(&request, response)?;
                info!(
                    id = created.get("id").and_then(|v| v.as_str()).unwrap_or("<unknown>"),
                    "created facility"
                );
                Ok(created)
            }
        }
    }

    /// Delete `facility` on the server. Marking it deleted is left to
    /// `Facility::delete`.
    pub fn delete(&self, facility: &Facility<'_>) -> Result<(), FredError> {
        let id = facility.id().ok_or(FredError::UnsavedEntity)?;
        if facility.is_deleted() {
            return Err(FredError::EntityDeleted {
                id: Some(id.to_string()),
            });
        }
        let request = self.client.build_delete_facility(id)?;
        let response = self.send(&request)?;
        self.client.parse_delete_facility(&request, response)?;
        info!(id, "deleted facility");
        Ok(())
    }

    /// A query over every facility in the registry.
    pub fn facilities(&self) -> FacilityQuery<'_> {
        FacilityQuery::new(move |request: &QueryRequest| {
            let records = self.list(&request.params)?;
            Ok(Facilities::new(Some(self), records, request.is_partial()))
        })
    }

    /// Raw facility records matching `params`, already in canonical field
    /// names.
    pub fn list(&self, params: &BTreeMap<String, String>) -> Result<Vec<Record>, FredError> {
        let request = self.client.build_list_facilities(params);
        let response = self.send(&request)?;
        self.client.parse_list_facilities(&request, response)
    }

    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, FredError> {
        debug!(method = %request.method, url = %request.url(), "registry request");
        let response = self.transport.execute(request).map_err(|e| {
            warn!(method = %request.method, url = %request.url(), error = %e, "registry request failed");
            e
        })?;
        if !response.is_success() {
            warn!(
                method = %request.method,
                url = %request.url(),
                status = response.status,
                "registry returned an error status"
            );
        }
        Ok(response)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("client", &self.client)
            .field("extended_date_properties", &self.extended_date_properties)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use serde_json::json;

    use crate::backend::Backend;
    use crate::error::TransportError;
    use crate::http::HttpMethod;

    /// Replays canned responses and records every request it sees.
    #[derive(Clone, Default)]
    struct Scripted {
        responses: Rc<RefCell<VecDeque<HttpResponse>>>,
        requests: Rc<RefCell<Vec<HttpRequest>>>,
    }

    impl Scripted {
        fn respond(&self, status: u16, body: serde_json::Value) -> &Self {
            self.respond_with(status, Vec::new(), body)
        }

        fn respond_with(
            &self,
            status: u16,
            headers: Vec<(&str, &str)>,
            body: serde_json::Value,
        ) -> &Self {
            let body = if body.is_null() {
                String::new()
            } else {
                body.to_string()
            };
            self.responses.borrow_mut().push_back(HttpResponse {
                status,
                headers: headers
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body,
            });
            self
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.borrow().clone()
        }
    }

    impl Transport for Scripted {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.borrow_mut().push(request.clone());
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| TransportError::Connection {
                    method: request.method,
                    url: request.url(),
                    reason: "no scripted response left".to_string(),
                })
        }
    }

    fn registry(transport: &Scripted) -> Registry {
        let config = RegistryConfig::new("http://localhost:3000/api-fred/v1")
            .with_credentials("system", "System123")
            .with_extended_date_properties(["openedAt"]);
        Registry::new(&config, transport.clone())
    }

    fn body(request: &HttpRequest) -> serde_json::Value {
        serde_json::from_str(request.body.as_deref().unwrap_or("null")).unwrap()
    }

    fn stored() -> serde_json::Value {
        json!({
            "id": "4XLPtsGJwQb",
            "name": "Foo",
            "active": true,
            "coordinates": [1.0, 2.0],
            "identifiers": [],
            "createdAt": "2013-02-05T03:25:27.123+0000",
            "updatedAt": "2013-02-05T03:25:27.123+0000",
            "properties": {"openedAt": "2001-05-01"}
        })
    }

    #[test]
    fn save_new_facility_populates_server_fields() {
        let transport = Scripted::default();
        transport.respond_with(
            201,
            vec![("Location", "http://localhost:3000/api-fred/v1/facilities/4XLPtsGJwQb.json")],
            stored(),
        );
        let registry = registry(&transport);

        let mut facility = registry
            .create([
                ("name", PropertyValue::from("Foo")),
                ("coordinates", PropertyValue::from([1.0, 2.0])),
            ])
            .unwrap();
        assert!(facility.is_new());
        assert!(facility.is_modified());

        facility.save().unwrap();
        assert!(!facility.is_new());
        assert!(!facility.is_modified());
        assert!(!facility.is_touched());
        assert_eq!(facility.id(), Some("4XLPtsGJwQb"));
        assert!(facility.created_at().is_some());
        assert!(facility.updated_at().is_some());
        assert_eq!(
            facility.url(),
            Some("http://localhost:3000/api-fred/v1/facilities/4XLPtsGJwQb.json")
        );
        assert!(facility
            .properties()
            .get("openedAt")
            .and_then(PropertyValue::as_datetime)
            .is_some());

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].url(), "http://localhost:3000/api-fred/v1/facilities.json");
        assert_eq!(
            requests[0].header("authorization"),
            Some("Basic c3lzdGVtOlN5c3RlbTEyMw==")
        );
        let sent = body(&requests[0]);
        assert_eq!(sent["name"], "Foo");
        assert_eq!(sent["active"], true);
        assert!(sent.get("id").is_none());
        assert!(sent.get("createdAt").is_none());
    }

    #[test]
    fn save_existing_facility_updates_it() {
        let transport = Scripted::default();
        let mut updated = stored();
        updated["name"] = json!("Bar");
        updated["updatedAt"] = json!("2013-03-01T10:00:00.000+0000");
        transport.respond(200, stored()).respond(200, updated);
        let registry = registry(&transport);

        let mut facility = registry.get("4XLPtsGJwQb").unwrap();
        assert!(!facility.is_modified());
        facility.set("name", "Bar").unwrap();
        assert!(facility.is_modified());
        facility.save().unwrap();

        assert_eq!(facility.name(), Some("Bar"));
        assert!(!facility.is_modified());
        let requests = transport.requests();
        assert_eq!(requests[1].method, HttpMethod::Put);
        assert_eq!(
            requests[1].url(),
            "http://localhost:3000/api-fred/v1/facilities/4XLPtsGJwQb.json"
        );
        assert_eq!(body(&requests[1])["name"], "Bar");
    }

    #[test]
    fn save_rejects_null_coordinates_before_any_request() {
        let transport = Scripted::default();
        let registry = registry(&transport);
        let mut facility = registry
            .create([("name", PropertyValue::from("Foo")), ("coordinates", PropertyValue::Null)])
            .unwrap();

        let err = facility.save().unwrap_err();
        assert!(matches!(err, FredError::Validation { ref field, .. } if field == "coordinates"));
        assert!(matches!(registry.save(&facility), Err(FredError::Validation { .. })));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn deleted_facility_rejects_everything() {
        let transport = Scripted::default();
        transport.respond(200, stored()).respond(204, json!(null));
        let registry = registry(&transport);

        let mut facility = registry.get("4XLPtsGJwQb").unwrap();
        facility.delete().unwrap();
        assert!(facility.is_deleted());
        assert_eq!(facility.id(), Some("4XLPtsGJwQb"));
        assert_eq!(facility.name(), Some("Foo"));

        assert!(matches!(facility.set("name", "x"), Err(FredError::EntityDeleted { .. })));
        assert!(matches!(facility.delete(), Err(FredError::EntityDeleted { .. })));
        assert!(matches!(facility.save(), Err(FredError::EntityDeleted { .. })));
        assert!(matches!(registry.delete(&facility), Err(FredError::EntityDeleted { .. })));

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].method, HttpMethod::Delete);
    }

    #[test]
    fn unsaved_facility_cannot_be_deleted() {
        let transport = Scripted::default();
        let registry = registry(&transport);
        let mut facility = registry.create([("name", "Foo")]).unwrap();
        assert!(matches!(facility.delete(), Err(FredError::UnsavedEntity)));
        assert!(matches!(registry.delete(&facility), Err(FredError::UnsavedEntity)));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn get_maps_missing_facility_to_not_found() {
        let transport = Scripted::default();
        transport.respond(404, json!({"code": 404, "message": "Facility not found"}));
        let registry = registry(&transport);

        let err = registry.get("missing").unwrap_err();
        assert!(err.is_not_found());
        match err {
            FredError::Transport(TransportError::NotFound(ctx)) => {
                assert_eq!(ctx.method, HttpMethod::Get);
                assert!(ctx.url.ends_with("/facilities/missing.json"));
                assert_eq!(ctx.error_info.unwrap()["message"], "Facility not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejected_credentials_surface_as_auth_errors() {
        let transport = Scripted::default();
        transport.respond(401, json!({"message": "Unauthorized"}));
        let registry = registry(&transport);
        match registry.list(&BTreeMap::new()) {
            Err(FredError::Transport(e)) => assert!(e.is_auth_error()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn query_sends_filters_and_selection() {
        let transport = Scripted::default();
        transport.respond(200, json!({"facilities": [{"name": "Foo"}, {"name": "Bar"}]}));
        let registry = registry(&transport);

        let mut query = registry.facilities();
        let facilities: Vec<Facility<'_>> = query
            .filter([("active", false)])
            .select(["name"])
            .all()
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(facilities.len(), 2);
        assert!(facilities.iter().all(|f| f.is_partial()));
        assert_eq!(facilities[1].name(), Some("Bar"));

        let requests = transport.requests();
        assert_eq!(requests[0].method, HttpMethod::Get);
        let query: BTreeMap<String, String> = requests[0].query.iter().cloned().collect();
        assert_eq!(query["allProperties"], "false");
        assert_eq!(query["fields"], "name");
        assert_eq!(query["active"], "false");
    }

    #[test]
    fn partial_query_results_cannot_be_saved() {
        let transport = Scripted::default();
        transport.respond(200, json!({"facilities": [stored()]}));
        let registry = registry(&transport);

        let mut query = registry.facilities();
        query.select(["name", "coordinates"]);
        let mut facility = query.into_iter().next().unwrap().unwrap();
        assert!(matches!(facility.save(), Err(FredError::PartialEntityNotSavable)));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn dhis2_records_are_renamed_both_ways() {
        let transport = Scripted::default();
        transport
            .respond(
                200,
                json!({"uuid": "abc", "href": "http://dhis/facilities/abc", "name": "Foo",
                       "active": true, "coordinates": [1.0, 2.0]}),
            )
            .respond(200, json!({"uuid": "abc", "name": "Bar", "active": true, "coordinates": [1.0, 2.0]}));
        let config = RegistryConfig::new("http://apps.dhis2.org/dev/api-fred/v1");
        assert_eq!(config.backend(), Backend::Dhis2);
        let registry = Registry::new(&config, transport.clone());

        let mut facility = registry.get("abc").unwrap();
        assert_eq!(facility.id(), Some("abc"));
        assert_eq!(facility.url(), Some("http://dhis/facilities/abc"));

        facility.set("name", "Bar").unwrap();
        facility.save().unwrap();
        let sent = body(&transport.requests()[1]);
        assert_eq!(sent["uuid"], "abc");
        assert!(sent.get("id").is_none());
        assert!(sent.get("url").is_none());
        assert!(sent.get("href").is_none());
    }

    #[test]
    fn connection_failures_propagate() {
        let transport = Scripted::default();
        let registry = registry(&transport);
        assert!(matches!(
            registry.get("abc"),
            Err(FredError::Transport(TransportError::Connection { .. }))
        ));
    }
}
