//! Stateless HTTP request builder and response parser for the registry API.
//!
//! # Design
//! `RegistryClient` holds the endpoint, optional credentials and the backend
//! dialect, and carries no mutable state between calls. Each REST operation
//! is split into a `build_*` method that produces an `HttpRequest` and a
//! `parse_*` method that consumes the matching `HttpResponse`. Parsing takes
//! the request too, so failures can report what was asked for. The caller
//! (normally `Registry` through a `Transport`) executes the round trip.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::backend::Backend;
use crate::error::{FredError, ResponseContext, TransportError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{FacilityList, Record};

#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    authorization: Option<String>,
    backend: Backend,
}

impl RegistryClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization: None,
            backend: Backend::Generic,
        }
    }

    /// Send HTTP Basic credentials with every request.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        let token = BASE64.encode(format!("{username}:{password}"));
        self.authorization = Some(format!("Basic {token}"));
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn build_list_facilities(&self, params: &BTreeMap<String, String>) -> HttpRequest {
        let mut req = self.request(HttpMethod::Get, "/facilities.json".to_string(), None);
        req.query = params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        req
    }

    pub fn build_get_facility(&self, id: &str) -> Result<HttpRequest, FredError> {
        let path = facility_path(id)?;
        Ok(self.request(HttpMethod::Get, path, None))
    }

    pub fn build_create_facility(&self, record: &Record) -> Result<HttpRequest, FredError> {
        let body = self.encode(record)?;
        Ok(self.request(HttpMethod::Post, "/facilities.json".to_string(), Some(body)))
    }

    pub fn build_update_facility(&self, id: &str, record: &Record) -> Result<HttpRequest, FredError> {
        let path = facility_path(id)?;
        let mut record = record.clone();
        record.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        let body = self.encode(&record)?;
        Ok(self.request(HttpMethod::Put, path, Some(body)))
    }

    pub fn build_delete_facility(&self, id: &str) -> Result<HttpRequest, FredError> {
        let path = facility_path(id)?;
        Ok(self.request(HttpMethod::Delete, path, None))
    }

    pub fn parse_list_facilities(
        &self,
        request: &HttpRequest,
        response: HttpResponse,
    ) -> Result<Vec<Record>, FredError> {
        check_status(request, &response)?;
        let list: FacilityList = decode(&response.body)?;
        Ok(list
            .facilities
            .into_iter()
            .map(|r| self.backend.incoming(r))
            .collect())
    }

    pub fn parse_get_facility(
        &self,
        request: &HttpRequest,
        response: HttpResponse,
    ) -> Result<Record, FredError> {
        check_status(request, &response)?;
        Ok(self.backend.incoming(decode(&response.body)?))
    }

    /// Registries that omit `url` from the body report it in `Location`.
    pub fn parse_create_facility(
        &self,
        request: &HttpRequest,
        response: HttpResponse,
    ) -> Result<Record, FredError> {
        check_status(request, &response)?;
        let mut record = self.backend.incoming(decode(&response.body)?);
        if !record.contains_key("url") {
            if let Some(location) = response.header("location") {
                record.insert(
                    "url".to_string(),
                    serde_json::Value::String(location.to_string()),
                );
            }
        }
        Ok(record)
    }

    pub fn parse_update_facility(
        &self,
        request: &HttpRequest,
        response: HttpResponse,
    ) -> Result<Record, FredError> {
        check_status(request, &response)?;
        Ok(self.backend.incoming(decode(&response.body)?))
    }

    pub fn parse_delete_facility(
        &self,
        request: &HttpRequest,
        response: HttpResponse,
    ) -> Result<(), FredError> {
        check_status(request, &response)?;
        Ok(())
    }

    fn request(&self, method: HttpMethod, path: String, body: Option<String>) -> HttpRequest {
        let mut headers = Vec::new();
        if body.is_some() {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        if let Some(auth) = &self.authorization {
            headers.push(("authorization".to_string(), auth.clone()));
        }
        HttpRequest {
            method,
            path: format!("{}{path}", self.base_url),
            query: Vec::new(),
            headers,
            body,
        }
    }

    fn encode(&self, record: &Record) -> Result<String, FredError> {
        let outgoing = self.backend.outgoing(record.clone());
        serde_json::to_string(&outgoing).map_err(|e| FredError::Serialization(e.to_string()))
    }
}

fn facility_path(id: &str) -> Result<String, FredError> {
    if id.trim().is_empty() {
        return Err(FredError::validation("id", "facility id must not be empty"));
    }
    Ok(format!("/facilities/{}.json", urlencoding::encode(id)))
}

fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, FredError> {
    serde_json::from_str(body).map_err(|e| FredError::Deserialization(e.to_string()))
}

/// Map non-success status codes to the appropriate `TransportError` variant.
pub fn check_status(request: &HttpRequest, response: &HttpResponse) -> Result<(), TransportError> {
    if response.is_success() {
        return Ok(());
    }
    let context = ResponseContext {
        method: request.method,
        url: request.url(),
        status: response.status,
        body: response.body.clone(),
        error_info: serde_json::from_str(&response.body).ok(),
    };
    Err(match response.status {
        401 | 403 => TransportError::Unauthorized(context),
        404 => TransportError::NotFound(context),
        _ => TransportError::Status(context),
    })
}
