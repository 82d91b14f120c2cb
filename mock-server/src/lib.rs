//! An in-memory Facility Registry speaking the FRED JSON API.
//!
//! Records are stored with canonical field names (`id`, no `url`) and
//! rendered in the configured dialect on the way out, so the same store can
//! pose as a generic registry or as DHIS2 (`uuid`, `href`).

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type Record = Map<String, Value>;

pub type Db = Arc<RwLock<Vec<Record>>>;

/// Query parameters that are not field filters.
const RESERVED_PARAMS: [&str; 7] = [
    "fields",
    "allProperties",
    "sortAsc",
    "sortDesc",
    "offset",
    "limit",
    "updatedSince",
];

/// Fields clients may send but only the server assigns.
const MANAGED_FIELDS: [&str; 6] = ["id", "uuid", "url", "href", "createdAt", "updatedAt"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Generic,
    Dhis2,
}

impl Dialect {
    fn id_field(self) -> &'static str {
        match self {
            Dialect::Generic => "id",
            Dialect::Dhis2 => "uuid",
        }
    }

    fn url_field(self) -> &'static str {
        match self {
            Dialect::Generic => "url",
            Dialect::Dhis2 => "href",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MockConfig {
    pub dialect: Dialect,
    /// Basic-auth credentials every request must carry, when set.
    pub credentials: Option<(String, String)>,
}

impl MockConfig {
    /// Read `MOCK_DIALECT` (`generic` or `dhis2`), `MOCK_USERNAME` and
    /// `MOCK_PASSWORD`.
    pub fn from_env() -> Self {
        let dialect = match std::env::var("MOCK_DIALECT").as_deref() {
            Ok("dhis2") => Dialect::Dhis2,
            _ => Dialect::Generic,
        };
        let credentials = std::env::var("MOCK_USERNAME")
            .ok()
            .map(|user| (user, std::env::var("MOCK_PASSWORD").unwrap_or_default()));
        Self {
            dialect,
            credentials,
        }
    }
}

#[derive(Clone)]
struct AppState {
    db: Db,
    config: Arc<MockConfig>,
}

pub fn app() -> Router {
    app_with(MockConfig::default())
}

pub fn app_with(config: MockConfig) -> Router {
    let state = AppState {
        db: Arc::new(RwLock::new(Vec::new())),
        config: Arc::new(config),
    };
    Router::new()
        .route("/facilities.json", get(list_facilities).post(create_facility))
        .route(
            "/facilities/{file}",
            get(get_facility).put(update_facility).delete(delete_facility),
        )
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, MockConfig::default()).await
}

pub async fn run_with(listener: TcpListener, config: MockConfig) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(config)).await
}

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("facility {id} not found"))
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({"code": self.status.as_u16(), "message": self.message});
        (self.status, Json(body)).into_response()
    }
}

async fn list_facilities(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config, &headers)?;
    let base = base_url(&headers);

    let updated_since = params
        .get("updatedSince")
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("bad updatedSince: {e}")))
        })
        .transpose()?;
    let offset = count_param(&params, "offset")?.unwrap_or(0);
    let limit = count_param(&params, "limit")?.unwrap_or(usize::MAX);
    let sort = match (params.get("sortAsc"), params.get("sortDesc")) {
        (Some(_), Some(_)) => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "sortAsc and sortDesc are mutually exclusive",
            ))
        }
        (Some(field), None) => Some((field.as_str(), false)),
        (None, Some(field)) => Some((field.as_str(), true)),
        (None, None) => None,
    };
    let all_properties = params.get("allProperties").map_or(true, |v| v != "false");
    let fields: Option<Vec<&str>> = params.get("fields").map(|f| {
        f.split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect()
    });
    let filters: Vec<(&String, &String)> = params
        .iter()
        .filter(|(key, _)| !RESERVED_PARAMS.contains(&key.as_str()))
        .collect();

    let db = state.db.read().await;
    let mut matched: Vec<&Record> = db
        .iter()
        .filter(|r| filters.iter().all(|(key, expected)| matches_filter(r, key, expected)))
        .filter(|r| {
            updated_since.map_or(true, |since| updated_at(r).is_some_and(|at| at >= since))
        })
        .collect();
    if let Some((field, descending)) = sort {
        matched.sort_by(|a, b| {
            let order = compare(a.get(field), b.get(field));
            if descending {
                order.reverse()
            } else {
                order
            }
        });
    }

    let facilities: Vec<Value> = matched
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|r| Value::Object(present(r, state.config.dialect, &base, fields.as_deref(), all_properties)))
        .collect();
    debug!(count = facilities.len(), "listed facilities");
    Ok(Json(json!({ "facilities": facilities })))
}

async fn create_facility(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    authorize(&state.config, &headers)?;
    let base = base_url(&headers);
    let dialect = state.config.dialect;
    let input = parse_body(&body)?;

    let mut db = state.db.write().await;
    let id = match input.get(dialect.id_field()) {
        Some(Value::String(id)) if !id.is_empty() => {
            if db.iter().any(|r| has_id(r, id)) {
                return Err(ApiError::new(
                    StatusCode::CONFLICT,
                    format!("facility {id} already exists"),
                ));
            }
            id.clone()
        }
        Some(Value::Null) | None => Uuid::new_v4().simple().to_string(),
        Some(_) => return Err(ApiError::invalid(format!("{} must be a string", dialect.id_field()))),
    };

    let now = timestamp(Utc::now());
    let mut record = Record::new();
    record.insert("id".to_string(), Value::String(id.clone()));
    apply(&mut record, input)?;
    record.insert("createdAt".to_string(), Value::String(now.clone()));
    record.insert("updatedAt".to_string(), Value::String(now));
    db.push(record.clone());
    info!(%id, "created facility");

    // The body leaves the url out; clients take it from Location.
    let mut body = present(&record, dialect, &base, None, true);
    body.remove(dialect.url_field());
    let location = facility_url(&base, &id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(Value::Object(body)),
    )
        .into_response())
}

async fn get_facility(
    State(state): State<AppState>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config, &headers)?;
    let id = parse_id(&file)?;
    let db = state.db.read().await;
    let record = db
        .iter()
        .find(|r| has_id(r, id))
        .ok_or_else(|| ApiError::not_found(id))?;
    Ok(Json(Value::Object(present(
        record,
        state.config.dialect,
        &base_url(&headers),
        None,
        true,
    ))))
}

async fn update_facility(
    State(state): State<AppState>,
    Path(file): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config, &headers)?;
    let id = parse_id(&file)?;
    let input = parse_body(&body)?;

    let mut db = state.db.write().await;
    let stored = db
        .iter_mut()
        .find(|r| has_id(r, id))
        .ok_or_else(|| ApiError::not_found(id))?;
    let mut updated = stored.clone();
    apply(&mut updated, input)?;
    updated.insert("updatedAt".to_string(), Value::String(timestamp(Utc::now())));
    *stored = updated.clone();
    info!(id, "updated facility");

    Ok(Json(Value::Object(present(
        &updated,
        state.config.dialect,
        &base_url(&headers),
        None,
        true,
    ))))
}

async fn delete_facility(
    State(state): State<AppState>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authorize(&state.config, &headers)?;
    let id = parse_id(&file)?;
    let mut db = state.db.write().await;
    let index = db
        .iter()
        .position(|r| has_id(r, id))
        .ok_or_else(|| ApiError::not_found(id))?;
    db.remove(index);
    info!(id, "deleted facility");
    Ok(StatusCode::NO_CONTENT)
}

fn authorize(config: &MockConfig, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some((username, password)) = &config.credentials else {
        return Ok(());
    };
    let expected = format!("Basic {}", STANDARD.encode(format!("{username}:{password}")));
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(given) if given == expected => Ok(()),
        _ => {
            warn!("rejected request without valid credentials");
            Err(ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
    }
}

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

fn facility_url(base: &str, id: &str) -> String {
    format!("{base}/facilities/{id}.json")
}

fn parse_id(file: &str) -> Result<&str, ApiError> {
    file.strip_suffix(".json")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("no such resource: {file}")))
}

fn parse_body(body: &str) -> Result<Record, ApiError> {
    serde_json::from_str(body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")))
}

fn count_param(params: &HashMap<String, String>, name: &str) -> Result<Option<usize>, ApiError> {
    params
        .get(name)
        .map(|v| {
            v.parse()
                .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, format!("{name} must be a count")))
        })
        .transpose()
}

fn has_id(record: &Record, id: &str) -> bool {
    record.get("id").and_then(Value::as_str) == Some(id)
}

fn updated_at(record: &Record) -> Option<DateTime<FixedOffset>> {
    record
        .get("updatedAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok())
}

/// Copy client-settable fields from `input` into `record` and check the
/// result is a valid facility.
fn apply(record: &mut Record, input: Record) -> Result<(), ApiError> {
    for (key, value) in input {
        if !MANAGED_FIELDS.contains(&key.as_str()) {
            record.insert(key, value);
        }
    }

    match record.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => {}
        _ => return Err(ApiError::invalid("name is required")),
    }
    match record.get("active") {
        Some(Value::Bool(_)) => {}
        None | Some(Value::Null) => {
            record.insert("active".to_string(), Value::Bool(true));
        }
        Some(_) => return Err(ApiError::invalid("active must be a boolean")),
    }
    match record.get("coordinates") {
        None | Some(Value::Null) => {}
        Some(Value::Array(c)) if c.len() == 2 && c.iter().all(Value::is_number) => {}
        Some(_) => return Err(ApiError::invalid("coordinates must be [longitude, latitude]")),
    }
    if !record.get("identifiers").is_some_and(Value::is_array) {
        record.insert("identifiers".to_string(), Value::Array(Vec::new()));
    }
    if !record.get("properties").is_some_and(Value::is_object) {
        record.insert("properties".to_string(), Value::Object(Map::new()));
    }
    Ok(())
}

/// A filter matches a top-level field, or an extended property when no
/// such field exists.
fn matches_filter(record: &Record, key: &str, expected: &str) -> bool {
    let value = record
        .get(key)
        .or_else(|| record.get("properties").and_then(|p| p.get(key)));
    match value {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => expected.is_empty(),
        Some(other) => other.to_string() == expected,
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Render a stored record for the wire.
fn present(
    record: &Record,
    dialect: Dialect,
    base: &str,
    fields: Option<&[&str]>,
    all_properties: bool,
) -> Record {
    let wanted = |key: &str| match fields {
        Some(fields) => fields.iter().any(|f| *f == key),
        None => key != "properties" || all_properties,
    };
    let mut out = Record::new();
    for (key, value) in record.iter().filter(|(k, _)| wanted(k.as_str())) {
        let key = if key == "id" { dialect.id_field() } else { key.as_str() };
        out.insert(key.to_string(), value.clone());
    }
    if wanted("url") {
        let id = record.get("id").and_then(Value::as_str).unwrap_or_default();
        out.insert(
            dialect.url_field().to_string(),
            Value::String(facility_url(base, id)),
        );
    }
    out
}
