//! The facility record entity.
//!
//! # Design
//! A `Facility` has a fixed schema. Its core fields live in one
//! `PropertyMap`, and the extended properties live in a second `PropertyMap`
//! nested under the `properties` key, so a change to an extended property
//! shows up in the facility's `is_modified`. Wire dialects never reach this
//! module; `Backend` has already renamed `uuid`/`href` to `id`/`url`.
//!
//! `get` and `set` accept only core field names. Extended properties are
//! reached through `properties()` / `properties_mut()`, and the container
//! itself cannot be replaced.
//!
//! A facility may borrow the `Registry` it came from; `save` and `delete` go
//! through it. Facilities built with `Facility::new` are detached until
//! `bind` is called.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::FredError;
use crate::property::PropertyMap;
use crate::registry::Registry;
use crate::types::{Identifier, Record};
use crate::value::PropertyValue;

pub const ID: &str = "id";
pub const NAME: &str = "name";
pub const URL: &str = "url";
pub const IDENTIFIERS: &str = "identifiers";
pub const COORDINATES: &str = "coordinates";
pub const ACTIVE: &str = "active";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";
pub const PROPERTIES: &str = "properties";

/// Every field a facility has.
pub const FIELDS: [&str; 9] = [
    ID,
    NAME,
    URL,
    IDENTIFIERS,
    COORDINATES,
    ACTIVE,
    CREATED_AT,
    UPDATED_AT,
    PROPERTIES,
];

const DATE_FIELDS: [&str; 2] = [CREATED_AT, UPDATED_AT];

static NULL: PropertyValue = PropertyValue::Null;
static NO_PROPERTIES: PropertyMap = PropertyMap::empty();

/// What to do with field names outside the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnknownFields {
    Reject,
    /// Registries add members of their own; drop them.
    Ignore,
}

#[derive(Debug, Clone)]
pub struct Facility<'r> {
    registry: Option<&'r Registry>,
    fields: PropertyMap,
    new: bool,
    partial: bool,
    deleted: bool,
}

impl Facility<'static> {
    /// A new, unsaved facility not bound to any registry.
    ///
    /// Unknown field names fail with `InvalidKey`. `active` defaults to
    /// `true`, `identifiers` to an empty list.
    pub fn new<I, K, V>(fields: I) -> Result<Self, FredError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        Facility::build(None, fields, &[], true, false, UnknownFields::Reject)
    }

    /// An existing facility from a server record, not bound to any registry.
    pub fn from_record(record: Record) -> Result<Self, FredError> {
        Facility::hydrate(None, record, &[], false)
    }
}

impl<'r> Facility<'r> {
    pub(crate) fn create<I, K, V>(
        registry: &'r Registry,
        fields: I,
        extended_dates: &[String],
    ) -> Result<Self, FredError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        Facility::build(Some(registry), fields, extended_dates, true, false, UnknownFields::Reject)
    }

    /// Wrap a record the server returned.
    pub(crate) fn hydrate(
        registry: Option<&'r Registry>,
        record: Record,
        extended_dates: &[String],
        partial: bool,
    ) -> Result<Self, FredError> {
        Facility::build(registry, record, extended_dates, false, partial, UnknownFields::Ignore)
    }

    fn build<I, K, V>(
        registry: Option<&'r Registry>,
        fields: I,
        extended_dates: &[String],
        new: bool,
        partial: bool,
        unknown: UnknownFields,
    ) -> Result<Self, FredError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        Ok(Self {
            registry,
            fields: core_fields(fields, extended_dates, unknown)?,
            new,
            partial,
            deleted: false,
        })
    }

    /// Attach this facility to `registry` so `save` and `delete` work.
    pub fn bind<'a>(self, registry: &'a Registry) -> Facility<'a> {
        Facility {
            registry: Some(registry),
            fields: self.fields,
            new: self.new,
            partial: self.partial,
            deleted: self.deleted,
        }
    }

    pub fn registry(&self) -> Option<&'r Registry> {
        self.registry
    }

    /// Current value of a core field.
    pub fn get(&self, field: &str) -> Result<&PropertyValue, FredError> {
        if !FIELDS.contains(&field) {
            return Err(FredError::invalid_key(field));
        }
        Ok(self.fields.get(field).unwrap_or(&NULL))
    }

    pub fn set(&mut self, field: &str, value: impl Into<PropertyValue>) -> Result<(), FredError> {
        self.ensure_not_deleted()?;
        if field == PROPERTIES {
            return Err(FredError::ImmutableField {
                field: field.to_string(),
            });
        }
        if !FIELDS.contains(&field) {
            return Err(FredError::invalid_key(field));
        }
        let value = match field {
            ID => normalize_id(value.into()),
            _ => value.into(),
        };
        self.fields.set(field, value)?;
        Ok(())
    }

    pub fn properties(&self) -> &PropertyMap {
        match self.fields.get(PROPERTIES) {
            Some(PropertyValue::Map(map)) => map,
            _ => &NO_PROPERTIES,
        }
    }

    pub fn properties_mut(&mut self) -> Result<&mut PropertyMap, FredError> {
        self.ensure_not_deleted()?;
        match self.fields.get_mut_untracked(PROPERTIES) {
            Some(PropertyValue::Map(map)) => Ok(map),
            _ => Err(FredError::validation(PROPERTIES, "extended properties are missing")),
        }
    }

    /// The core field map, for inspecting change records.
    pub fn fields(&self) -> &PropertyMap {
        &self.fields
    }

    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID).and_then(PropertyValue::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.fields.get(NAME).and_then(PropertyValue::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.fields.get(URL).and_then(PropertyValue::as_str)
    }

    pub fn active(&self) -> Option<bool> {
        self.fields.get(ACTIVE).and_then(PropertyValue::as_bool)
    }

    /// `[longitude, latitude]`
    pub fn coordinates(&self) -> Option<[f64; 2]> {
        match self.fields.get(COORDINATES)?.as_list()? {
            [lng, lat] => Some([lng.as_f64()?, lat.as_f64()?]),
            _ => None,
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.fields.get(CREATED_AT).and_then(PropertyValue::as_datetime)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.fields.get(UPDATED_AT).and_then(PropertyValue::as_datetime)
    }

    /// Entries of `identifiers` that look like identifiers.
    pub fn identifiers(&self) -> Vec<Identifier> {
        self.fields
            .get(IDENTIFIERS)
            .and_then(PropertyValue::as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(|item| serde_json::from_value(item.to_json()).ok())
            .collect()
    }

    /// Identifiers issued by `agency` in `context`; `None` matches anything.
    pub fn get_identifiers(&self, agency: Option<&str>, context: Option<&str>) -> Vec<Identifier> {
        self.identifiers()
            .into_iter()
            .filter(|id| id.matches(agency, context))
            .collect()
    }

    pub fn is_new(&self) -> bool {
        self.new
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_touched(&self) -> bool {
        self.new || self.fields.is_touched()
    }

    pub fn is_modified(&self) -> bool {
        self.new || self.fields.is_modified()
    }

    /// Non-null core fields, with the extended properties under `properties`.
    pub fn to_dict(&self) -> BTreeMap<String, PropertyValue> {
        self.fields
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// `to_dict` as a JSON object.
    pub fn to_record(&self) -> Record {
        self.fields
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.to_record())
    }

    /// Create or update this facility on its registry, then take the
    /// server's copy as the new baseline.
    pub fn save(&mut self) -> Result<(), FredError> {
        self.check_savable()?;
        let registry = self.registry.ok_or(FredError::Unbound)?;
        let record = registry.save(self)?;
        let extended_dates: Vec<String> = self.properties().date_properties().iter().cloned().collect();
        self.fields = core_fields(record, &extended_dates, UnknownFields::Ignore)?;
        self.new = false;
        Ok(())
    }

    /// Delete this facility on its registry. The facility stays readable,
    /// keeps its id, and rejects any further change.
    pub fn delete(&mut self) -> Result<(), FredError> {
        if self.id().is_none() {
            return Err(FredError::UnsavedEntity);
        }
        self.ensure_not_deleted()?;
        let registry = self.registry.ok_or(FredError::Unbound)?;
        registry.delete(self)?;
        self.deleted = true;
        Ok(())
    }

    /// Checks that must pass before any request is made.
    pub(crate) fn check_savable(&self) -> Result<(), FredError> {
        self.ensure_not_deleted()?;
        if self.partial {
            return Err(FredError::PartialEntityNotSavable);
        }
        for field in [ACTIVE, COORDINATES] {
            if self.fields.get(field).map_or(true, PropertyValue::is_null) {
                return Err(FredError::validation(field, "must not be null"));
            }
        }
        Ok(())
    }

    fn ensure_not_deleted(&self) -> Result<(), FredError> {
        if self.deleted {
            return Err(FredError::EntityDeleted {
                id: self.id().map(str::to_string),
            });
        }
        Ok(())
    }
}

/// Build the core field map, filling in schema defaults.
fn core_fields<I, K, V>(
    fields: I,
    extended_dates: &[String],
    unknown: UnknownFields,
) -> Result<PropertyMap, FredError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<PropertyValue>,
{
    let mut values: BTreeMap<String, PropertyValue> = [
        (ID, PropertyValue::Null),
        (NAME, PropertyValue::Null),
        (URL, PropertyValue::Null),
        (IDENTIFIERS, PropertyValue::List(Vec::new())),
        (COORDINATES, PropertyValue::Null),
        (ACTIVE, PropertyValue::Bool(true)),
        (CREATED_AT, PropertyValue::Null),
        (UPDATED_AT, PropertyValue::Null),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    let mut properties = PropertyValue::Null;

    for (key, value) in fields {
        let key: String = key.into();
        let value: PropertyValue = value.into();
        if !FIELDS.contains(&key.as_str()) {
            match unknown {
                UnknownFields::Reject => return Err(FredError::invalid_key(&key)),
                UnknownFields::Ignore => debug!(field = %key, "ignoring unknown facility field"),
            }
            continue;
        }
        let value = match key.as_str() {
            PROPERTIES => {
                properties = value;
                continue;
            }
            IDENTIFIERS if value.is_null() => continue,
            ID => normalize_id(value),
            _ => value,
        };
        values.insert(key, value);
    }

    values.insert(
        PROPERTIES.to_string(),
        PropertyValue::Map(extended_properties(properties, extended_dates)?),
    );
    PropertyMap::new(values, DATE_FIELDS)
}

fn extended_properties(value: PropertyValue, extended_dates: &[String]) -> Result<PropertyMap, FredError> {
    let dates = extended_dates.iter().cloned();
    match value {
        PropertyValue::Null => PropertyMap::new(BTreeMap::<String, PropertyValue>::new(), dates),
        PropertyValue::Object(fields) => PropertyMap::new(fields, dates),
        PropertyValue::Map(map) => PropertyMap::new(
            map.iter().map(|(k, v)| (k.clone(), v.clone())),
            dates,
        ),
        _ => Err(FredError::validation(PROPERTIES, "must be an object")),
    }
}

/// Ids are strings; numeric ids are stringified and empty ids mean none.
fn normalize_id(value: PropertyValue) -> PropertyValue {
    match value {
        PropertyValue::Number(n) => PropertyValue::String(n.to_string()),
        PropertyValue::String(s) if s.is_empty() => PropertyValue::Null,
        other => other,
    }
}
