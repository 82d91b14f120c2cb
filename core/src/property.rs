//! Property map: a change-tracking map with restricted keys and date coercion.
//!
//! # Design
//! Keys must be ASCII alphanumeric and start with a letter. Keys listed as
//! date properties have string values parsed into UTC datetimes on the way
//! in, both at construction and on later assignment. Validation and parsing
//! finish before the underlying map is touched, so a failed `set` leaves the
//! map unchanged.
//!
//! Initial contents are stored without key validation: they come from the
//! server, which may use names a client could not assign.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::FredError;
use crate::tracking::ChangeTrackingMap;
use crate::value::{parse_datetime, PropertyValue};

#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    inner: ChangeTrackingMap<PropertyValue>,
    date_properties: BTreeSet<String>,
}

/// Two maps are equal when their current contents are equal; change
/// records are not compared.
impl PartialEq for PropertyMap {
    fn eq(&self, other: &Self) -> bool {
        self.inner.iter().eq(other.inner.iter())
    }
}

impl PropertyMap {
    pub const fn empty() -> Self {
        Self {
            inner: ChangeTrackingMap::new(),
            date_properties: BTreeSet::new(),
        }
    }

    pub fn new<I, K, V>(
        initial: I,
        date_properties: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, FredError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let date_properties: BTreeSet<String> =
            date_properties.into_iter().map(Into::into).collect();
        let values = initial
            .into_iter()
            .map(|(k, v)| {
                let key = k.into();
                let value = coerce_date(&date_properties, &key, v.into())?;
                Ok((key, value))
            })
            .collect::<Result<Vec<_>, FredError>>()?;
        Ok(Self {
            inner: ChangeTrackingMap::from_snapshot(values),
            date_properties,
        })
    }

    /// Build from a JSON object, e.g. the `properties` member of a facility.
    pub fn from_json(
        object: serde_json::Map<String, serde_json::Value>,
        date_properties: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, FredError> {
        Self::new(object, date_properties)
    }

    pub fn date_properties(&self) -> &BTreeSet<String> {
        &self.date_properties
    }

    /// Assign `value` to `key`, returning the previous value.
    pub fn set(
        &mut self,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<Option<PropertyValue>, FredError> {
        if !is_valid_key(key) {
            return Err(FredError::invalid_key(key));
        }
        let value = coerce_date(&self.date_properties, key, value.into())?;
        Ok(self.inner.set(key, value))
    }

    pub fn delete(&mut self, key: &str) -> Option<PropertyValue> {
        self.inner.delete(key)
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.inner.get(key)
    }

    pub(crate) fn get_mut_untracked(&mut self, key: &str) -> Option<&mut PropertyValue> {
        self.inner.get_mut_untracked(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.inner.keys()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_touched(&self) -> bool {
        self.inner.is_touched()
    }

    pub fn is_modified(&self) -> bool {
        self.inner.is_modified()
    }

    pub fn changes(&self) -> &ChangeTrackingMap<PropertyValue> {
        &self.inner
    }

    /// See [`ChangeTrackingMap::get_changes`].
    pub fn get_changes(
        &self,
        include_touched: bool,
    ) -> (BTreeMap<String, PropertyValue>, BTreeSet<String>) {
        self.inner.get_changes(include_touched)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.inner
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

/// `^[A-Za-z][A-Za-z0-9]*$`
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

fn coerce_date(
    date_properties: &BTreeSet<String>,
    key: &str,
    value: PropertyValue,
) -> Result<PropertyValue, FredError> {
    if !date_properties.contains(key) {
        return Ok(value);
    }
    match value {
        PropertyValue::String(raw) => match parse_datetime(&raw) {
            Ok(dt) => Ok(PropertyValue::DateTime(dt)),
            Err(e) => Err(FredError::InvalidDate {
                key: key.to_string(),
                value: raw,
                reason: e.to_string(),
            }),
        },
        other => Ok(other),
    }
}
