//! Fluent facility queries.
//!
//! # Design
//! `FacilityQuery` only accumulates filters, one sort directive and a field
//! selection, then turns them into URL parameters. Fetching is delegated to a
//! function supplied at construction (`Registry::facilities` passes one that
//! calls the list endpoint), so the builder is testable without a server.
//!
//! A query runs once. Its results come back as `Facilities`, a single-pass
//! iterator that wraps each raw record into a `Facility` only when it is
//! reached.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::FredError;
use crate::facility::Facility;
use crate::registry::Registry;
use crate::types::Record;
use crate::value::PropertyValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortClause {
    pub field: String,
    pub order: SortOrder,
}

impl SortClause {
    pub fn ascending(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Descending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sort {
    Ascending(String),
    Descending(String),
    Clauses(Vec<SortClause>),
}

/// What a fetch function is asked to retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub params: BTreeMap<String, String>,
    /// Selected fields; empty means every field.
    pub selection: Vec<String>,
}

impl QueryRequest {
    /// Whether results will only hold some fields.
    pub fn is_partial(&self) -> bool {
        !self.selection.is_empty()
    }
}

type FetchFn<'r> = Box<dyn FnMut(&QueryRequest) -> Result<Facilities<'r>, FredError> + 'r>;

pub struct FacilityQuery<'r> {
    fetch: FetchFn<'r>,
    filters: BTreeMap<String, PropertyValue>,
    sort: Option<Sort>,
    selection: Vec<String>,
    executed: bool,
}

impl<'r> FacilityQuery<'r> {
    pub fn new(fetch: impl FnMut(&QueryRequest) -> Result<Facilities<'r>, FredError> + 'r) -> Self {
        Self {
            fetch: Box::new(fetch),
            filters: BTreeMap::new(),
            sort: None,
            selection: Vec::new(),
            executed: false,
        }
    }

    /// Add filters. A later value for the same key replaces the earlier one.
    pub fn filter<I, K, V>(&mut self, filters: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        self.filters
            .extend(filters.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn sort_ascending(&mut self, field: &str) -> Result<&mut Self, FredError> {
        self.set_sort(Sort::Ascending(field.to_string()))
    }

    pub fn sort_descending(&mut self, field: &str) -> Result<&mut Self, FredError> {
        self.set_sort(Sort::Descending(field.to_string()))
    }

    /// Sort by clauses. Registries sort on one key only, so more than one
    /// clause fails with `ConflictingSort`; an empty list is a no-op.
    pub fn sort(&mut self, clauses: Vec<SortClause>) -> Result<&mut Self, FredError> {
        if clauses.len() > 1 {
            return Err(FredError::ConflictingSort);
        }
        if clauses.is_empty() {
            return Ok(self);
        }
        self.set_sort(Sort::Clauses(clauses))
    }

    fn set_sort(&mut self, sort: Sort) -> Result<&mut Self, FredError> {
        if self.is_sorted() {
            return Err(FredError::ConflictingSort);
        }
        self.sort = Some(sort);
        Ok(self)
    }

    /// Only fetch `fields`. An empty selection means every field.
    pub fn select<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_sorted(&self) -> bool {
        self.sort.is_some()
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// URL parameters for the accumulated query. Filters win over the
    /// builder's own parameters on a name clash.
    pub fn params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        if self.selection.is_empty() {
            params.insert("allProperties".to_string(), "true".to_string());
        } else {
            params.insert("allProperties".to_string(), "false".to_string());
            params.insert("fields".to_string(), self.selection.join(","));
        }

        let sort = match &self.sort {
            Some(Sort::Ascending(field)) => Some((SortOrder::Ascending, field)),
            Some(Sort::Descending(field)) => Some((SortOrder::Descending, field)),
            Some(Sort::Clauses(clauses)) => clauses.first().map(|c| (c.order, &c.field)),
            None => None,
        };
        match sort {
            Some((SortOrder::Ascending, field)) => {
                params.insert("sortAsc".to_string(), field.clone());
            }
            Some((SortOrder::Descending, field)) => {
                params.insert("sortDesc".to_string(), field.clone());
            }
            None => {}
        }

        for (key, value) in &self.filters {
            params.insert(key.clone(), value.to_url_param());
        }
        params
    }

    /// Run the query for results `start..end`, asking for at most
    /// `page_size` records.
    pub fn range(
        &mut self,
        start: usize,
        end: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<Facilities<'r>, FredError> {
        if self.executed {
            return Err(FredError::QueryAlreadyExecuted);
        }
        if let Some(end) = end.filter(|&end| end < start) {
            return Err(FredError::validation(
                "range",
                &format!("end {end} is before start {start}"),
            ));
        }

        let mut params = self.params();
        if start > 0 {
            params.insert("offset".to_string(), start.to_string());
        }
        let limit = match (end.map(|end| end - start), page_size) {
            (Some(span), Some(page)) => Some(span.min(page)),
            (span, page) => span.or(page),
        };
        if let Some(limit) = limit {
            params.insert("limit".to_string(), limit.to_string());
        }

        let request = QueryRequest {
            params,
            selection: self.selection.clone(),
        };
        self.executed = true;
        (self.fetch)(&request)
    }

    pub fn all(&mut self) -> Result<Facilities<'r>, FredError> {
        self.range(0, None, None)
    }
}

impl fmt::Debug for FacilityQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FacilityQuery")
            .field("filters", &self.filters)
            .field("sort", &self.sort)
            .field("selection", &self.selection)
            .field("executed", &self.executed)
            .finish_non_exhaustive()
    }
}

/// Iterating a query runs it; a failure to run is the only item.
impl<'r> IntoIterator for FacilityQuery<'r> {
    type Item = Result<Facility<'r>, FredError>;
    type IntoIter = Facilities<'r>;

    fn into_iter(mut self) -> Self::IntoIter {
        self.all().unwrap_or_else(Facilities::failed)
    }
}

/// Query results, wrapped into facilities as they are consumed.
#[derive(Debug)]
pub struct Facilities<'r> {
    registry: Option<&'r Registry>,
    records: std::vec::IntoIter<Record>,
    extended_dates: Vec<String>,
    partial: bool,
    error: Option<FredError>,
}

impl<'r> Facilities<'r> {
    /// Results bound to `registry`, or detached when it is `None`.
    pub fn new(registry: Option<&'r Registry>, records: Vec<Record>, partial: bool) -> Self {
        Self {
            registry,
            records: records.into_iter(),
            extended_dates: registry
                .map(|r| r.extended_date_properties().to_vec())
                .unwrap_or_default(),
            partial,
            error: None,
        }
    }

    fn failed(error: FredError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(None, Vec::new(), false)
        }
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }
}

impl<'r> Iterator for Facilities<'r> {
    type Item = Result<Facility<'r>, FredError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.error.take() {
            return Some(Err(error));
        }
        let record = self.records.next()?;
        Some(Facility::hydrate(
            self.registry,
            record,
            &self.extended_dates,
            self.partial,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let extra = usize::from(self.error.is_some());
        let (low, high) = self.records.size_hint();
        (low + extra, high.map(|h| h + extra))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    /// A query whose fetch function records each request and returns `records`.
    fn recording_query(
        records: Vec<Record>,
    ) -> (FacilityQuery<'static>, Rc<RefCell<Vec<QueryRequest>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let query = FacilityQuery::new(move |request: &QueryRequest| {
            log.borrow_mut().push(request.clone());
            Ok(Facilities::new(None, records.clone(), request.is_partial()))
        });
        (query, seen)
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_query_asks_for_all_properties() {
        let (query, _) = recording_query(Vec::new());
        assert_eq!(query.params(), params(&[("allProperties", "true")]));
    }

    #[test]
    fn filter_and_select_produce_partial_params() {
        let (mut query, seen) = recording_query(vec![record(json!({"id": "a", "name": "A"}))]);
        let results: Vec<_> = query
            .filter([("active", false)])
            .select(["name"])
            .all()
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].params,
            params(&[("allProperties", "false"), ("fields", "name"), ("active", "false")])
        );
        assert!(seen[0].is_partial());
        assert_eq!(results.len(), 1);
        assert!(results[0].is_partial());
    }

    #[test]
    fn later_filters_overwrite_earlier_ones() {
        let (mut query, _) = recording_query(Vec::new());
        query
            .filter([("name", "Foo")])
            .filter([("name", PropertyValue::from("Bar")), ("active", true.into())]);
        let p = query.params();
        assert_eq!(p["name"], "Bar");
        assert_eq!(p["active"], "true");
    }

    #[test]
    fn filter_values_are_serialized() {
        let (mut query, _) = recording_query(Vec::new());
        let since = Utc.with_ymd_and_hms(2013, 2, 5, 3, 25, 27).unwrap();
        query.filter([("updatedSince", since)]).filter([("level", 4)]);
        let p = query.params();
        assert_eq!(p["updatedSince"], "2013-02-05T03:25:27Z");
        assert_eq!(p["level"], "4");
    }

    #[test]
    fn select_joins_fields_with_commas() {
        let (mut query, _) = recording_query(Vec::new());
        query.select(["url", "createdAt"]);
        assert_eq!(query.params()["fields"], "url,createdAt");

        query.select(Vec::<String>::new());
        assert_eq!(query.params(), params(&[("allProperties", "true")]));
    }

    #[test]
    fn sort_directions_map_to_params() {
        let (mut query, _) = recording_query(Vec::new());
        query.sort_ascending("name").unwrap();
        assert_eq!(query.params()["sortAsc"], "name");

        let (mut query, _) = recording_query(Vec::new());
        query.sort_descending("createdAt").unwrap();
        assert_eq!(query.params()["sortDesc"], "createdAt");
        assert!(!query.params().contains_key("sortAsc"));

        let (mut query, _) = recording_query(Vec::new());
        query.sort(vec![SortClause::descending("name")]).unwrap();
        assert_eq!(query.params()["sortDesc"], "name");
    }

    #[test]
    fn second_sort_conflicts() {
        let (mut query, _) = recording_query(Vec::new());
        query.sort_ascending("name").unwrap();
        assert!(matches!(query.sort_descending("name"), Err(FredError::ConflictingSort)));
        assert!(matches!(query.sort_ascending("url"), Err(FredError::ConflictingSort)));
        assert!(matches!(
            query.sort(vec![SortClause::ascending("url")]),
            Err(FredError::ConflictingSort)
        ));
        assert_eq!(query.params()["sortAsc"], "name");
    }

    #[test]
    fn multi_key_sort_is_rejected() {
        let (mut query, _) = recording_query(Vec::new());
        let clauses = vec![SortClause::ascending("name"), SortClause::descending("url")];
        assert!(matches!(query.sort(clauses), Err(FredError::ConflictingSort)));
        assert!(!query.is_sorted());
        assert!(query.sort(Vec::new()).is_ok());
        assert!(!query.is_sorted());
    }

    #[test]
    fn range_adds_offset_and_limit() {
        let (mut query, seen) = recording_query(Vec::new());
        query.range(20, Some(50), Some(10)).unwrap();
        let p = &seen.borrow()[0].params;
        assert_eq!(p["offset"], "20");
        assert_eq!(p["limit"], "10");

        let (mut query, seen) = recording_query(Vec::new());
        query.range(0, Some(5), None).unwrap();
        let p = &seen.borrow()[0].params;
        assert!(!p.contains_key("offset"));
        assert_eq!(p["limit"], "5");

        let (mut query, seen) = recording_query(Vec::new());
        query.range(3, None, Some(25)).unwrap();
        assert_eq!(seen.borrow()[0].params["limit"], "25");
    }

    #[test]
    fn inverted_range_is_rejected_without_fetching() {
        let (mut query, seen) = recording_query(Vec::new());
        assert!(matches!(query.range(10, Some(5), None), Err(FredError::Validation { .. })));
        assert!(seen.borrow().is_empty());
        assert!(!query.is_executed());
    }

    #[test]
    fn query_runs_only_once() {
        let (mut query, seen) = recording_query(Vec::new());
        query.all().unwrap();
        assert!(matches!(query.all(), Err(FredError::QueryAlreadyExecuted)));
        assert!(matches!(query.range(0, Some(1), None), Err(FredError::QueryAlreadyExecuted)));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn iterating_the_query_runs_all() {
        let records = vec![record(json!({"id": "a"})), record(json!({"id": "b"}))];
        let (mut query, seen) = recording_query(records);
        query.filter([("active", true)]);
        let ids: Vec<String> = query
            .into_iter()
            .map(|f| f.unwrap().id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(seen.borrow()[0].params["active"], "true");
        assert!(!seen.borrow()[0].is_partial());
    }

    #[test]
    fn fetch_failure_is_yielded_once_when_iterating() {
        let query = FacilityQuery::new(|_: &QueryRequest| Err(FredError::UnsavedEntity));
        let mut results = query.into_iter();
        assert!(matches!(results.next(), Some(Err(FredError::UnsavedEntity))));
        assert!(results.next().is_none());
    }

    #[test]
    fn results_are_single_pass_and_lazy() {
        let records = vec![
            record(json!({"id": "a"})),
            record(json!({"id": "b", "createdAt": "garbage"})),
            record(json!({"id": "c"})),
        ];
        let mut results = Facilities::new(None, records, false);
        assert_eq!(results.size_hint(), (3, Some(3)));
        assert!(results.next().unwrap().is_ok());
        assert!(matches!(results.next(), Some(Err(FredError::InvalidDate { .. }))));
        assert_eq!(results.next().unwrap().unwrap().id(), Some("c"));
        assert!(results.next().is_none());
        assert!(results.next().is_none());
    }
}
