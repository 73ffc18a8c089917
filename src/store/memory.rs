//! In-memory document store
//!
//! Backs the test suites and the development server. Implements the small
//! slice of query, update and pipeline operators the shell core exercises;
//! it is a stand-in for a real document database, not a query engine.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use super::{
    document_size, CollectionStats, Document, DocumentStore, FindOptions, StoreError,
    StoreResult, UpdateSummary,
};

/// Shared in-memory store. Cloning is cheap and clones see the same data.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    cursors: DashMap<u64, VecDeque<Document>>,
    next_cursor: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            cursors: DashMap::new(),
            next_cursor: AtomicU64::new(1),
        }
    }

    /// Physical collection names currently holding documents.
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// Number of cursors still open on the server side.
    pub fn open_cursor_count(&self) -> usize {
        self.cursors.len()
    }

    fn matching_docs(
        &self,
        collection: &str,
        query: &Document,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read();
        let docs = collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);

        let mut matched = Vec::new();
        for doc in docs {
            if matches_query(doc, query)? {
                matched.push(doc.clone());
            }
        }

        if !options.sort.is_empty() {
            let sort = options.sort.clone();
            matched.sort_by(|a, b| compare_by_sort(a, b, &sort));
        }

        let skip = options.skip as usize;
        let mut matched: Vec<Document> = matched.into_iter().skip(skip).collect();
        if options.limit > 0 {
            matched.truncate(options.limit as usize);
        }

        if let Some(projection) = &options.projection {
            matched = matched
                .into_iter()
                .map(|doc| apply_projection(&doc, projection))
                .collect();
        }

        Ok(matched)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn open_cursor(
        &self,
        collection: &str,
        query: &Document,
        options: &FindOptions,
    ) -> StoreResult<u64> {
        let matched = self.matching_docs(collection, query, options)?;
        let id = self.next_cursor.fetch_add(1, AtomicOrdering::Relaxed);
        self.cursors.insert(id, matched.into());
        Ok(id)
    }

    async fn read_batch(&self, cursor_id: u64, max_docs: usize) -> StoreResult<Vec<Document>> {
        let mut entry = self
            .cursors
            .get_mut(&cursor_id)
            .ok_or(StoreError::CursorNotFound(cursor_id))?;
        let take = max_docs.min(entry.len());
        Ok(entry.drain(..take).collect())
    }

    async fn kill_cursor(&self, cursor_id: u64) -> StoreResult<()> {
        self.cursors.remove(&cursor_id);
        Ok(())
    }

    async fn count(
        &self,
        collection: &str,
        query: &Document,
        skip: u64,
        limit: u64,
    ) -> StoreResult<u64> {
        let options = FindOptions {
            skip,
            limit,
            ..FindOptions::default()
        };
        Ok(self.matching_docs(collection, query, &options)?.len() as u64)
    }

    async fn find_one(
        &self,
        collection: &str,
        query: &Document,
        projection: Option<&Document>,
    ) -> StoreResult<Option<Document>> {
        let options = FindOptions {
            projection: projection.cloned(),
            limit: 1,
            ..FindOptions::default()
        };
        Ok(self.matching_docs(collection, query, &options)?.into_iter().next())
    }

    async fn insert_many(&self, collection: &str, docs: &[Document]) -> StoreResult<Vec<Value>> {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();

        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut doc = doc.clone();
            let id = doc
                .entry("_id".to_string())
                .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()))
                .clone();
            ids.push(id);
            target.push(doc);
        }
        Ok(ids)
    }

    async fn update_many(
        &self,
        collection: &str,
        query: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
    ) -> StoreResult<UpdateSummary> {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();

        let mut summary = UpdateSummary::default();
        for doc in target.iter_mut() {
            if !matches_query(doc, query)? {
                continue;
            }
            summary.matched += 1;
            if apply_update(doc, update)? {
                summary.modified += 1;
            }
            if !multi {
                break;
            }
        }

        if summary.matched == 0 && upsert {
            let mut doc = upsert_base(query);
            apply_update(&mut doc, update)?;
            let id = doc
                .entry("_id".to_string())
                .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()))
                .clone();
            target.push(doc);
            summary.upserted_id = Some(id);
        }

        Ok(summary)
    }

    async fn remove(
        &self,
        collection: &str,
        query: &Document,
        just_one: bool,
    ) -> StoreResult<u64> {
        let mut collections = self.collections.write();
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut removed = 0u64;
        let mut kept = Vec::with_capacity(target.len());
        for doc in target.drain(..) {
            let matches = matches_query(&doc, query)?;
            if matches && (!just_one || removed == 0) {
                removed += 1;
            } else {
                kept.push(doc);
            }
        }
        *target = kept;
        Ok(removed)
    }

    async fn drop_collection(&self, collection: &str) -> StoreResult<()> {
        // Same contract as the usual store clients: dropping a collection
        // that does not exist succeeds quietly.
        self.collections.write().remove(collection);
        Ok(())
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Document],
    ) -> StoreResult<Vec<Document>> {
        let mut docs = self.matching_docs(collection, &Document::new(), &FindOptions::default())?;

        for stage in pipeline {
            let (name, spec) = stage
                .iter()
                .next()
                .ok_or_else(|| StoreError::InvalidQuery("empty pipeline stage".into()))?;
            match (name.as_str(), spec) {
                ("$match", Value::Object(query)) => {
                    let mut kept = Vec::new();
                    for doc in docs {
                        if matches_query(&doc, query)? {
                            kept.push(doc);
                        }
                    }
                    docs = kept;
                }
                ("$sort", Value::Object(spec)) => {
                    let sort: Vec<(String, i8)> = spec
                        .iter()
                        .map(|(k, v)| (k.clone(), if v.as_i64() == Some(-1) { -1 } else { 1 }))
                        .collect();
                    docs.sort_by(|a, b| compare_by_sort(a, b, &sort));
                }
                ("$skip", Value::Number(n)) => {
                    let n = n.as_u64().unwrap_or(0) as usize;
                    docs = docs.into_iter().skip(n).collect();
                }
                ("$limit", Value::Number(n)) => {
                    docs.truncate(n.as_u64().unwrap_or(0) as usize);
                }
                ("$project", Value::Object(projection)) => {
                    docs = docs
                        .iter()
                        .map(|doc| apply_projection(doc, projection))
                        .collect();
                }
                ("$count", Value::String(field)) => {
                    let mut out = Document::new();
                    out.insert(field.clone(), Value::from(docs.len() as u64));
                    docs = vec![out];
                }
                (other, _) => {
                    return Err(StoreError::InvalidQuery(format!(
                        "unsupported pipeline stage: {}",
                        other
                    )));
                }
            }
        }
        Ok(docs)
    }

    async fn collection_stats(&self, collection: &str) -> StoreResult<Option<CollectionStats>> {
        let collections = self.collections.read();
        Ok(collections.get(collection).map(|docs| CollectionStats {
            size_bytes: docs.iter().map(document_size).sum(),
            doc_count: docs.len() as u64,
        }))
    }
}

/// Resolves a possibly dotted path against a document.
fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut current: Option<&Value> = None;
    for (i, part) in path.split('.').enumerate() {
        current = if i == 0 {
            doc.get(part)
        } else {
            current?.as_object()?.get(part)
        };
    }
    current
}

fn matches_query(doc: &Document, query: &Document) -> StoreResult<bool> {
    for (field, condition) in query {
        if field.starts_with('$') {
            return Err(StoreError::InvalidQuery(format!(
                "unsupported top-level operator: {}",
                field
            )));
        }
        let actual = get_path(doc, field);
        match condition {
            Value::Object(spec) if spec.keys().any(|k| k.starts_with('$')) => {
                for (op, operand) in spec {
                    if !matches_operator(actual, op, operand)? {
                        return Ok(false);
                    }
                }
            }
            other => {
                if actual != Some(other) {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

fn matches_operator(actual: Option<&Value>, op: &str, operand: &Value) -> StoreResult<bool> {
    let ordered = |wanted: &[Ordering]| -> bool {
        actual
            .and_then(|a| compare_values(a, operand))
            .map(|ord| wanted.contains(&ord))
            .unwrap_or(false)
    };
    match op {
        "$eq" => Ok(actual == Some(operand)),
        "$ne" => Ok(actual != Some(operand)),
        "$gt" => Ok(ordered(&[Ordering::Greater])),
        "$gte" => Ok(ordered(&[Ordering::Greater, Ordering::Equal])),
        "$lt" => Ok(ordered(&[Ordering::Less])),
        "$lte" => Ok(ordered(&[Ordering::Less, Ordering::Equal])),
        "$in" => match operand {
            Value::Array(candidates) => {
                Ok(actual.map(|a| candidates.contains(a)).unwrap_or(false))
            }
            _ => Err(StoreError::InvalidQuery("$in requires an array".into())),
        },
        "$exists" => {
            let wanted = operand.as_bool().unwrap_or(true);
            Ok(actual.is_some() == wanted)
        }
        other => Err(StoreError::InvalidQuery(format!(
            "unsupported query operator: {}",
            other
        ))),
    }
}

/// Total order over the value types the matcher compares. Mixed types do
/// not compare.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_by_sort(a: &Document, b: &Document, sort: &[(String, i8)]) -> Ordering {
    for (field, direction) in sort {
        let ord = match (get_path(a, field), get_path(b, field)) {
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        let ord = if *direction < 0 { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn apply_projection(doc: &Document, projection: &Document) -> Document {
    if projection.is_empty() {
        return doc.clone();
    }
    let inclusive = projection
        .iter()
        .any(|(k, v)| k != "_id" && value_truthy(v));

    let mut out = Document::new();
    if inclusive {
        for (field, flag) in projection {
            if value_truthy(flag) {
                if let Some(value) = doc.get(field) {
                    out.insert(field.clone(), value.clone());
                }
            }
        }
        let id_excluded = projection.get("_id").map(|v| !value_truthy(v)).unwrap_or(false);
        if !id_excluded {
            if let Some(id) = doc.get("_id") {
                out.insert("_id".to_string(), id.clone());
            }
        }
    } else {
        for (field, value) in doc {
            let excluded = projection.get(field).map(|v| !value_truthy(v)).unwrap_or(false);
            if !excluded {
                out.insert(field.clone(), value.clone());
            }
        }
    }
    out
}

fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// Returns true when the document changed.
fn apply_update(doc: &mut Document, update: &Document) -> StoreResult<bool> {
    let operator_form = update.keys().any(|k| k.starts_with('$'));
    if !operator_form {
        // Full replacement, preserving the primary key.
        let id = doc.get("_id").cloned();
        let before = doc.clone();
        *doc = update.clone();
        if let Some(id) = id {
            doc.insert("_id".to_string(), id);
        }
        return Ok(*doc != before);
    }

    let mut changed = false;
    for (op, spec) in update {
        let Value::Object(fields) = spec else {
            return Err(StoreError::InvalidQuery(format!(
                "{} requires an object operand",
                op
            )));
        };
        for (field, operand) in fields {
            changed |= apply_update_operator(doc, op, field, operand)?;
        }
    }
    Ok(changed)
}

fn apply_update_operator(
    doc: &mut Document,
    op: &str,
    field: &str,
    operand: &Value,
) -> StoreResult<bool> {
    match op {
        "$set" => {
            let prior = doc.insert(field.to_string(), operand.clone());
            Ok(prior.as_ref() != Some(operand))
        }
        "$unset" => Ok(doc.remove(field).is_some()),
        "$inc" => {
            let delta = operand
                .as_f64()
                .ok_or_else(|| StoreError::InvalidQuery("$inc requires a number".into()))?;
            let current = doc.get(field).and_then(Value::as_f64).unwrap_or(0.0);
            doc.insert(field.to_string(), Value::from(current + delta));
            Ok(delta != 0.0)
        }
        "$push" => {
            let entry = doc
                .entry(field.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            match entry {
                Value::Array(items) => {
                    items.push(operand.clone());
                    Ok(true)
                }
                _ => Err(StoreError::InvalidQuery(format!(
                    "$push target {} is not an array",
                    field
                ))),
            }
        }
        "$addToSet" => {
            let entry = doc
                .entry(field.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            match entry {
                Value::Array(items) => {
                    if items.contains(operand) {
                        Ok(false)
                    } else {
                        items.push(operand.clone());
                        Ok(true)
                    }
                }
                _ => Err(StoreError::InvalidQuery(format!(
                    "$addToSet target {} is not an array",
                    field
                ))),
            }
        }
        "$pull" => {
            let Some(Value::Array(items)) = doc.get_mut(field) else {
                return Ok(false);
            };
            let before = items.len();
            items.retain(|item| item != operand);
            Ok(items.len() != before)
        }
        other => Err(StoreError::InvalidQuery(format!(
            "unsupported update operator: {}",
            other
        ))),
    }
}

/// Seed document for an upsert: the equality fields of the query.
fn upsert_base(query: &Document) -> Document {
    let mut base = Document::new();
    for (field, condition) in query {
        let is_operator_spec = matches!(
            condition,
            Value::Object(spec) if spec.keys().any(|k| k.starts_with('$'))
        );
        if !is_operator_spec && !field.contains('.') {
            base.insert(field.clone(), condition.clone());
        }
    }
    base
}
