//! Datastore facade and orchestration.
//!
//! A [`Datastore`] is one collection: one datafile, one id-map owning every
//! document body, and N indexes holding id handles. All operations are
//! submitted to the [`crate::executor::Executor`], whose worker thread owns
//! the mutable [`Core`]; the public methods block for their result. Reads
//! therefore observe every write queued before them and none queued after.

use crate::cursor::{Cursor, QueryPlan};
use crate::error::{DbError, DbResult};
use crate::executor::Executor;
use crate::index::{DocIndex, IndexSpec};
use crate::matcher::Matcher;
use crate::persistence::{self, LogEvent};
use crate::update;
use quilldb_codec::{
    check_object, deep_copy, doc_id, generate_id, get_dotted, StringCmp, Value, ValueComparator,
};
use quilldb_storage::{FileBackend, MemoryBackend, StorageBackend};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Options for opening a datastore.
#[derive(Clone)]
pub struct Options {
    /// Path of the datafile; `None` keeps everything in memory.
    pub filename: Option<PathBuf>,
    /// Never touch the filesystem, even when a filename is set.
    pub in_memory_only: bool,
    /// Load the datafile inside [`Datastore::open`]. When disabled, every
    /// operation waits until [`Datastore::load_database`] is called.
    pub autoload: bool,
    /// Maintain `createdAt`/`updatedAt` date fields automatically.
    pub timestamp_data: bool,
    /// Tolerated fraction of undecodable datafile lines (0..1).
    pub corrupt_alert_threshold: f64,
    /// Custom string comparator for sorts and string-keyed indexes.
    pub compare_strings: Option<StringCmp>,
    /// Flush every log append to durable storage.
    pub sync_on_write: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            filename: None,
            in_memory_only: false,
            autoload: false,
            timestamp_data: false,
            corrupt_alert_threshold: 0.1,
            compare_strings: None,
            sync_on_write: true,
        }
    }
}

impl Options {
    /// Default options for a file-backed datastore at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            filename: Some(path.into()),
            ..Self::default()
        }
        .autoload(true)
    }

    /// Default options for an in-memory datastore.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            in_memory_only: true,
            ..Self::default()
        }
        .autoload(true)
    }

    /// Sets whether [`Datastore::open`] loads the datafile.
    #[must_use]
    pub fn autoload(mut self, value: bool) -> Self {
        self.autoload = value;
        self
    }

    /// Sets automatic timestamp maintenance.
    #[must_use]
    pub fn timestamp_data(mut self, value: bool) -> Self {
        self.timestamp_data = value;
        self
    }

    /// Sets the corruption tolerance threshold.
    #[must_use]
    pub fn corrupt_alert_threshold(mut self, value: f64) -> Self {
        self.corrupt_alert_threshold = value;
        self
    }

    /// Sets a custom string comparator.
    #[must_use]
    pub fn compare_strings(mut self, cmp: StringCmp) -> Self {
        self.compare_strings = Some(cmp);
        self
    }

    /// Sets whether log appends fsync.
    #[must_use]
    pub fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("filename", &self.filename)
            .field("in_memory_only", &self.in_memory_only)
            .field("autoload", &self.autoload)
            .field("timestamp_data", &self.timestamp_data)
            .field("corrupt_alert_threshold", &self.corrupt_alert_threshold)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

/// Options for [`Datastore::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Update every matching document instead of the first.
    pub multi: bool,
    /// Insert a document built from the update when nothing matches.
    pub upsert: bool,
    /// Return the updated documents in [`UpdateResult::updated_docs`].
    pub return_updated_docs: bool,
}

/// Options for [`Datastore::remove`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Remove every matching document instead of the first.
    pub multi: bool,
}

/// Outcome of an update.
#[derive(Debug, Clone, Default)]
pub struct UpdateResult {
    /// Number of documents written (including an upserted one).
    pub num_affected: usize,
    /// The document inserted by an upsert, when one happened.
    pub upserted: Option<Value>,
    /// Deep copies of the updated documents, when requested.
    pub updated_docs: Option<Vec<Value>>,
}

/// An embedded document collection.
///
/// # Example
///
/// ```ignore
/// let db = Datastore::open(Options::file("users.db"))?;
/// db.insert(doc)?;
/// let adults = db.find(query).sort(&[("age", 1)]).exec()?;
/// ```
pub struct Datastore {
    executor: Executor<Core>,
}

impl Datastore {
    /// Opens a datastore.
    ///
    /// With `autoload` set, the datafile is loaded (and compacted) before
    /// this returns; a load failure fails the open.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::LoadCorrupted`] when too many datafile lines are
    /// unreadable, and I/O errors unmodified.
    pub fn open(options: Options) -> DbResult<Self> {
        let autoload = options.autoload;
        let datastore = Self {
            executor: Executor::new(Core::new(options)),
        };
        if autoload {
            datastore.load_database()?;
        }
        Ok(datastore)
    }

    /// Opens a fresh in-memory datastore, mainly for tests.
    ///
    /// # Errors
    ///
    /// Never fails in practice; kept fallible for API symmetry.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(Options::in_memory())
    }

    /// Reads the datafile, folds its events, rebuilds indexes, rewrites a
    /// compacted snapshot, and drains operations queued meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::LoadCorrupted`] past the corruption threshold;
    /// after that every subsequent operation fails with
    /// [`DbError::NotLoaded`].
    pub fn load_database(&self) -> DbResult<()> {
        self.executor.submit(true, Core::load)
    }

    /// Inserts one document and returns a deep copy of it with `_id`
    /// assigned.
    ///
    /// # Errors
    ///
    /// Fails on reserved field names, non-string `_id`, or a unique index
    /// violation. A failed insert leaves no trace.
    pub fn insert(&self, doc: Value) -> DbResult<Value> {
        let mut inserted = self
            .executor
            .submit(false, move |core| core.insert_docs(vec![doc]))?;
        Ok(inserted.remove(0))
    }

    /// Inserts several documents all-or-nothing.
    ///
    /// # Errors
    ///
    /// On any failure the datastore state is exactly what it was before the
    /// call.
    pub fn insert_many(&self, docs: Vec<Value>) -> DbResult<Vec<Value>> {
        self.executor
            .submit(false, move |core| core.insert_docs(docs))
    }

    /// Starts a query; chain [`Cursor`] adapters and finish with
    /// [`Cursor::exec`].
    pub fn find(&self, query: Value) -> Cursor<'_> {
        Cursor::new(self, query)
    }

    /// Returns the first matching document, if any.
    ///
    /// # Errors
    ///
    /// Propagates query errors.
    pub fn find_one(&self, query: Value) -> DbResult<Option<Value>> {
        Ok(self.find(query).limit(1).exec()?.pop())
    }

    /// Counts matching documents.
    ///
    /// # Errors
    ///
    /// Propagates query errors.
    pub fn count(&self, query: Value) -> DbResult<usize> {
        self.executor
            .submit(false, move |core| core.count(&query))
    }

    /// Updates matching documents, or upserts when requested.
    ///
    /// # Errors
    ///
    /// Fails on invalid updates and unique violations; a failed update
    /// changes nothing.
    pub fn update(
        &self,
        query: Value,
        update: Value,
        options: UpdateOptions,
    ) -> DbResult<UpdateResult> {
        self.executor
            .submit(false, move |core| core.update_docs(&query, &update, options))
    }

    /// Removes matching documents and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Propagates query and I/O errors.
    pub fn remove(&self, query: Value, options: RemoveOptions) -> DbResult<usize> {
        self.executor
            .submit(false, move |core| core.remove_docs(&query, options.multi))
    }

    /// Declares an index, building it from the current documents.
    ///
    /// Redeclaring an identical index is a no-op.
    ///
    /// # Errors
    ///
    /// Fails when existing documents violate a unique constraint (the
    /// index is then not created) or when the name is taken by a different
    /// spec.
    pub fn ensure_index(&self, spec: IndexSpec) -> DbResult<()> {
        self.executor
            .submit(false, move |core| core.ensure_index(spec))
    }

    /// Drops an index by name (field paths joined with commas).
    ///
    /// # Errors
    ///
    /// The implicit `_id` index cannot be removed.
    pub fn remove_index(&self, name: &str) -> DbResult<()> {
        let name = name.to_string();
        self.executor
            .submit(false, move |core| core.remove_index(&name))
    }

    /// Rewrites the datafile as a compacted snapshot.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors.
    pub fn compact(&self) -> DbResult<()> {
        self.executor.submit(false, Core::compact_now)
    }

    /// Removes every document expired under a TTL index and returns how
    /// many were removed.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors.
    pub fn sweep_expired(&self) -> DbResult<usize> {
        self.executor.submit(false, Core::sweep_expired)
    }

    /// All documents in `_id` order, as deep copies.
    ///
    /// # Errors
    ///
    /// Fails only when the datastore did not load.
    pub fn get_all_data(&self) -> DbResult<Vec<Value>> {
        self.executor.submit(false, |core| core.get_all_docs())
    }

    /// Internal: candidate documents for a query, after index selection and
    /// TTL enforcement.
    ///
    /// # Errors
    ///
    /// Propagates query errors.
    pub fn get_candidates(&self, query: Value) -> DbResult<Vec<Value>> {
        self.executor
            .submit(false, move |core| core.get_candidates(&query))
    }

    pub(crate) fn run_plan(&self, plan: QueryPlan) -> DbResult<Vec<Value>> {
        self.executor
            .submit(false, move |core| core.run_query(plan))
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore").finish_non_exhaustive()
    }
}

/// Mutable datastore state, owned by the executor's worker thread.
pub(crate) struct Core {
    timestamp_data: bool,
    sync_on_write: bool,
    corrupt_alert_threshold: f64,
    cmp: ValueComparator,
    backend: Box<dyn StorageBackend>,
    docs: BTreeMap<String, Value>,
    indexes: Vec<DocIndex>,
    load_failed: bool,
}

impl Core {
    fn new(options: Options) -> Self {
        let backend: Box<dyn StorageBackend> = match (&options.filename, options.in_memory_only) {
            (Some(path), false) => Box::new(FileBackend::new(path.clone())),
            _ => Box::new(MemoryBackend::new()),
        };
        let cmp = match options.compare_strings {
            Some(strings) => ValueComparator::with_string_cmp(strings),
            None => ValueComparator::new(),
        };
        let id_index = DocIndex::new(IndexSpec::field("_id").unique(), cmp.clone());
        Self {
            timestamp_data: options.timestamp_data,
            sync_on_write: options.sync_on_write,
            corrupt_alert_threshold: options.corrupt_alert_threshold,
            cmp,
            backend,
            docs: BTreeMap::new(),
            indexes: vec![id_index],
            load_failed: false,
        }
    }

    fn check_usable(&self) -> DbResult<()> {
        if self.load_failed {
            Err(DbError::NotLoaded)
        } else {
            Ok(())
        }
    }

    fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Load and persistence
    // ------------------------------------------------------------------

    fn load(&mut self) -> DbResult<()> {
        self.load_failed = false;
        if let Err(e) = self.load_inner() {
            self.load_failed = true;
            return Err(e);
        }
        Ok(())
    }

    fn load_inner(&mut self) -> DbResult<()> {
        self.backend.ensure_integrity()?;
        let state = persistence::load(&mut *self.backend, self.corrupt_alert_threshold)?;

        self.docs = state.docs;
        self.indexes = vec![DocIndex::new(
            IndexSpec::field("_id").unique(),
            self.cmp.clone(),
        )];
        for spec in state.indexes {
            self.indexes.push(DocIndex::new(spec, self.cmp.clone()));
        }

        let expired = self.expired_ids(self.docs.keys().cloned().collect());
        if !expired.is_empty() {
            debug!(count = expired.len(), "dropping expired documents at load");
            for id in &expired {
                self.docs.remove(id);
            }
        }

        let all: Vec<Value> = self.docs.values().cloned().collect();
        for index in &mut self.indexes {
            index.reset(&all)?;
        }

        let specs = self.index_specs();
        persistence::compact(&mut *self.backend, self.docs.values(), &specs)?;
        Ok(())
    }

    fn index_specs(&self) -> Vec<IndexSpec> {
        self.indexes
            .iter()
            .map(|index| index.spec().clone())
            .collect()
    }

    fn append(&mut self, events: &[LogEvent]) -> DbResult<()> {
        persistence::append_events(&mut *self.backend, events, self.sync_on_write)
    }

    fn compact_now(&mut self) -> DbResult<()> {
        self.check_usable()?;
        let specs = self.index_specs();
        persistence::compact(&mut *self.backend, self.docs.values(), &specs)
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    fn prepare_for_insert(&self, doc: &Value) -> DbResult<Value> {
        if !matches!(doc, Value::Map(_)) {
            return Err(DbError::invalid_update("only documents can be inserted"));
        }
        check_object(doc)?;

        let mut prepared = deep_copy(doc, false);
        let map = prepared.as_map_mut().ok_or_else(|| {
            DbError::invalid_update("only documents can be inserted")
        })?;
        match map.get("_id") {
            None => {
                map.insert("_id".to_string(), Value::String(generate_id()));
            }
            Some(Value::String(_)) => {}
            Some(_) => {
                return Err(DbError::invalid_update("a document's _id must be a string"));
            }
        }
        if self.timestamp_data {
            let now = Value::Date(Self::now_ms());
            map.entry("createdAt".to_string()).or_insert_with(|| now.clone());
            map.entry("updatedAt".to_string()).or_insert(now);
        }
        Ok(prepared)
    }

    fn insert_docs(&mut self, docs: Vec<Value>) -> DbResult<Vec<Value>> {
        self.check_usable()?;

        let mut prepared = Vec::with_capacity(docs.len());
        for doc in &docs {
            prepared.push(self.prepare_for_insert(doc)?);
        }

        // Stage across all indexes transactionally.
        for i in 0..self.indexes.len() {
            if let Err(e) = self.indexes[i].insert_many(&prepared) {
                for earlier in &mut self.indexes[..i] {
                    earlier.remove_many(&prepared);
                }
                return Err(e);
            }
        }

        for doc in &prepared {
            if let Some(id) = doc_id(doc) {
                self.docs.insert(id.to_string(), doc.clone());
            }
        }

        let events: Vec<LogEvent> = prepared.iter().cloned().map(LogEvent::Doc).collect();
        self.append(&events)?;
        Ok(prepared)
    }

    // ------------------------------------------------------------------
    // Candidate selection
    // ------------------------------------------------------------------

    fn index_for_field(&self, path: &str) -> Option<&DocIndex> {
        self.indexes
            .iter()
            .find(|index| index.spec().fields.len() == 1 && index.spec().fields[0] == path)
    }

    /// Picks the candidate id set for a query: equality lookups first, then
    /// `$in`, then range scans, then a full scan over the `_id` index.
    fn candidate_ids(&self, query: &Value) -> DbResult<Vec<String>> {
        let Value::Map(entries) = query else {
            return Err(DbError::invalid_query("query must be a document"));
        };

        for (path, operand) in entries {
            if path.starts_with('$') {
                continue;
            }
            let Some(index) = self.index_for_field(path) else {
                continue;
            };
            match operand {
                Value::Null
                | Value::Bool(_)
                | Value::Number(_)
                | Value::String(_)
                | Value::Date(_) => {
                    return Ok(index.get_matching(operand));
                }
                _ => {}
            }
        }

        for (path, operand) in entries {
            if path.starts_with('$') {
                continue;
            }
            let (Some(index), Some(Value::Array(values))) =
                (self.index_for_field(path), operand.get("$in"))
            else {
                continue;
            };
            return Ok(index.get_matching_many(values));
        }

        for (path, operand) in entries {
            if path.starts_with('$') {
                continue;
            }
            let (Some(index), Value::Map(ops)) = (self.index_for_field(path), operand) else {
                continue;
            };
            let bounds: BTreeMap<String, Value> = ops
                .iter()
                .filter(|(op, _)| matches!(op.as_str(), "$lt" | "$lte" | "$gt" | "$gte"))
                .map(|(op, v)| (op.clone(), v.clone()))
                .collect();
            if !bounds.is_empty() {
                return index.get_between_bounds(&Value::Map(bounds));
            }
        }

        Ok(self.indexes[0].get_all())
    }

    /// TTL indexes declared on this datastore.
    fn ttl_specs(&self) -> Vec<(String, i64)> {
        self.indexes
            .iter()
            .filter_map(|index| {
                let spec = index.spec();
                match (spec.fields.len(), spec.expire_after_seconds) {
                    (1, Some(seconds)) => Some((spec.fields[0].clone(), seconds)),
                    _ => None,
                }
            })
            .collect()
    }

    /// Which of the given documents have outlived a TTL index. Non-date
    /// fields never expire.
    fn expired_ids(&self, ids: Vec<String>) -> Vec<String> {
        let ttls = self.ttl_specs();
        if ttls.is_empty() {
            return Vec::new();
        }
        let now = Self::now_ms();
        ids.into_iter()
            .filter(|id| {
                let Some(doc) = self.docs.get(id) else {
                    return false;
                };
                ttls.iter().any(|(field, seconds)| {
                    matches!(
                        get_dotted(doc, field),
                        Some(Value::Date(ms)) if ms.saturating_add(seconds.saturating_mul(1000)) < now
                    )
                })
            })
            .collect()
    }

    /// Removes expired documents from state and the log; returns how many.
    fn expire(&mut self, ids: Vec<String>) -> DbResult<usize> {
        let expired = self.expired_ids(ids);
        if expired.is_empty() {
            return Ok(0);
        }
        warn!(count = expired.len(), "removing expired documents");
        let mut events = Vec::with_capacity(expired.len());
        for id in &expired {
            if let Some(doc) = self.docs.remove(id) {
                for index in &mut self.indexes {
                    index.remove(&doc);
                }
                events.push(LogEvent::Deleted(id.clone()));
            }
        }
        self.append(&events)?;
        Ok(expired.len())
    }

    fn get_candidates(&mut self, query: &Value) -> DbResult<Vec<Value>> {
        self.check_usable()?;
        let ids = self.candidate_ids(query)?;
        self.expire(ids.clone())?;
        Ok(ids
            .into_iter()
            .filter_map(|id| self.docs.get(&id).cloned())
            .collect())
    }

    fn sweep_expired(&mut self) -> DbResult<usize> {
        self.check_usable()?;
        let all = self.docs.keys().cloned().collect();
        self.expire(all)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    fn matching_docs(
        &mut self,
        query: &Value,
        stop_after: Option<usize>,
    ) -> DbResult<Vec<Value>> {
        let candidates = self.get_candidates(query)?;
        let matcher = Matcher::new(&self.cmp);
        let mut matched = Vec::new();
        for candidate in candidates {
            if matcher.matches(&candidate, query)? {
                matched.push(candidate);
                if stop_after.is_some_and(|n| matched.len() >= n) {
                    break;
                }
            }
        }
        Ok(matched)
    }

    fn count(&mut self, query: &Value) -> DbResult<usize> {
        Ok(self.matching_docs(query, None)?.len())
    }

    fn run_query(&mut self, plan: QueryPlan) -> DbResult<Vec<Value>> {
        self.check_usable()?;

        let candidates = self.get_candidates(&plan.query)?;
        let matcher = Matcher::new(&self.cmp);

        // Without a sort, skip/limit bound the candidate traversal itself.
        let traversal_cap = match (&plan.sort, plan.limit) {
            (None, Some(limit)) => Some(plan.skip.unwrap_or(0) + limit),
            _ => None,
        };

        let mut matched = Vec::new();
        for candidate in candidates {
            if !matcher.matches(&candidate, &plan.query)? {
                continue;
            }
            if let Some(pred) = &plan.where_pred {
                if !pred(&candidate) {
                    continue;
                }
            }
            matched.push(candidate);
            if traversal_cap.is_some_and(|cap| matched.len() >= cap) {
                break;
            }
        }

        if let Some(sort) = &plan.sort {
            for (_, direction) in sort {
                if *direction != 1 && *direction != -1 {
                    return Err(DbError::invalid_query("sort direction must be 1 or -1"));
                }
            }
            let cmp = self.cmp.clone();
            matched.sort_by(|a, b| {
                for (path, direction) in sort {
                    let va = get_dotted(a, path);
                    let vb = get_dotted(b, path);
                    let ord = cmp.compare_opt(va.as_ref(), vb.as_ref());
                    if ord != Ordering::Equal {
                        return if *direction == 1 { ord } else { ord.reverse() };
                    }
                }
                Ordering::Equal
            });
        }

        let skip = plan.skip.unwrap_or(0).min(matched.len());
        let mut results: Vec<Value> = matched.split_off(skip);
        if let Some(limit) = plan.limit {
            results.truncate(limit);
        }

        if let Some(projection) = &plan.projection {
            let mut projected = Vec::with_capacity(results.len());
            for result in &results {
                projected.push(crate::projection::project(result, projection)?);
            }
            results = projected;
        }
        Ok(results)
    }

    fn get_all_docs(&mut self) -> DbResult<Vec<Value>> {
        self.check_usable()?;
        Ok(self.indexes[0]
            .get_all()
            .into_iter()
            .filter_map(|id| self.docs.get(&id).cloned())
            .collect())
    }

    // ------------------------------------------------------------------
    // Update and remove
    // ------------------------------------------------------------------

    fn update_docs(
        &mut self,
        query: &Value,
        update_expr: &Value,
        options: UpdateOptions,
    ) -> DbResult<UpdateResult> {
        self.check_usable()?;

        let stop_after = if options.multi { None } else { Some(1) };
        let matched = self.matching_docs(query, stop_after)?;

        if matched.is_empty() {
            if !options.upsert {
                return Ok(UpdateResult::default());
            }
            return self.upsert(query, update_expr, options);
        }

        let now = Self::now_ms();
        let mut pairs: Vec<(Value, Value)> = Vec::with_capacity(matched.len());
        for old in matched {
            let mut new = update::modify(&old, update_expr, query, &self.cmp)?;
            if self.timestamp_data {
                if let Some(map) = new.as_map_mut() {
                    if let Some(created) = old.get("createdAt") {
                        map.insert("createdAt".to_string(), created.clone());
                    }
                    map.insert("updatedAt".to_string(), Value::Date(now));
                }
            }
            check_object(&new)?;
            pairs.push((old, new));
        }

        // Stage the replacement across all indexes transactionally.
        for i in 0..self.indexes.len() {
            if let Err(e) = self.indexes[i].update_many(&pairs) {
                for earlier in &mut self.indexes[..i] {
                    if earlier.revert_update_many(&pairs).is_err() {
                        warn!(index = %earlier.spec().name(), "index revert failed");
                    }
                }
                return Err(e);
            }
        }

        for (_, new) in &pairs {
            if let Some(id) = doc_id(new) {
                self.docs.insert(id.to_string(), new.clone());
            }
        }

        let events: Vec<LogEvent> = pairs
            .iter()
            .map(|(_, new)| LogEvent::Doc(new.clone()))
            .collect();
        self.append(&events)?;

        Ok(UpdateResult {
            num_affected: pairs.len(),
            upserted: None,
            updated_docs: options
                .return_updated_docs
                .then(|| pairs.into_iter().map(|(_, new)| new).collect()),
        })
    }

    fn upsert(
        &mut self,
        query: &Value,
        update_expr: &Value,
        options: UpdateOptions,
    ) -> DbResult<UpdateResult> {
        let has_modifiers = update_expr
            .as_map()
            .is_some_and(|m| m.keys().any(|k| k.starts_with('$')));

        let to_insert = if has_modifiers {
            // Seed the document with the query's plain equality fields.
            let base = deep_copy(query, true);
            update::modify(&base, update_expr, query, &self.cmp)?
        } else {
            update_expr.clone()
        };

        let mut inserted = self.insert_docs(vec![to_insert])?;
        let doc = inserted.remove(0);
        Ok(UpdateResult {
            num_affected: 1,
            updated_docs: options.return_updated_docs.then(|| vec![doc.clone()]),
            upserted: Some(doc),
        })
    }

    fn remove_docs(&mut self, query: &Value, multi: bool) -> DbResult<usize> {
        self.check_usable()?;

        let stop_after = if multi { None } else { Some(1) };
        let matched = self.matching_docs(query, stop_after)?;

        let mut events = Vec::with_capacity(matched.len());
        for doc in &matched {
            for index in &mut self.indexes {
                index.remove(doc);
            }
            if let Some(id) = doc_id(doc) {
                self.docs.remove(id);
                events.push(LogEvent::Deleted(id.to_string()));
            }
        }
        self.append(&events)?;
        Ok(matched.len())
    }

    // ------------------------------------------------------------------
    // Index management
    // ------------------------------------------------------------------

    fn ensure_index(&mut self, spec: IndexSpec) -> DbResult<()> {
        self.check_usable()?;

        if spec.fields.is_empty() {
            return Err(DbError::invalid_query("an index needs at least one field"));
        }
        if let Some(existing) = self
            .indexes
            .iter()
            .find(|index| index.spec().name() == spec.name())
        {
            if *existing.spec() == spec || spec.fields == ["_id"] {
                return Ok(());
            }
            return Err(DbError::invalid_query(format!(
                "index {} already exists with different options",
                spec.name()
            )));
        }

        let mut index = DocIndex::new(spec.clone(), self.cmp.clone());
        let all: Vec<Value> = self.docs.values().cloned().collect();
        index.insert_many(&all)?;
        self.indexes.push(index);

        self.append(&[LogEvent::IndexCreated(spec)])?;
        Ok(())
    }

    fn remove_index(&mut self, name: &str) -> DbResult<()> {
        self.check_usable()?;
        if name == "_id" {
            return Err(DbError::invalid_query("the _id index cannot be removed"));
        }
        self.indexes.retain(|index| index.spec().name() != name);
        self.append(&[LogEvent::IndexRemoved(name.to_string())])?;
        Ok(())
    }
}
