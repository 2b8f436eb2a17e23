//! A single collection: row store, vector index and their shared log.
//!
//! Lifecycle is `CREATED -> LOADED <-> UNLOADED`, with `DROPPED` terminal.
//! Row data and vectors change together: every insert or delete is first
//! appended to the collection WAL and then applied to both stores under the
//! collection's write lock. Embedding happens before that lock is taken, so a
//! slow provider never blocks readers, and a cancelled insert is dropped
//! before anything is applied.

pub mod record;
pub mod rows;
pub mod snapshot;
pub mod wal;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::QuiverConfig;
use crate::embedding::EmbeddingGateway;
use crate::error::{InsertError, QuiverError, Result, SchemaError, SearchError, StateError};
use crate::schema::{CollectionDefinition, CollectionSchema, DataType, FieldValue, IndexParams};
use crate::storage::Storage;
use crate::vector::{IndexKind, VectorIndex};

pub use record::{Fields, Record, Row, SearchHit};
pub use rows::RowStore;
pub use snapshot::{CollectionManifest, CollectionSnapshot, SnapshotRecord};
pub use wal::{CollectionWal, WalPayload, WalRecord};

pub use snapshot::MANIFEST_FILE;

use snapshot::SNAPSHOT_FILE;
use wal::WAL_FILE;

/// Lifecycle state of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionState {
    Created,
    Loaded,
    Unloaded,
    Dropped,
}

impl fmt::Display for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectionState::Created => "CREATED",
            CollectionState::Loaded => "LOADED",
            CollectionState::Unloaded => "UNLOADED",
            CollectionState::Dropped => "DROPPED",
        };
        f.write_str(name)
    }
}

/// Summary returned by [`Collection::describe`].
#[derive(Debug, Clone, Serialize)]
pub struct CollectionDescription {
    pub name: String,
    pub schema: CollectionSchema,
    pub index: IndexParams,
    pub state: CollectionState,
    pub row_count: usize,
    /// `"flat"` or `"hnsw"` while loaded.
    pub search_structure: Option<&'static str>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where the vector of a pending row comes from.
enum VectorSource {
    Given(Vec<f32>),
    Embed(String),
}

/// A row that passed schema validation.
struct PendingRow {
    id: String,
    fields: Fields,
    source: VectorSource,
}

struct CollectionInner {
    state: CollectionState,
    rows: RowStore,
    index: VectorIndex,
    wal: CollectionWal,
    manifest: CollectionManifest,
}

impl CollectionInner {
    fn ensure_live(&self, name: &str) -> Result<()> {
        if self.state == CollectionState::Dropped {
            return Err(StateError::AlreadyDropped(name.to_string()).into());
        }
        Ok(())
    }

    fn ensure_loaded(&self, name: &str) -> Result<()> {
        self.ensure_live(name)?;
        if self.state != CollectionState::Loaded {
            return Err(StateError::NotLoaded(name.to_string()).into());
        }
        Ok(())
    }

    /// Apply a logged change to both stores.
    fn apply(&mut self, payload: WalPayload) -> Result<()> {
        match payload {
            WalPayload::Upsert { records } => {
                for record in records {
                    let vector: Arc<[f32]> = record.vector.into();
                    self.index.add(record.primary_key.as_str(), Arc::clone(&vector))?;
                    self.rows.put(record.primary_key, record.fields, vector);
                }
            }
            WalPayload::Delete { ids } => {
                for id in ids {
                    self.index.remove(&id);
                    self.rows.delete(&id);
                }
            }
        }
        Ok(())
    }

    fn set_state(&mut self, state: CollectionState, storage: &dyn Storage) -> Result<()> {
        let mut manifest = self.manifest.clone();
        manifest.state = state;
        manifest.write(storage)?;
        self.manifest = manifest;
        self.state = state;
        Ok(())
    }

    /// Fold every logged change into a fresh snapshot and empty the WAL.
    fn compact(&mut self, storage: &dyn Storage) -> Result<()> {
        let records: Vec<SnapshotRecord> = self
            .index
            .entries_in_order()
            .into_iter()
            .filter_map(|(id, seq, _)| self.rows.get(id).map(|record| SnapshotRecord { seq, record }))
            .collect();
        let snapshot = CollectionSnapshot {
            last_wal_seq: self.wal.last_seq(),
            records,
        };
        snapshot.write(storage)?;

        let mut manifest = self.manifest.clone();
        manifest.snapshot_wal_seq = snapshot.last_wal_seq;
        manifest.write(storage)?;
        self.manifest = manifest;

        let folded = self.wal.len();
        self.wal.truncate()?;
        debug!(
            "compacted {folded} WAL records into a snapshot of {} rows",
            snapshot.records.len()
        );
        Ok(())
    }
}

/// Drops an unfinished load plan when a load ends without installing it.
struct AbandonLoad<'a> {
    inner: &'a RwLock<CollectionInner>,
    epoch: u64,
}

impl Drop for AbandonLoad<'_> {
    fn drop(&mut self) {
        self.inner.write().index.abandon_load(self.epoch);
    }
}

/// One named collection.
///
/// Cheap operations take the internal lock synchronously; the ones that may
/// wait on the embedding provider or on an index build are `async`.
pub struct Collection {
    definition: Arc<CollectionDefinition>,
    storage: Arc<dyn Storage>,
    gateway: Option<EmbeddingGateway>,
    compaction_threshold: usize,
    inner: RwLock<CollectionInner>,
    /// Serializes load and unload.
    load_gate: tokio::sync::Mutex<()>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Collection")
            .field("name", &self.definition.name)
            .field("state", &inner.state)
            .field("rows", &inner.rows.len())
            .finish()
    }
}

impl Collection {
    /// Create a new, empty collection in `storage`.
    ///
    /// `gateway` must be present when the schema binds an embedding function.
    pub fn create(
        definition: Arc<CollectionDefinition>,
        storage: Arc<dyn Storage>,
        gateway: Option<EmbeddingGateway>,
        config: &QuiverConfig,
    ) -> Result<Self> {
        // leftovers of an interrupted drop
        storage.delete_file(SNAPSHOT_FILE)?;
        storage.delete_file(WAL_FILE)?;

        let mut manifest = CollectionManifest::new(definition.as_ref().clone());
        manifest.write(storage.as_ref())?;
        let (wal, _) = CollectionWal::open(Arc::clone(&storage), 0)?;

        info!("created collection '{}'", definition.name);
        Ok(Self::assemble(
            definition,
            storage,
            gateway,
            config,
            CollectionInner {
                state: CollectionState::Created,
                rows: RowStore::new(),
                index: empty_index(&manifest.definition, config),
                wal,
                manifest,
            },
        ))
    }

    /// Rebuild a collection from its manifest, snapshot and WAL.
    ///
    /// A collection that was loaded comes back unloaded; callers decide
    /// whether to load it again.
    pub fn recover(
        manifest: CollectionManifest,
        storage: Arc<dyn Storage>,
        gateway: Option<EmbeddingGateway>,
        config: &QuiverConfig,
    ) -> Result<Self> {
        let definition = Arc::new(manifest.definition.clone());
        let snapshot = CollectionSnapshot::read(storage.as_ref())?;
        if snapshot.last_wal_seq != manifest.snapshot_wal_seq {
            debug!(
                "'{}': snapshot covers WAL up to {}, manifest says {}",
                definition.name, snapshot.last_wal_seq, manifest.snapshot_wal_seq
            );
        }

        let mut rows = RowStore::new();
        let mut index = empty_index(&definition, config);
        for SnapshotRecord { seq, record } in snapshot.records {
            let vector: Arc<[f32]> = record.vector.into();
            index.restore(record.primary_key.as_str(), seq, Arc::clone(&vector))?;
            rows.put(record.primary_key, record.fields, vector);
        }

        let (wal, pending) = CollectionWal::open(Arc::clone(&storage), snapshot.last_wal_seq)?;
        let state = match manifest.state {
            CollectionState::Created => CollectionState::Created,
            CollectionState::Loaded | CollectionState::Unloaded => CollectionState::Unloaded,
            CollectionState::Dropped => {
                return Err(QuiverError::storage(format!(
                    "collection '{}' was dropped",
                    definition.name
                )));
            }
        };
        let mut inner = CollectionInner {
            state,
            rows,
            index,
            wal,
            manifest,
        };
        let replayed = pending.len();
        for record in pending {
            inner.apply(record.payload)?;
        }

        info!(
            "recovered collection '{}': {} rows, {replayed} WAL records replayed",
            definition.name,
            inner.rows.len()
        );
        Ok(Self::assemble(definition, storage, gateway, config, inner))
    }

    fn assemble(
        definition: Arc<CollectionDefinition>,
        storage: Arc<dyn Storage>,
        gateway: Option<EmbeddingGateway>,
        config: &QuiverConfig,
        inner: CollectionInner,
    ) -> Self {
        if gateway.is_none()
            && let Some(function) = definition.schema.embedding_function()
        {
            warn!(
                "collection '{}': no embedder for {}/{}; inserts and text search will fail",
                definition.name, function.params.provider, function.params.model_name
            );
        }
        Collection {
            definition,
            storage,
            gateway,
            compaction_threshold: config.wal_compaction_threshold,
            inner: RwLock::new(inner),
            load_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<CollectionDefinition> {
        &self.definition
    }

    pub fn state(&self) -> CollectionState {
        self.inner.read().state
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn describe(&self) -> Result<CollectionDescription> {
        let inner = self.inner.read();
        inner.ensure_live(self.name())?;
        Ok(CollectionDescription {
            name: self.definition.name.clone(),
            schema: self.definition.schema.clone(),
            index: self.definition.index.clone(),
            state: inner.state,
            row_count: inner.rows.len(),
            search_structure: inner.index.loaded().map(|loaded| {
                if loaded.uses_graph() { "hnsw" } else { "flat" }
            }),
            created_at: inner.manifest.created_at,
            updated_at: inner.manifest.updated_at,
        })
    }

    /// Insert or replace one row.
    pub async fn insert(&self, row: Row) -> Result<()> {
        self.insert_many(vec![row]).await.map(|_| ())
    }

    /// Insert or replace several rows with one embedding request.
    ///
    /// Either every row is applied or none is. Returns the number of rows
    /// written. A later row with the same id replaces an earlier one.
    pub async fn insert_many(&self, rows: Vec<Row>) -> Result<usize> {
        self.inner.read().ensure_live(self.name())?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id.clone();
            pending.push(
                self.validate_row(row)
                    .map_err(|err| InsertError::new(id, err))?,
            );
        }

        let vectors = self.resolve_vectors(&mut pending).await?;
        let records: Vec<Record> = pending
            .into_iter()
            .zip(vectors)
            .map(|(row, vector)| Record {
                primary_key: row.id,
                fields: row.fields,
                vector,
            })
            .collect();

        let mut inner = self.inner.write();
        inner.ensure_live(self.name())?;
        for record in &records {
            inner
                .index
                .check(&record.primary_key, &record.vector)
                .map_err(|err| InsertError::new(record.primary_key.as_str(), err))?;
        }

        let written = records.len();
        let first_id = records[0].primary_key.clone();
        let payload = WalPayload::Upsert { records };
        inner
            .wal
            .append(&payload)
            .map_err(|err| InsertError::new(first_id, err))?;
        inner.apply(payload)?;
        self.maybe_compact(&mut inner);
        debug!("inserted {written} rows into '{}'", self.name());
        Ok(written)
    }

    /// Embed every row whose vector comes from the embedding function.
    async fn resolve_vectors(&self, pending: &mut [PendingRow]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<&str> = pending
            .iter()
            .filter_map(|row| match &row.source {
                VectorSource::Embed(text) => Some(text.as_str()),
                VectorSource::Given(_) => None,
            })
            .collect();

        let mut embedded = if texts.is_empty() {
            Vec::new().into_iter()
        } else {
            let first_id = pending
                .iter()
                .find(|row| matches!(row.source, VectorSource::Embed(_)))
                .map(|row| row.id.clone())
                .unwrap_or_default();
            let gateway = self
                .gateway()
                .map_err(|err| InsertError::new(first_id.as_str(), err))?;
            gateway
                .embed_batch(&texts)
                .await
                .map_err(|err| InsertError::new(first_id, err))?
                .into_iter()
        };

        let mut vectors = Vec::with_capacity(pending.len());
        for row in pending.iter_mut() {
            let vector = match &mut row.source {
                VectorSource::Given(vector) => std::mem::take(vector),
                VectorSource::Embed(_) => embedded.next().unwrap_or_default(),
            };
            vectors.push(vector);
        }
        Ok(vectors)
    }

    fn validate_row(&self, row: Row) -> std::result::Result<PendingRow, SchemaError> {
        let schema = &self.definition.schema;
        let primary = self.definition.primary_field();
        let vector_field = self.definition.vector_field();

        if row.id.is_empty() {
            return Err(SchemaError::invalid_field(&primary.name, "primary key is empty"));
        }
        let primary_value = match primary.data_type {
            DataType::Int64 => FieldValue::Int64(row.id.parse().map_err(|_| {
                SchemaError::invalid_field(&primary.name, format!("'{}' is not an INT64", row.id))
            })?),
            _ => FieldValue::VarChar(row.id.clone()),
        };
        let primary_value = primary.check_value(primary_value)?;

        let mut supplied = row.fields;
        if let Some(name) = supplied.keys().find(|name| schema.field(name).is_none()) {
            return Err(SchemaError::invalid_field(name.as_str(), "not declared in the schema"));
        }

        let mut fields = Fields::new();
        if let Some(value) = supplied.remove(&primary.name) {
            if value != primary_value {
                return Err(SchemaError::invalid_field(&primary.name, "primary value mismatch"));
            }
            fields.insert(primary.name.clone(), value);
        }
        let given_vector = supplied.remove(&vector_field.name);

        for field in &schema.fields {
            if field.is_primary || field.is_vector() {
                continue;
            }
            let value = supplied
                .remove(&field.name)
                .ok_or_else(|| SchemaError::invalid_field(&field.name, "missing value"))?;
            fields.insert(field.name.clone(), field.check_value(value)?);
        }

        let source = match (schema.embedding_function(), given_vector) {
            (Some(function), Some(_)) => {
                return Err(SchemaError::invalid_field(
                    &vector_field.name,
                    format!("filled in by function '{}'", function.name),
                ));
            }
            (Some(function), None) => {
                let text = fields
                    .get(&function.input_field)
                    .and_then(FieldValue::as_str)
                    .unwrap_or_default();
                if text.trim().is_empty() {
                    return Err(SchemaError::invalid_field(
                        &function.input_field,
                        "embedding input is empty",
                    ));
                }
                VectorSource::Embed(text.to_string())
            }
            (None, Some(value)) => VectorSource::Given(value.into_vector().ok_or_else(|| {
                SchemaError::invalid_field(&vector_field.name, "expected FLOAT_VECTOR")
            })?),
            (None, None) => {
                return Err(SchemaError::invalid_field(&vector_field.name, "missing value"));
            }
        };

        Ok(PendingRow {
            id: row.id,
            fields,
            source,
        })
    }

    /// Delete rows by primary key. Missing ids are ignored; returns how many
    /// rows were removed.
    pub fn delete<S: AsRef<str>>(&self, ids: &[S]) -> Result<usize> {
        let mut inner = self.inner.write();
        inner.ensure_live(self.name())?;
        let mut seen = AHashSet::new();
        let present: Vec<String> = ids
            .iter()
            .map(|id| id.as_ref())
            .filter(|&id| inner.rows.contains(id) && seen.insert(id))
            .map(str::to_string)
            .collect();
        if present.is_empty() {
            return Ok(0);
        }

        let removed = present.len();
        let first_id = present[0].clone();
        let payload = WalPayload::Delete { ids: present };
        inner
            .wal
            .append(&payload)
            .map_err(|err| InsertError::new(first_id, err))?;
        inner.apply(payload)?;
        self.maybe_compact(&mut inner);
        debug!("deleted {removed} rows from '{}'", self.name());
        Ok(removed)
    }

    /// Fetch rows by primary key, in the order asked; missing ids are `None`.
    pub fn get<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Option<Record>>> {
        let inner = self.inner.read();
        inner.ensure_live(self.name())?;
        Ok(inner.rows.get_many(ids))
    }

    /// Embed `query` and return the `k` nearest rows, best first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.inner.read().ensure_loaded(self.name())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let function = self.definition.schema.embedding_function().ok_or_else(|| {
            SearchError::new(
                query,
                SchemaError::invalid_field(
                    &self.definition.vector_field().name,
                    "no embedding function bound; search by vector instead",
                ),
            )
        })?;
        let gateway = self.gateway().map_err(|err| SearchError::new(query, err))?;
        let started = Instant::now();
        let vector = gateway
            .embed(query)
            .await
            .map_err(|err| SearchError::new(query, err))?;
        debug!(
            "embedded query for '{}' via '{}' in {:?}",
            self.name(),
            function.name,
            started.elapsed()
        );

        self.search_embedded(&vector, k)
            .map_err(|err| wrap_search_error(query, err))
    }

    /// Return the `k` rows nearest to `vector`, best first.
    pub fn search_vector(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.search_embedded(vector, k)
            .map_err(|err| wrap_search_error(&format!("<vector of {}>", vector.len()), err))
    }

    fn search_embedded(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let inner = self.inner.read();
        inner.ensure_loaded(self.name())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let scored = inner.index.search(vector, k)?;
        let ids: Vec<&str> = scored.iter().map(|hit| hit.id.as_str()).collect();
        let records = inner.rows.get_many(&ids);
        Ok(scored
            .iter()
            .zip(records)
            .filter_map(|(hit, record)| {
                record.map(|record| SearchHit {
                    id: hit.id.clone(),
                    distance: hit.distance,
                    record,
                })
            })
            .collect())
    }

    /// Build the search structure and move to LOADED.
    ///
    /// The build runs on the blocking pool; searches keep using the previous
    /// structure, if any, until the new one is swapped in. Loading a loaded
    /// collection rebuilds it.
    pub async fn load(&self) -> Result<()> {
        let _gate = self.load_gate.lock().await;
        let plan = {
            let mut inner = self.inner.write();
            inner.ensure_live(self.name())?;
            inner.index.prepare_load()
        };

        // clears the tracked changes if this future is dropped or fails
        // before the structure is installed
        let _abandon = AbandonLoad {
            inner: &self.inner,
            epoch: plan.epoch(),
        };

        let started = Instant::now();
        let vectors = plan.len();
        let loaded = tokio::task::spawn_blocking(move || plan.build())
            .await
            .map_err(|err| QuiverError::internal(format!("index build panicked: {err}")))?;
        let structure = if loaded.uses_graph() { "hnsw" } else { "flat" };

        let mut inner = self.inner.write();
        inner.ensure_live(self.name())?;
        if !inner.index.install(loaded) {
            return Err(QuiverError::internal(format!(
                "index build for '{}' was superseded",
                self.name()
            )));
        }
        inner.set_state(CollectionState::Loaded, self.storage.as_ref())?;
        info!(
            "loaded collection '{}' ({vectors} vectors, {structure}) in {:?}",
            self.name(),
            started.elapsed()
        );
        Ok(())
    }

    /// Release the search structure. Does nothing unless loaded.
    pub async fn unload(&self) -> Result<()> {
        let _gate = self.load_gate.lock().await;
        let mut inner = self.inner.write();
        inner.ensure_live(self.name())?;
        if inner.state != CollectionState::Loaded {
            debug!("'{}' is {}; nothing to unload", self.name(), inner.state);
            return Ok(());
        }
        inner.index.unload();
        inner.set_state(CollectionState::Unloaded, self.storage.as_ref())?;
        info!("unloaded collection '{}'", self.name());
        Ok(())
    }

    /// Delete all persisted data and move to DROPPED.
    pub fn drop_collection(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_live(self.name())?;

        // without a manifest the directory is no longer a collection
        self.storage.delete_file(MANIFEST_FILE)?;
        for file in self.storage.list_files()? {
            self.storage.delete_file(&file)?;
        }

        inner.state = CollectionState::Dropped;
        inner.rows.clear();
        let kind = inner.index.kind().clone();
        inner.index = VectorIndex::build(inner.index.dim(), inner.index.metric(), kind);
        info!("dropped collection '{}'", self.name());
        Ok(())
    }

    /// Fold the WAL into the snapshot now.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_live(self.name())?;
        inner.compact(self.storage.as_ref())
    }

    fn maybe_compact(&self, inner: &mut CollectionInner) {
        if inner.wal.len() < self.compaction_threshold {
            return;
        }
        if let Err(err) = inner.compact(self.storage.as_ref()) {
            warn!("WAL compaction of '{}' failed: {err}", self.name());
        }
    }

    fn gateway(&self) -> std::result::Result<&EmbeddingGateway, SchemaError> {
        self.gateway.as_ref().ok_or_else(|| {
            let (provider, model) = self
                .definition
                .schema
                .embedding_function()
                .map(|f| (f.params.provider.clone(), f.params.model_name.clone()))
                .unwrap_or_default();
            SchemaError::UnsupportedProvider { provider, model }
        })
    }
}

fn empty_index(definition: &CollectionDefinition, config: &QuiverConfig) -> VectorIndex {
    VectorIndex::build(
        definition.dim(),
        definition.index.metric_type,
        IndexKind::from_params(&definition.index, config),
    )
}

/// State errors pass through; anything else gets the query attached.
fn wrap_search_error(query: &str, err: QuiverError) -> QuiverError {
    match err {
        QuiverError::State(_) => err,
        other => SearchError::new(query, other).into(),
    }
}
