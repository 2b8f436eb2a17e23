//! Collection manager: the administrative and data surface of the engine.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use quiver::client::CollectionManager;
//! use quiver::config::QuiverConfig;
//! use quiver::embedding::{EmbedderRegistry, HashingEmbedder};
//! use quiver::schema::{DataType, EmbeddingFunction, FieldOptions, IndexType, MetricType};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let embedders = EmbedderRegistry::new();
//! embedders.register("local", "hashing", Arc::new(HashingEmbedder::new(8)));
//! let manager = CollectionManager::open(QuiverConfig::default(), embedders).await.unwrap();
//!
//! let mut schema = CollectionManager::create_schema();
//! schema
//!     .add_field("id", DataType::VarChar, FieldOptions::new().primary().max_length(64))
//!     .add_field("content", DataType::VarChar, FieldOptions::new().max_length(1024))
//!     .add_field("dense", DataType::FloatVector, FieldOptions::new().dim(8))
//!     .add_function(EmbeddingFunction::text_embedding(
//!         "embed", "content", "dense", "local", "hashing",
//!     ));
//! let mut index_params = CollectionManager::prepare_index_params();
//! index_params.add_index("dense", IndexType::AutoIndex, MetricType::Cosine);
//!
//! manager.create_collection("docs", &schema, &index_params).unwrap();
//! manager.insert("docs", "a", [("content", "hello there")]).await.unwrap();
//! manager.load_collection("docs").await.unwrap();
//!
//! let hits = manager.search("docs", "hello there", 1).await.unwrap();
//! assert_eq!(hits[0].id, "a");
//! # });
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;

use crate::collection::{
    Collection, CollectionDescription, CollectionManifest, CollectionState, MANIFEST_FILE, Record,
    Row, SearchHit,
};
use crate::config::{QuiverConfig, StorageBackend};
use crate::embedding::{EmbedderRegistry, EmbeddingGateway};
use crate::error::{Result, SchemaError, StateError};
use crate::schema::{
    CollectionDefinition, CollectionSchema, FieldValue, IndexParamsBuilder, SchemaRegistry,
};
use crate::storage::{FileStorage, MemoryStorage, NamespacedStorage, Storage, StorageConfig};

/// Owns every collection of one data directory (or of one in-memory store).
///
/// The manager is `Send + Sync`; share it behind an `Arc`.
#[derive(Debug)]
pub struct CollectionManager {
    config: QuiverConfig,
    storage: Arc<dyn Storage>,
    embedders: EmbedderRegistry,
    schemas: SchemaRegistry,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl CollectionManager {
    /// Open the configured storage and recover every collection in it.
    ///
    /// Collections that were loaded when last persisted are loaded again if
    /// `restore_loaded_state` is set.
    pub async fn open(config: QuiverConfig, embedders: EmbedderRegistry) -> Result<Self> {
        config.validate()?;
        let storage: Arc<dyn Storage> = match &config.storage {
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
            StorageBackend::File(dir) => Arc::new(FileStorage::new(dir, StorageConfig::default())?),
        };
        Self::with_storage(config, embedders, storage).await
    }

    /// Like [`open`](Self::open), over an explicit storage root.
    pub async fn with_storage(
        config: QuiverConfig,
        embedders: EmbedderRegistry,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        config.validate()?;
        let manager = CollectionManager {
            schemas: SchemaRegistry::new(config.schema_limits.clone()).with_hnsw(config.hnsw.clone()),
            config,
            storage,
            embedders,
            collections: RwLock::new(HashMap::new()),
        };

        let mut reload = Vec::new();
        for name in manager.discover()? {
            let storage = manager.collection_storage(&name);
            let manifest = CollectionManifest::read(storage.as_ref())?;
            if manifest.definition.name != name {
                warn!(
                    "skipping '{name}': manifest belongs to '{}'",
                    manifest.definition.name
                );
                continue;
            }
            let was_loaded = manifest.state == CollectionState::Loaded;
            let definition = manager.schemas.restore(manifest.definition.clone())?;
            let gateway = manager.gateway_for(&definition).ok().flatten();
            let collection = Collection::recover(manifest, storage, gateway, &manager.config)?;

            let collection = Arc::new(collection);
            manager
                .collections
                .write()
                .insert(name.clone(), Arc::clone(&collection));
            if was_loaded && manager.config.restore_loaded_state {
                reload.push(collection);
            }
        }

        for collection in reload {
            collection.load().await?;
        }
        info!(
            "collection manager opened with {} collections",
            manager.collections.read().len()
        );
        Ok(manager)
    }

    /// Collection names that have a manifest in the root storage.
    fn discover(&self) -> Result<Vec<String>> {
        NamespacedStorage::discover(self.storage.as_ref(), MANIFEST_FILE)
    }

    fn collection_storage(&self, name: &str) -> Arc<dyn Storage> {
        Arc::new(NamespacedStorage::new(Arc::clone(&self.storage), name))
    }

    /// Gateway for the definition's embedding function, if it binds one.
    fn gateway_for(
        &self,
        definition: &CollectionDefinition,
    ) -> std::result::Result<Option<EmbeddingGateway>, SchemaError> {
        let Some(function) = definition.schema.embedding_function() else {
            return Ok(None);
        };
        let embedder = self.embedders.resolve_function(function, definition.dim())?;
        Ok(Some(EmbeddingGateway::new(embedder, self.config.retry.clone())))
    }

    pub fn config(&self) -> &QuiverConfig {
        &self.config
    }

    pub fn embedders(&self) -> &EmbedderRegistry {
        &self.embedders
    }

    /// Start an empty schema.
    pub fn create_schema() -> CollectionSchema {
        CollectionSchema::new()
    }

    /// Start an empty set of index declarations.
    pub fn prepare_index_params() -> IndexParamsBuilder {
        IndexParamsBuilder::new()
    }

    /// Validate and create a collection. Nothing is created if validation
    /// fails.
    pub fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
        index_params: &IndexParamsBuilder,
    ) -> Result<()> {
        let gateway = match schema.embedding_function() {
            Some(function) => {
                let dim = schema
                    .field(&function.output_field)
                    .and_then(|field| field.dim)
                    .unwrap_or_default();
                let embedder = self.embedders.resolve_function(function, dim)?;
                Some(EmbeddingGateway::new(embedder, self.config.retry.clone()))
            }
            None => None,
        };
        let provider_dim = gateway.as_ref().map(EmbeddingGateway::dimension);
        let definition = self.schemas.define(name, schema, index_params, provider_dim)?;

        let collection =
            match Collection::create(definition, self.collection_storage(name), gateway, &self.config) {
                Ok(collection) => collection,
                Err(err) => {
                    self.schemas.remove(name);
                    return Err(err);
                }
            };
        self.collections
            .write()
            .insert(name.to_string(), Arc::new(collection));
        Ok(())
    }

    /// Handle to a live collection.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StateError::CollectionNotFound(name.to_string()).into())
    }

    pub async fn load_collection(&self, name: &str) -> Result<()> {
        self.collection(name)?.load().await
    }

    /// Release a collection's search structure; a no-op unless loaded.
    pub async fn unload_collection(&self, name: &str) -> Result<()> {
        self.collection(name)?.unload().await
    }

    /// Insert or replace the row `id` in collection `name`.
    pub async fn insert<K, V>(
        &self,
        name: &str,
        id: impl Into<String>,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Result<()>
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let row = fields
            .into_iter()
            .fold(Row::new(id), |row, (key, value)| row.with(key, value));
        self.collection(name)?.insert(row).await
    }

    /// Insert or replace several rows with a single embedding request.
    pub async fn insert_many(&self, name: &str, rows: Vec<Row>) -> Result<usize> {
        self.collection(name)?.insert_many(rows).await
    }

    pub fn delete<S: AsRef<str>>(&self, name: &str, ids: &[S]) -> Result<usize> {
        self.collection(name)?.delete(ids)
    }

    pub fn get<S: AsRef<str>>(&self, name: &str, ids: &[S]) -> Result<Vec<Option<Record>>> {
        self.collection(name)?.get(ids)
    }

    pub async fn search(&self, name: &str, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.collection(name)?.search(query, k).await
    }

    pub fn search_vector(&self, name: &str, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.collection(name)?.search_vector(vector, k)
    }

    /// Drop a collection and delete its data. Handles obtained earlier report
    /// `AlreadyDropped` from then on.
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let collection = self.collection(name)?;
        collection.drop_collection()?;
        self.collections.write().remove(name);
        self.schemas.remove(name);
        Ok(())
    }

    /// Names of all collections, sorted.
    pub fn list_collections(&self) -> Vec<String> {
        self.schemas.names()
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    pub fn describe_collection(&self, name: &str) -> Result<CollectionDescription> {
        self.collection(name)?.describe()
    }
}
