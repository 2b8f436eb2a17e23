//! Collection manifest and record snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collection::CollectionState;
use crate::collection::record::Record;
use crate::collection::wal::SeqNumber;
use crate::error::{QuiverError, Result};
use crate::schema::CollectionDefinition;
use crate::storage::Storage;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SNAPSHOT_FILE: &str = "snapshot.json";
pub const MANIFEST_VERSION: u32 = 1;

/// Everything needed to reopen a collection besides its data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionManifest {
    pub version: u32,
    pub definition: CollectionDefinition,
    pub state: CollectionState,
    /// Last WAL sequence folded into `snapshot.json`.
    #[serde(default)]
    pub snapshot_wal_seq: SeqNumber,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionManifest {
    pub fn new(definition: CollectionDefinition) -> Self {
        let now = Utc::now();
        CollectionManifest {
            version: MANIFEST_VERSION,
            definition,
            state: CollectionState::Created,
            snapshot_wal_seq: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn read(storage: &dyn Storage) -> Result<Self> {
        let manifest: CollectionManifest = serde_json::from_slice(&storage.read_all(MANIFEST_FILE)?)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(QuiverError::storage(format!(
                "unsupported manifest version {} (expected {MANIFEST_VERSION})",
                manifest.version
            )));
        }
        Ok(manifest)
    }

    pub fn write(&mut self, storage: &dyn Storage) -> Result<()> {
        self.updated_at = Utc::now();
        storage.write_atomic(MANIFEST_FILE, &serde_json::to_vec_pretty(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Insertion position, which breaks ranking ties.
    pub seq: u64,
    pub record: Record,
}

/// All records as of `last_wal_seq`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    #[serde(default)]
    pub last_wal_seq: SeqNumber,
    #[serde(default)]
    pub records: Vec<SnapshotRecord>,
}

impl CollectionSnapshot {
    /// Read the snapshot, or an empty one if none was written yet.
    pub fn read(storage: &dyn Storage) -> Result<Self> {
        if !storage.file_exists(SNAPSHOT_FILE) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(&storage.read_all(SNAPSHOT_FILE)?)?)
    }

    pub fn write(&self, storage: &dyn Storage) -> Result<()> {
        storage.write_atomic(SNAPSHOT_FILE, &serde_json::to_vec(self)?)
    }
}
