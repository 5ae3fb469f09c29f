//! Durable record of last-applied resource state
//!
//! Each resource has one record, saved and deleted independently of every
//! other record. The file-backed store keeps one JSON document per node and
//! replaces it atomically, so a crash mid-apply never corrupts records that
//! were already committed.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Current on-disk record format.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Last-applied snapshot of one resource.
///
/// Unknown fields are ignored when loading so newer writers stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub node_id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Inputs as resolved when last applied
    #[serde(default)]
    pub last_inputs: BTreeMap<String, Value>,
    /// Outputs returned by the provider when last applied
    #[serde(default)]
    pub last_outputs: BTreeMap<String, Value>,
    /// Incremented on every successful apply
    pub version: u64,
    /// Node ids this resource depended on when last applied
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
}

impl StateRecord {
    /// First record for a freshly created resource.
    pub fn new(
        node_id: impl Into<String>,
        resource_type: impl Into<String>,
        last_inputs: BTreeMap<String, Value>,
        last_outputs: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            node_id: node_id.into(),
            resource_type: resource_type.into(),
            last_inputs,
            last_outputs,
            version: 1,
            dependencies: Vec::new(),
            applied_at: Some(Utc::now()),
        }
    }

    /// Record for the next successful apply of the same resource.
    pub fn next(
        &self,
        last_inputs: BTreeMap<String, Value>,
        last_outputs: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            node_id: self.node_id.clone(),
            resource_type: self.resource_type.clone(),
            last_inputs,
            last_outputs,
            version: self.version + 1,
            dependencies: self.dependencies.clone(),
            applied_at: Some(Utc::now()),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Storage for state records.
///
/// Implementations must make each `save`/`delete` atomic for that node.
pub trait StateStore: Send + Sync {
    /// Load every committed record, keyed by node id
    fn load(&self) -> Result<BTreeMap<String, StateRecord>>;

    /// Create or replace the record for a node
    fn save(&self, node_id: &str, record: &StateRecord) -> Result<()>;

    /// Remove the record for a node; removing a missing record succeeds
    fn delete(&self, node_id: &str) -> Result<()>;
}

// ============================================================================
// File-backed store
// ============================================================================

/// One JSON file per node inside a state directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record file for a node.
    pub fn record_path(&self, node_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(node_id)))
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<BTreeMap<String, StateRecord>> {
        let mut records = BTreeMap::new();

        if !self.dir.exists() {
            log::debug!("State directory {} does not exist yet", self.dir.display());
            return Ok(records);
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            Error::state(format!("failed to read {}: {e}", self.dir.display()))
        })?;

        for entry in entries {
            let path = entry
                .map_err(|e| Error::state(format!("failed to list state directory: {e}")))?
                .path();
            // Temporary files from interrupted writes end in .tmp
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let content = fs::read_to_string(&path)
                .map_err(|e| Error::state(format!("failed to read {}: {e}", path.display())))?;
            let record: StateRecord = serde_json::from_str(&content)
                .map_err(|e| Error::state(format!("failed to parse {}: {e}", path.display())))?;
            records.insert(record.node_id.clone(), record);
        }

        log::debug!(
            "Loaded {} state records from {}",
            records.len(),
            self.dir.display()
        );
        Ok(records)
    }

    fn save(&self, node_id: &str, record: &StateRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::state(format!(
                "failed to create state directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let content = serde_json::to_vec_pretty(record)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| Error::state(format!("failed to create temporary record: {e}")))?;
        tmp.write_all(&content)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| Error::state(format!("failed to write record for {node_id}: {e}")))?;

        let path = self.record_path(node_id);
        tmp.persist(&path).map_err(|e| {
            Error::state(format!("failed to commit {}: {}", path.display(), e.error))
        })?;

        log::trace!("Saved state for {node_id} (version {})", record.version);
        Ok(())
    }

    fn delete(&self, node_id: &str) -> Result<()> {
        let path = self.record_path(node_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::trace!("Deleted state for {node_id}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::state(format!(
                "failed to delete {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Escape a node id into a portable file stem.
///
/// Bytes outside `[A-Za-z0-9._-]` become `%XX`, so distinct ids never share
/// a file.
fn encode_file_stem(node_id: &str) -> String {
    let mut out = String::with_capacity(node_id.len());
    for byte in node_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    if out.starts_with('.') {
        out.replace_range(0..1, "%2E");
    }
    out
}

// ============================================================================
// In-memory store
// ============================================================================

/// State kept in memory; used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<BTreeMap<String, StateRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing records.
    pub fn with_records(records: BTreeMap<String, StateRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StateRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<BTreeMap<String, StateRecord>> {
        Ok(self.lock().clone())
    }

    fn save(&self, node_id: &str, record: &StateRecord) -> Result<()> {
        self.lock().insert(node_id.to_string(), record.clone());
        Ok(())
    }

    fn delete(&self, node_id: &str) -> Result<()> {
        self.lock().remove(node_id);
        Ok(())
    }
}
