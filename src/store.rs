use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// entity id -> metric name -> value, as produced by one feed parse.
pub type MetricTable = BTreeMap<String, BTreeMap<String, f64>>;

/// One poll cycle's worth of readings. Every entity shares the same timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    generation: u64,
    taken_at: Option<DateTime<Utc>>,
    entities: MetricTable,
}

impl Snapshot {
    pub fn new(entities: MetricTable, taken_at: DateTime<Utc>) -> Self {
        Self {
            generation: 0,
            taken_at: Some(taken_at),
            entities,
        }
    }

    /// Store-assigned sequence number; 0 until the first successful poll.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        self.taken_at
    }

    pub fn entities(&self) -> &MetricTable {
        &self.entities
    }

    pub fn metrics(&self, entity_id: &str) -> Option<&BTreeMap<String, f64>> {
        self.entities.get(entity_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn timestamp_secs(&self) -> i64 {
        self.taken_at.map(|ts| ts.timestamp()).unwrap_or_default()
    }
}

#[derive(Serialize)]
struct EntityRow<'a> {
    #[serde(flatten)]
    metrics: &'a BTreeMap<String, f64>,
    timestamp: i64,
}

// `{entity_id: {metric: value, ..., timestamp: T}}`
impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let timestamp = self.timestamp_secs();
        let mut map = serializer.serialize_map(Some(self.entities.len()))?;
        for (entity_id, metrics) in &self.entities {
            map.serialize_entry(entity_id, &EntityRow { metrics, timestamp })?;
        }
        map.end()
    }
}

/// Holds exactly one current [`Snapshot`] behind an immutable-handle swap.
///
/// The write lock is held only to swap the `Arc`, the read lock only to clone it, so
/// readers get a handle that cannot change underneath them and never see a mix of two
/// generations.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `snapshot` as current and returns the installed handle.
    pub fn replace(&self, mut snapshot: Snapshot) -> Arc<Snapshot> {
        let (installed, previous) = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            snapshot.generation = guard.generation + 1;
            let installed = Arc::new(snapshot);
            let previous = std::mem::replace(&mut *guard, installed.clone());
            (installed, previous)
        };
        tracing::trace!(
            generation = installed.generation,
            previous_generation = previous.generation,
            entities = installed.len(),
            "snapshot replaced"
        );
        // previous is dropped here, outside the lock
        installed
    }

    /// Tags `entities` with the current wall-clock time and installs it.
    pub fn update(&self, entities: MetricTable) -> Arc<Snapshot> {
        self.replace(Snapshot::new(entities, Utc::now()))
    }

    pub fn read(&self) -> Arc<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
