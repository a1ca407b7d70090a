use crate::store::{Snapshot, SnapshotStore};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("entity {0:?} not found")]
    EntityNotFound(String),
    #[error("metric {metric:?} not found for entity {entity:?}")]
    MetricNotFound { entity: String, metric: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReading {
    pub entity_id: String,
    pub metric_name: String,
    pub value: f64,
    /// Unix seconds of the poll that produced the value.
    pub timestamp: i64,
}

/// Read-only view over the [`SnapshotStore`]. Never performs I/O.
#[derive(Clone, Debug)]
pub struct MetricsQuery {
    store: Arc<SnapshotStore>,
}

impl MetricsQuery {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn get_metric(
        &self,
        entity_id: &str,
        metric_name: &str,
    ) -> Result<MetricReading, QueryError> {
        let snapshot = self.store.read();
        let metrics = snapshot
            .metrics(entity_id)
            .ok_or_else(|| QueryError::EntityNotFound(entity_id.to_string()))?;
        let value = metrics
            .get(metric_name)
            .copied()
            .ok_or_else(|| QueryError::MetricNotFound {
                entity: entity_id.to_string(),
                metric: metric_name.to_string(),
            })?;

        Ok(MetricReading {
            entity_id: entity_id.to_string(),
            metric_name: metric_name.to_string(),
            value,
            timestamp: snapshot.timestamp_secs(),
        })
    }

    pub fn list_all(&self) -> Arc<Snapshot> {
        self.store.read()
    }
}
