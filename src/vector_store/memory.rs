//! In-memory [`VectorStore`] with exact search, used by the embedded worker mode and tests.

use super::{ChunkPayload, ScoredRecord, VectorRecord, VectorStore, VectorStoreError};
use crate::config::Distance;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

struct StoredRecord {
    vector: Vec<f32>,
    payload: ChunkPayload,
}

struct MemoryCollection {
    dimension: usize,
    records: BTreeMap<String, StoredRecord>,
}

/// Process-local vector store with exact search.
///
/// A batch is validated before any record is written and applied under one write lock, so
/// readers never observe a partially written record.
pub struct InMemoryVectorStore {
    distance: Distance,
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl InMemoryVectorStore {
    /// Create an empty store scoring with `distance`.
    pub fn new(distance: Distance) -> Self {
        Self {
            distance,
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn score(&self, left: &[f32], right: &[f32]) -> f32 {
        let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
        match self.distance {
            Distance::Dot => dot,
            Distance::Cosine => {
                let norm = |values: &[f32]| values.iter().map(|v| v * v).sum::<f32>().sqrt();
                let denominator = norm(left) * norm(right);
                if denominator > 0.0 { dot / denominator } else { 0.0 }
            }
            Distance::Euclid => {
                let distance = left
                    .iter()
                    .zip(right)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
                    .sqrt();
                distance
            }
        }
    }

    /// Order two scores best first: ascending for Euclid distances, descending otherwise.
    fn rank(&self, left: f32, right: f32) -> Ordering {
        let order = left.partial_cmp(&right).unwrap_or(Ordering::Equal);
        match self.distance {
            Distance::Euclid => order,
            Distance::Cosine | Distance::Dot => order.reverse(),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new(Distance::Cosine)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.write().await;
        match collections.get(collection) {
            Some(existing) if existing.dimension != dimension => Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: existing.dimension,
                actual: dimension,
            }),
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    collection.to_string(),
                    MemoryCollection {
                        dimension,
                        records: BTreeMap::new(),
                    },
                );
                tracing::debug!(collection, dimension, "Created in-memory collection");
                Ok(())
            }
        }
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<usize, VectorStoreError> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;

        if let Some(record) = records.iter().find(|record| record.vector.len() != target.dimension) {
            return Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: target.dimension,
                actual: record.vector.len(),
            });
        }

        let written = records.len();
        for record in records {
            target.records.insert(
                record.id,
                StoredRecord {
                    vector: record.vector,
                    payload: record.payload,
                },
            );
        }
        Ok(written)
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;
        if vector.len() != target.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: target.dimension,
                actual: vector.len(),
            });
        }

        let mut hits: Vec<ScoredRecord> = target
            .records
            .iter()
            .map(|(id, record)| ScoredRecord {
                id: id.clone(),
                score: self.score(vector, &record.vector),
                payload: record.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| self.rank(a.score, b.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count_for_source(&self, collection: &str, source_filename: &str) -> Result<usize, VectorStoreError> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;
        Ok(target
            .records
            .values()
            .filter(|record| record.payload.source_filename == source_filename)
            .count())
    }

    async fn source_counts(&self, collection: &str) -> Result<BTreeMap<String, usize>, VectorStoreError> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.to_string()))?;
        let mut counts = BTreeMap::new();
        for record in target.records.values() {
            *counts.entry(record.payload.source_filename.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
