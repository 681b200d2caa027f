use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use pagerag_core::error::Error;
use pagerag_core::traits::VectorStore;
use pagerag_core::types::{
    CollectionInfo, CollectionStatus, IndexedPoint, MultiVector, PointId, ScoredPoint, SearchParams,
};

use crate::maxsim::{max_sim, rank_desc, BinaryMultiVector};

struct StoredPoint {
    point: IndexedPoint,
    binary: BinaryMultiVector,
}

/// In-process multivector store.
///
/// Candidates are ranked on binary-quantized vectors; with rescoring on, the
/// top `candidate_count` are re-ranked with full-precision MaxSim and cut to
/// `limit`.
pub struct InMemoryVectorStore {
    dim: usize,
    collections: RwLock<HashMap<String, BTreeMap<PointId, StoredPoint>>>,
}

impl InMemoryVectorStore {
    pub fn new(dim: usize) -> Self {
        Self { dim, collections: RwLock::new(HashMap::new()) }
    }

    fn poisoned() -> anyhow::Error { anyhow!("in-memory vector store lock poisoned") }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn is_ready(&self) -> bool { true }

    async fn initialize(&self, collection: &str) -> Result<()> {
        let mut guard = self.collections.write().map_err(|_| Self::poisoned())?;
        guard.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<bool> {
        if let Some(bad) = points.iter().flat_map(|p| p.vector.iter()).find(|v| v.len() != self.dim) {
            return Err(Error::VectorStore(format!("sub-vector length {} != {}", bad.len(), self.dim)).into());
        }
        let mut guard = self.collections.write().map_err(|_| Self::poisoned())?;
        let points_by_id = guard
            .get_mut(collection)
            .ok_or_else(|| Error::NotFound(format!("collection {collection}")))?;
        let n = points.len();
        for point in points {
            let binary = BinaryMultiVector::quantize(&point.vector);
            points_by_id.insert(point.id, StoredPoint { point, binary });
        }
        debug!(collection, points = n, "upserted");
        Ok(true)
    }

    async fn search(&self, collection: &str, query: &MultiVector, params: &SearchParams) -> Result<Vec<ScoredPoint>> {
        let guard = self.collections.read().map_err(|_| Self::poisoned())?;
        let points_by_id = guard
            .get(collection)
            .ok_or_else(|| Error::NotFound(format!("collection {collection}")))?;

        let query_bits = BinaryMultiVector::quantize(query);
        let mut coarse: Vec<(f32, PointId, &StoredPoint)> = points_by_id
            .values()
            .map(|sp| (query_bits.max_sim(&sp.binary), sp.point.id, sp))
            .collect();
        rank_desc(&mut coarse);
        coarse.truncate(params.candidate_count());

        let mut ranked: Vec<(f32, PointId, &StoredPoint)> = if params.rescore {
            coarse.into_iter().map(|(_, id, sp)| (max_sim(query, &sp.point.vector), id, sp)).collect()
        } else {
            coarse
        };
        rank_desc(&mut ranked);
        ranked.truncate(params.limit);

        Ok(ranked
            .into_iter()
            .map(|(score, id, sp)| ScoredPoint { id, score, payload: sp.point.payload.clone() })
            .collect())
    }

    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo> {
        let guard = self.collections.read().map_err(|_| Self::poisoned())?;
        let points_by_id = guard
            .get(collection)
            .ok_or_else(|| Error::NotFound(format!("collection {collection}")))?;
        Ok(CollectionInfo {
            name: collection.to_string(),
            point_count: points_by_id.len(),
            status: CollectionStatus::Green,
        })
    }
}
