use anyhow::Result;
use arrow_array::RecordBatchIterator;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType};
use tracing::{debug, info};

use pagerag_core::error::Error;
use pagerag_core::traits::VectorStore;
use pagerag_core::types::{CollectionInfo, CollectionStatus, IndexedPoint, MultiVector, ScoredPoint, SearchParams};

use crate::maxsim::{max_sim, rank_desc};
use crate::schema::{build_page_schema, points_to_record_batch, query_array, rows_from_batch, ID_COLUMN, VECTOR_COLUMN};
use crate::table::{ensure_table, open_db, table_exists};

/// LanceDB-backed store; one table per collection.
///
/// Lance ranks candidates by multivector cosine distance; exact MaxSim is then
/// computed from the returned vectors and used as the reported score.
pub struct LanceVectorStore {
    db: Connection,
    dim: usize,
}

impl LanceVectorStore {
    pub async fn connect(uri: &str, dim: usize) -> Result<Self> {
        let db = open_db(uri).await.map_err(|e| Error::VectorStore(format!("connect {uri}: {e}")))?;
        info!(uri, dim, "LanceDB connected");
        Ok(Self { db, dim })
    }

    async fn open(&self, collection: &str) -> Result<lancedb::Table> {
        if !table_exists(&self.db, collection).await? {
            return Err(Error::NotFound(format!("collection {collection}")).into());
        }
        Ok(self.db.open_table(collection).execute().await?)
    }

    async fn run_search(&self, collection: &str, query: &MultiVector, params: &SearchParams) -> Result<Vec<ScoredPoint>> {
        let table = self.open(collection).await?;
        let mut stream = table
            .vector_search(query_array(query, self.dim)?)?
            .column(VECTOR_COLUMN)
            .distance_type(DistanceType::Cosine)
            .limit(params.candidate_count())
            .execute()
            .await?;

        let mut ranked = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            for row in rows_from_batch(&batch)? {
                let score = max_sim(query, &row.vector);
                ranked.push((score, row.id, row.payload));
            }
        }
        if params.rescore {
            rank_desc(&mut ranked);
        }
        ranked.truncate(params.limit);
        Ok(ranked.into_iter().map(|(score, id, payload)| ScoredPoint { id, score, payload }).collect())
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    fn is_ready(&self) -> bool { true }

    async fn initialize(&self, collection: &str) -> Result<()> {
        ensure_table(&self.db, collection, build_page_schema(self.dim)).await
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<bool> {
        if points.is_empty() {
            return Ok(true);
        }
        let table = self.open(collection).await?;
        let batch = points_to_record_batch(&points, self.dim)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        // id is the merge key: re-indexing a page replaces its row
        let mut mi = table.merge_insert(&[ID_COLUMN]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await?;
        debug!(collection, points = points.len(), "upserted");
        Ok(true)
    }

    async fn search(&self, collection: &str, query: &MultiVector, params: &SearchParams) -> Result<Vec<ScoredPoint>> {
        match tokio::time::timeout(params.timeout, self.run_search(collection, query, params)).await {
            Ok(hits) => hits,
            Err(_) => Err(Error::Timeout(params.timeout).into()),
        }
    }

    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo> {
        let table = self.open(collection).await?;
        let point_count = table.count_rows(None).await?;
        Ok(CollectionInfo { name: collection.to_string(), point_count, status: CollectionStatus::Green })
    }
}
