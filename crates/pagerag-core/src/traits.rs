use std::path::Path;

use async_trait::async_trait;
use image::DynamicImage;

use crate::types::{CollectionInfo, IndexedPoint, MultiVector, PageImage, ScoredPoint, SearchParams};

/// Turns one source document into ordered page images on disk.
pub trait Rasterizer: Send + Sync {
    fn rasterize(
        &self,
        document: &Path,
        output_dir: &Path,
        max_pages: Option<usize>,
    ) -> crate::error::Result<Vec<PageImage>>;
}

/// Multi-vector embedding model. Output order matches input order, one
/// multivector per input, sub-vector length fixed at `dim()`.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn is_ready(&self) -> bool { true }
    fn embed_images(&self, images: &[DynamicImage]) -> anyhow::Result<Vec<MultiVector>>;
    fn embed_queries(&self, queries: &[String]) -> anyhow::Result<Vec<MultiVector>>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn is_ready(&self) -> bool;
    /// Create the collection if it does not exist. Idempotent.
    async fn initialize(&self, collection: &str) -> anyhow::Result<()>;
    /// Insert or replace points by id. `Ok(false)` means the store rejected the write.
    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> anyhow::Result<bool>;
    /// Ranked hits, best first, at most `params.limit`.
    async fn search(
        &self,
        collection: &str,
        query: &MultiVector,
        params: &SearchParams,
    ) -> anyhow::Result<Vec<ScoredPoint>>;
    async fn collection_info(&self, collection: &str) -> anyhow::Result<CollectionInfo>;
}

/// Vision-capable chat completion endpoint.
#[async_trait]
pub trait CompletionService: Send + Sync {
    fn is_ready(&self) -> bool;
    async fn initialize(&self) -> anyhow::Result<()>;
    /// Transcribe the text on a PNG page image.
    async fn extract_text(&self, png: &[u8]) -> anyhow::Result<String>;
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}
