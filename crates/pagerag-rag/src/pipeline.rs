//! Document indexing: rasterize, embed page batches, upsert.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, ensure, Result};
use image::DynamicImage;
use tracing::{error, info, warn};

use pagerag_core::error::Error;
use pagerag_core::event::{PageProgress, ProgressEvent, ProgressSink};
use pagerag_core::rasterizer::{document_name, document_stem};
use pagerag_core::traits::{Embedder, Rasterizer, VectorStore};
use pagerag_core::types::{IndexedPoint, IndexingResult, PageImage, PagePayload, PointId};

/// Turns one source document into stored page points.
///
/// Cheap to clone; every gateway is shared behind an `Arc`.
#[derive(Clone)]
pub struct IndexingPipeline {
    rasterizer: Arc<dyn Rasterizer>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    collection: String,
    batch_size: usize,
    output_dir: PathBuf,
}

impl IndexingPipeline {
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        batch_size: usize,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            rasterizer,
            embedder,
            store,
            collection: collection.into(),
            batch_size: batch_size.max(1),
            output_dir: output_dir.into(),
        }
    }

    pub fn batch_size(&self) -> usize { self.batch_size }

    /// Index `document`. Never fails: errors become a terminal `error` event
    /// plus a failed result. A failing batch is reported and skipped, the rest
    /// of the document still goes in.
    pub async fn process(
        &self,
        document: &Path,
        sink: Option<&dyn ProgressSink>,
        output_dir: Option<&Path>,
    ) -> IndexingResult {
        let emitter = Emitter(sink);
        let start = Instant::now();
        match self.run(document, &emitter, output_dir).await {
            Ok(result) => {
                info!(
                    pdf = %document_name(document),
                    pages = result.total_pages,
                    indexed = result.indexed_pages,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "document indexed"
                );
                result
            }
            Err(e) => {
                error!(pdf = %document.display(), error = %e, "indexing failed");
                let message = format!("Failed to process document: {e}");
                // terminal: a relaying sink drops the `done` that would follow
                emitter.emit(ProgressEvent::Failed { message: message.clone() });
                IndexingResult::failed(message)
            }
        }
    }

    async fn run(&self, document: &Path, emitter: &Emitter<'_>, output_dir: Option<&Path>) -> Result<IndexingResult> {
        let output_dir = output_dir.unwrap_or(&self.output_dir);
        let page_dir = output_dir.join(document_stem(document));
        std::fs::create_dir_all(&page_dir)?;

        let pages = self.rasterizer.rasterize(document, &page_dir, None)?;
        let total = pages.len();
        emitter.emit(ProgressEvent::Started(PageProgress::at(
            format!("Converted {total} pages, indexing..."),
            0,
            total,
        )));

        // ids continue a counter owned by this run only
        let mut indexed = 0usize;
        for (n, batch) in pages.chunks(self.batch_size).enumerate() {
            let first = n * self.batch_size;
            let last = first + batch.len();
            let range = format!("{}-{}", first + 1, last);
            let images = load_images(batch)?;

            emitter.emit(ProgressEvent::Processing(PageProgress::at(
                format!("Embedding pages {range}..."),
                first,
                total,
            )));
            match self.store_batch(batch, images, indexed as PointId, first, total, emitter).await {
                Ok(stored) => {
                    indexed += stored;
                    emitter.emit(ProgressEvent::Progress(PageProgress::at(
                        format!("{last}/{total} pages done"),
                        last,
                        total,
                    )));
                }
                Err(e) => {
                    warn!(batch_start = first, pages = batch.len(), error = %e, "batch failed, continuing");
                    emitter.emit(ProgressEvent::Error(PageProgress::at(
                        format!("Failed to store pages {range}: {e}"),
                        first,
                        total,
                    )));
                }
            }
        }

        emitter.emit(ProgressEvent::Completed(PageProgress::finished(
            format!("Indexing complete, {indexed} pages indexed"),
            total,
        )));
        Ok(IndexingResult {
            success: true,
            message: "Document indexed".to_string(),
            total_pages: total,
            indexed_pages: indexed,
        })
    }

    /// Embed, build points and upsert one batch. Returns the pages stored.
    async fn store_batch(
        &self,
        batch: &[PageImage],
        images: Vec<DynamicImage>,
        first_id: PointId,
        first_page: usize,
        total: usize,
        emitter: &Emitter<'_>,
    ) -> Result<usize> {
        let embeddings = self.embedder.embed_images(&images).map_err(|e| Error::Embedding(e.to_string()))?;
        ensure!(
            embeddings.len() == batch.len(),
            Error::Embedding(format!("expected {} embeddings, got {}", batch.len(), embeddings.len()))
        );
        let points: Vec<IndexedPoint> = batch
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(j, (page, vector))| IndexedPoint {
                id: first_id + j as PointId,
                vector,
                payload: PagePayload::for_page(page),
            })
            .collect();

        emitter.emit(ProgressEvent::Storing(PageProgress::at(
            format!("Storing vectors for pages {}-{}...", first_page + 1, first_page + batch.len()),
            first_page,
            total,
        )));
        if !self.store.upsert(&self.collection, points).await? {
            bail!(Error::VectorStore(format!("collection {} rejected the batch", self.collection)));
        }
        Ok(batch.len())
    }
}

fn load_images(batch: &[PageImage]) -> Result<Vec<DynamicImage>> {
    batch
        .iter()
        .map(|page| {
            if !page.path.exists() {
                return Err(Error::ArtifactMissing(page.path.clone()).into());
            }
            Ok(image::open(&page.path)?)
        })
        .collect()
}

struct Emitter<'a>(Option<&'a dyn ProgressSink>);

impl Emitter<'_> {
    fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = self.0 {
            sink.emit(event);
        }
    }
}
