use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use pagerag_core::catalog::{list_pdf_files, render_preview};
use pagerag_core::config::Settings;
use pagerag_core::event::ProgressSink;
use pagerag_core::rasterizer::document_name;
use pagerag_core::traits::{CompletionService, Embedder, Rasterizer, VectorStore};
use pagerag_core::types::{ChatAnswer, DocumentList, IndexingResult, Outcome, Preview, QueryResult, ServiceStatus};

use crate::composer::AnswerComposer;
use crate::pipeline::IndexingPipeline;
use crate::progress::{spawn_indexing, ProgressStream};
use crate::retrieval::RetrievalEngine;

/// Gateway handles built once by the process entry point.
#[derive(Clone)]
pub struct Gateways {
    pub rasterizer: Arc<dyn Rasterizer>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
    pub completion: Arc<dyn CompletionService>,
}

/// Every user-facing operation, each returning an [`Outcome`].
pub struct PageRagService {
    settings: Settings,
    gateways: Gateways,
    pipeline: IndexingPipeline,
    retrieval: RetrievalEngine,
    composer: AnswerComposer,
}

impl PageRagService {
    pub fn new(settings: Settings, gateways: Gateways) -> Self {
        let collection = settings.vector.collection.clone();
        let pipeline = IndexingPipeline::new(
            gateways.rasterizer.clone(),
            gateways.embedder.clone(),
            gateways.store.clone(),
            collection.clone(),
            settings.batch_size,
            settings.output_dir(),
        );
        let retrieval = RetrievalEngine::new(
            gateways.embedder.clone(),
            gateways.store.clone(),
            collection,
            settings.search.clone(),
        );
        let composer = AnswerComposer::new(retrieval.clone(), gateways.completion.clone());
        Self { settings, gateways, pipeline, retrieval, composer }
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    pub async fn status(&self) -> Outcome<ServiceStatus> {
        let collection = &self.settings.vector.collection;
        match self.gateways.store.collection_info(collection).await {
            Ok(info) => Outcome::Success(ServiceStatus {
                model_loaded: self.gateways.embedder.is_ready(),
                collection_name: info.name,
                total_documents: info.point_count,
            }),
            Err(e) => {
                warn!(collection = %collection, error = %e, "status check failed");
                Outcome::fail(format!("Status check failed: {e}"))
            }
        }
    }

    /// PDFs in `data_dir`, or in the configured data directory.
    pub fn list_documents(&self, data_dir: Option<&Path>) -> Outcome<DocumentList> {
        let dir = data_dir.map(Path::to_path_buf).unwrap_or_else(|| self.settings.data_dir());
        match list_pdf_files(&dir) {
            Ok(pdf_files) => Outcome::Success(DocumentList { total_files: pdf_files.len(), pdf_files }),
            Err(e) => Outcome::fail(format!("Failed to list documents: {e}")),
        }
    }

    pub fn preview(&self, pdf_path: &Path, output_dir: Option<&Path>) -> Outcome<Preview> {
        let out = output_dir.map(Path::to_path_buf).unwrap_or_else(|| self.settings.output_dir());
        match render_preview(self.gateways.rasterizer.as_ref(), pdf_path, &out) {
            Ok(preview_path) => Outcome::Success(Preview { preview_path, pdf_name: document_name(pdf_path) }),
            Err(e) => Outcome::fail(format!("Failed to create preview: {e}")),
        }
    }

    /// Index in the caller's task, reporting to `sink` if given.
    pub async fn index(&self, pdf_path: &Path, sink: Option<&dyn ProgressSink>) -> IndexingResult {
        self.pipeline.process(pdf_path, sink, None).await
    }

    /// Index on a background worker and hand back its event stream.
    pub fn index_stream(&self, pdf_path: PathBuf, output_dir: Option<PathBuf>) -> Outcome<ProgressStream> {
        let pipeline = self.pipeline.clone();
        info!(pdf = %pdf_path.display(), batch_size = pipeline.batch_size(), "indexing started");
        let spawned = spawn_indexing(&self.settings.progress, move |sink| async move {
            pipeline.process(&pdf_path, Some(&sink), output_dir.as_deref()).await
        });
        match spawned {
            Ok(stream) => Outcome::Success(stream),
            Err(e) => Outcome::fail(format!("Failed to start indexing: {e}")),
        }
    }

    pub async fn query(&self, text: &str, limit: Option<usize>) -> Outcome<QueryResult> {
        self.retrieval.query(text, limit).await
    }

    pub async fn chat(&self, text: &str, limit: Option<usize>, use_context: bool) -> Outcome<ChatAnswer> {
        self.composer.chat(text, limit, use_context).await
    }
}
