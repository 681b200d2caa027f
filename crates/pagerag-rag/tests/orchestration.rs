use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tempfile::TempDir;

use pagerag_core::config::{ProgressSettings, SearchSettings, Settings};
use pagerag_core::error::Error;
use pagerag_core::event::ProgressEvent;
use pagerag_core::rasterizer::{document_name, page_file_name};
use pagerag_core::traits::{CompletionService, Embedder, Rasterizer, VectorStore};
use pagerag_core::types::{CollectionInfo, IndexedPoint, MultiVector, PageImage, ScoredPoint, SearchParams};
use pagerag_embed::FakeEmbedder;
use pagerag_rag::composer::{CONTEXT_DELIMITER, CONTEXT_PAGES};
use pagerag_rag::{spawn_indexing, AnswerComposer, Gateways, IndexingPipeline, PageRagService, RetrievalEngine};
use pagerag_vector::InMemoryVectorStore;

const COLLECTION: &str = "colpali-documents";
const DIM: usize = 128;

struct FakeRasterizer {
    pages: usize,
}

impl Rasterizer for FakeRasterizer {
    fn rasterize(&self, document: &Path, output_dir: &Path, max_pages: Option<usize>) -> pagerag_core::Result<Vec<PageImage>> {
        if !document.exists() {
            return Err(Error::DocumentOpen { path: document.to_path_buf(), reason: "no such file".into() });
        }
        fs::create_dir_all(output_dir)?;
        let count = max_pages.map_or(self.pages, |m| m.min(self.pages));
        (1..=count)
            .map(|n| {
                let path = output_dir.join(page_file_name(n, count));
                let shade = (n * 20 % 256) as u8;
                RgbImage::from_pixel(8, 8, Rgb([shade, 255 - shade, 128]))
                    .save(&path)
                    .map_err(|e| Error::Render { page: n, reason: e.to_string() })?;
                Ok(PageImage { document_id: document_name(document), page_number: n, path, dpi: 72 })
            })
            .collect()
    }
}

/// Fails the `fail_on`-th upsert call (1-based), delegates everything else.
struct FlakyStore {
    inner: InMemoryVectorStore,
    fail_on: usize,
    calls: AtomicUsize,
    upserted_ids: Mutex<Vec<u64>>,
}

impl FlakyStore {
    fn new(fail_on: usize) -> Self {
        Self { inner: InMemoryVectorStore::new(DIM), fail_on, calls: AtomicUsize::new(0), upserted_ids: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    fn is_ready(&self) -> bool { true }

    async fn initialize(&self, collection: &str) -> anyhow::Result<()> {
        self.inner.initialize(collection).await
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> anyhow::Result<bool> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(anyhow!("store unavailable"));
        }
        self.upserted_ids.lock().unwrap().extend(points.iter().map(|p| p.id));
        self.inner.upsert(collection, points).await
    }

    async fn search(&self, collection: &str, query: &MultiVector, params: &SearchParams) -> anyhow::Result<Vec<ScoredPoint>> {
        self.inner.search(collection, query, params).await
    }

    async fn collection_info(&self, collection: &str) -> anyhow::Result<CollectionInfo> {
        self.inner.collection_info(collection).await
    }
}

/// Ignores the requested limit and returns every stored page.
struct UnboundedStore {
    inner: InMemoryVectorStore,
}

#[async_trait]
impl VectorStore for UnboundedStore {
    fn is_ready(&self) -> bool { true }

    async fn initialize(&self, collection: &str) -> anyhow::Result<()> {
        self.inner.initialize(collection).await
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> anyhow::Result<bool> {
        self.inner.upsert(collection, points).await
    }

    async fn search(&self, collection: &str, query: &MultiVector, params: &SearchParams) -> anyhow::Result<Vec<ScoredPoint>> {
        let everything = SearchParams { limit: 1000, ..params.clone() };
        self.inner.search(collection, query, &everything).await
    }

    async fn collection_info(&self, collection: &str) -> anyhow::Result<CollectionInfo> {
        self.inner.collection_info(collection).await
    }
}

#[derive(Default)]
struct ScriptedCompletion {
    page_text: String,
    fail_generate: bool,
    extractions: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    fn is_ready(&self) -> bool { true }

    async fn initialize(&self) -> anyhow::Result<()> { Ok(()) }

    async fn extract_text(&self, png: &[u8]) -> anyhow::Result<String> {
        let n = self.extractions.fetch_add(1, Ordering::SeqCst);
        if self.page_text.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("{} #{n} ({} bytes)", self.page_text, png.len()))
    }

    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail_generate {
            return Err(anyhow!("deployment overloaded"));
        }
        Ok("an answer".to_string())
    }
}

struct Fixture {
    tmp: TempDir,
    pdf: PathBuf,
    embedder: Arc<dyn Embedder>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let pdf = tmp.path().join("A.pdf");
        fs::write(&pdf, b"%PDF-1.7").unwrap();
        Self { tmp, pdf, embedder: Arc::new(FakeEmbedder::new(DIM)) }
    }

    fn out(&self) -> PathBuf { self.tmp.path().join("temp_images") }

    fn pipeline(&self, pages: usize, store: Arc<dyn VectorStore>) -> IndexingPipeline {
        IndexingPipeline::new(Arc::new(FakeRasterizer { pages }), self.embedder.clone(), store, COLLECTION, 4, self.out())
    }

    fn retrieval(&self, store: Arc<dyn VectorStore>) -> RetrievalEngine {
        RetrievalEngine::new(self.embedder.clone(), store, COLLECTION, SearchSettings::default())
    }
}

async fn memory_store() -> Arc<dyn VectorStore> {
    let store = Arc::new(InMemoryVectorStore::new(DIM));
    store.initialize(COLLECTION).await.unwrap();
    store
}

fn collector() -> (Arc<Mutex<Vec<ProgressEvent>>>, impl Fn(ProgressEvent) + Send + Sync) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    (events, move |e: ProgressEvent| sink_events.lock().unwrap().push(e))
}

fn summary(events: &[ProgressEvent]) -> Vec<(String, usize, usize, u8)> {
    events
        .iter()
        .filter_map(|e| e.page_progress().map(|p| (e.status().to_string(), p.current_page, p.total_pages, p.percentage)))
        .collect()
}

#[tokio::test]
async fn ten_pages_in_batches_of_four() {
    let fx = Fixture::new();
    let store = memory_store().await;
    let (events, sink) = collector();

    let result = fx.pipeline(10, store.clone()).process(&fx.pdf, Some(&sink), None).await;
    assert!(result.success);
    assert_eq!((result.total_pages, result.indexed_pages), (10, 10));

    let got = summary(&events.lock().unwrap());
    let expected: Vec<(String, usize, usize, u8)> = [
        ("started", 0, 10, 0),
        ("processing", 0, 10, 0),
        ("storing", 0, 10, 0),
        ("progress", 4, 10, 40),
        ("processing", 4, 10, 40),
        ("storing", 4, 10, 40),
        ("progress", 8, 10, 80),
        ("processing", 8, 10, 80),
        ("storing", 8, 10, 80),
        ("progress", 10, 10, 100),
        ("completed", 10, 10, 100),
    ]
    .into_iter()
    .map(|(s, c, t, p)| (s.to_string(), c, t, p))
    .collect();
    assert_eq!(got, expected);

    assert_eq!(store.collection_info(COLLECTION).await.unwrap().point_count, 10);
    assert!(fx.out().join("A").join("page_01.png").exists(), "pages land in a per-document directory");
}

#[tokio::test]
async fn failed_batch_is_reported_and_skipped() {
    let fx = Fixture::new();
    let store = Arc::new(FlakyStore::new(2));
    store.initialize(COLLECTION).await.unwrap();
    let (events, sink) = collector();

    let result = fx.pipeline(10, store.clone()).process(&fx.pdf, Some(&sink), None).await;
    assert!(result.success);
    assert_eq!(result.total_pages, 10);
    assert_eq!(result.indexed_pages, 6);

    let events = events.lock().unwrap();
    let errors: Vec<_> = events.iter().filter(|e| e.status() == "error").collect();
    assert_eq!(errors.len(), 1);
    let failed = errors[0].page_progress().unwrap();
    assert_eq!(failed.current_page, 4);
    assert!(failed.message.contains("5-8"));
    assert!(!events.iter().any(|e| e.is_terminal()), "pipeline events never close a stream");
    assert_eq!(events.last().map(|e| e.status()), Some("completed"));

    // the counter only advances on success, so the last batch reuses ids 4 and 5
    assert_eq!(*store.upserted_ids.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn unreadable_document_fails_once() {
    let fx = Fixture::new();
    let (events, sink) = collector();
    let result = fx.pipeline(3, memory_store().await).process(&fx.tmp.path().join("missing.pdf"), Some(&sink), None).await;

    assert!(!result.success);
    assert_eq!(result.indexed_pages, 0);
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status(), "error");
    assert!(events[0].is_terminal());
}

#[test]
fn unreadable_document_streams_a_single_terminal_error() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(3, Arc::new(InMemoryVectorStore::new(DIM)));
    let missing = fx.tmp.path().join("missing.pdf");
    let progress = ProgressSettings { poll_interval_ms: 50, join_timeout_ms: 2000, buffer: 4 };
    let stream = spawn_indexing(&progress, move |sink| async move { pipeline.process(&missing, Some(&sink), None).await })
        .expect("worker started");

    let wire: Vec<String> = stream.filter(|e| *e != ProgressEvent::Heartbeat).map(|e| e.to_json()).collect();
    assert_eq!(wire.len(), 1, "{wire:?}");
    let last: serde_json::Value = serde_json::from_str(&wire[0]).unwrap();
    assert_eq!(last["status"], "error");
    assert!(last["message"].as_str().unwrap().starts_with("Failed to process document"));
    assert!(last.get("result").is_none());
}

#[tokio::test]
async fn empty_document_completes_at_full_percentage() {
    let fx = Fixture::new();
    let (events, sink) = collector();
    let result = fx.pipeline(0, memory_store().await).process(&fx.pdf, Some(&sink), None).await;

    assert!(result.success);
    assert_eq!(result.total_pages, 0);
    let got = summary(&events.lock().unwrap());
    assert_eq!(got, vec![("started".to_string(), 0, 0, 0), ("completed".to_string(), 0, 0, 100)]);
}

#[tokio::test]
async fn reindexing_is_idempotent() {
    let fx = Fixture::new();
    let store = memory_store().await;
    let pipeline = fx.pipeline(6, store.clone());
    pipeline.process(&fx.pdf, None, None).await;
    let first = fx.retrieval(store.clone()).query("", Some(6)).await.success().unwrap();
    pipeline.process(&fx.pdf, None, None).await;
    let second = fx.retrieval(store.clone()).query("", Some(6)).await.success().unwrap();

    assert_eq!(store.collection_info(COLLECTION).await.unwrap().point_count, 6);
    assert_eq!(first.results, second.results);
}

#[tokio::test]
async fn query_returns_limit_results_best_first() {
    let fx = Fixture::new();
    let store = memory_store().await;
    fx.pipeline(8, store.clone()).process(&fx.pdf, None, None).await;

    let found = fx.retrieval(store).query("", Some(5)).await.success().expect("query succeeds");
    assert_eq!(found.results.len(), 5);
    assert_eq!(found.total_results, 5);
    for pair in found.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(found.results.iter().all(|r| r.pdf_name == "A.pdf"));
}

#[tokio::test]
async fn query_never_returns_more_than_the_limit() {
    let fx = Fixture::new();
    let store = Arc::new(UnboundedStore { inner: InMemoryVectorStore::new(DIM) });
    store.initialize(COLLECTION).await.unwrap();
    fx.pipeline(8, store.clone()).process(&fx.pdf, None, None).await;

    let found = fx.retrieval(store).query("", Some(3)).await.success().expect("query succeeds");
    assert_eq!(found.results.len(), 3);
    assert_eq!(found.total_results, 3);
    for pair in found.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn query_against_unknown_collection_is_a_failure() {
    let fx = Fixture::new();
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(DIM));
    let out = fx.retrieval(store).query("anything", None).await;
    let failure = out.failure().expect("failure outcome");
    assert!(failure.message.starts_with("Search failed"));
}

#[tokio::test]
async fn chat_on_empty_collection_falls_back() {
    let fx = Fixture::new();
    let completion = Arc::new(ScriptedCompletion { page_text: "text".into(), ..Default::default() });
    let composer = AnswerComposer::new(fx.retrieval(memory_store().await), completion.clone());

    let answer = composer.chat("Q", None, true).await.success().expect("fallback is not a failure");
    assert!(!answer.context_used);
    assert!(answer.source_pages.is_empty());
    assert_eq!(answer.answer, "an answer");
    assert_eq!(completion.extractions.load(Ordering::SeqCst), 0);
    assert!(completion.prompts.lock().unwrap()[0].contains("No related documents were found"));
}

#[tokio::test]
async fn chat_grounds_on_top_pages() {
    let fx = Fixture::new();
    let store = memory_store().await;
    fx.pipeline(7, store.clone()).process(&fx.pdf, None, None).await;
    let completion = Arc::new(ScriptedCompletion { page_text: "page text".into(), ..Default::default() });
    let composer = AnswerComposer::new(fx.retrieval(store), completion.clone());

    let answer = composer.chat("what is on the page", Some(7), true).await.success().unwrap();
    assert!(answer.context_used);
    assert_eq!(answer.search_results.len(), 7);
    assert_eq!(answer.source_pages.len(), CONTEXT_PAGES);
    assert_eq!(answer.source_pages[0].page_number, answer.search_results[0].page_number);
    let prompt = completion.prompts.lock().unwrap()[0].clone();
    assert_eq!(prompt.matches(CONTEXT_DELIMITER).count(), CONTEXT_PAGES - 1);
    assert!(prompt.contains("Question: what is on the page"));
}

#[tokio::test]
async fn chat_skips_pages_without_artifacts_or_text() {
    let fx = Fixture::new();
    let store = memory_store().await;
    fx.pipeline(3, store.clone()).process(&fx.pdf, None, None).await;
    fs::remove_file(fx.out().join("A").join("page_01.png")).unwrap();

    let silent = Arc::new(ScriptedCompletion::default());
    let composer = AnswerComposer::new(fx.retrieval(store.clone()), silent.clone());
    let answer = composer.chat("Q", None, true).await.success().unwrap();
    assert!(!answer.context_used, "blank transcriptions give no context");
    assert_eq!(silent.extractions.load(Ordering::SeqCst), 2, "missing page is never sent");

    let without = AnswerComposer::new(fx.retrieval(store), silent.clone());
    let answer = without.chat("Q", None, false).await.success().unwrap();
    assert!(!answer.context_used);
    assert_eq!(silent.extractions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn generation_failure_is_reported() {
    let fx = Fixture::new();
    let completion = Arc::new(ScriptedCompletion { fail_generate: true, ..Default::default() });
    let composer = AnswerComposer::new(fx.retrieval(memory_store().await), completion);

    let out = composer.chat("Q", None, true).await;
    let failure = out.failure().expect("failure outcome");
    assert!(failure.message.contains("deployment overloaded"));
    assert_eq!(failure.search_results, Some(vec![]));
}

#[tokio::test]
async fn service_streams_indexing_and_reports_status() {
    let fx = Fixture::new();
    let settings = Settings {
        output_dir: fx.out().to_string_lossy().to_string(),
        data_dir: fx.tmp.path().to_string_lossy().to_string(),
        progress: ProgressSettings { poll_interval_ms: 50, join_timeout_ms: 2000, buffer: 4 },
        ..Default::default()
    };
    let service = PageRagService::new(
        settings,
        Gateways {
            rasterizer: Arc::new(FakeRasterizer { pages: 5 }),
            embedder: fx.embedder.clone(),
            store: memory_store().await,
            completion: Arc::new(ScriptedCompletion::default()),
        },
    );

    let mut stream = service.index_stream(fx.pdf.clone(), None).success().expect("worker started");
    let mut statuses = Vec::new();
    let mut last = None;
    while let Some(event) = tokio::time::timeout(Duration::from_secs(10), stream.next_event()).await.unwrap() {
        statuses.push(event.status());
        last = Some(event);
    }
    assert_eq!(statuses.iter().filter(|s| **s == "done").count(), 1);
    match last {
        Some(ProgressEvent::Done { result }) => assert_eq!(result.indexed_pages, 5),
        other => panic!("expected done, got {other:?}"),
    }

    let status = service.status().await.success().unwrap();
    assert_eq!(status.collection_name, COLLECTION);
    assert_eq!(status.total_documents, 5);
    assert!(status.model_loaded);

    let listing = service.list_documents(None).success().unwrap();
    assert_eq!(listing.total_files, 1);
    assert!(service.list_documents(Some(Path::new("/no/such/dir"))).failure().is_some());

    let preview = service.preview(&fx.pdf, None).success().unwrap();
    assert_eq!(preview.pdf_name, "A.pdf");
    assert!(preview.preview_path.ends_with("preview_A.png"));
    assert!(service.preview(&fx.tmp.path().join("nope.pdf"), None).failure().is_some());
}
