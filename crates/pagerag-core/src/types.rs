//! Domain types shared by the rasterizer, gateways and the orchestration core.

use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One item's embedding: an ordered list of fixed-length sub-vectors.
pub type MultiVector = Vec<Vec<f32>>;
pub type PointId = u64;

/// A source document on disk, identified by its path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub size_mb: f64,
}

impl SourceDocument {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let size = std::fs::metadata(path)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        // two decimals, same as the listing shown to users
        let size_mb = (size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
        Ok(Self { name, path: path.to_path_buf(), size, size_mb })
    }
}

/// A single rasterized page.
///
/// - `document_id`: file name of the source document (e.g. `A.pdf`)
/// - `page_number`: 1-based, contiguous within one rasterization
/// - `path`: image artifact on disk; may vanish before it is read
/// - `dpi`: pixel density used when rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    pub document_id: String,
    pub page_number: usize,
    pub path: PathBuf,
    pub dpi: u16,
}

/// Payload stored next to every vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagePayload {
    pub source: String,
    pub file_path: String,
    pub page_number: usize,
    pub pdf_name: String,
}

impl PagePayload {
    pub const SOURCE_PDF_IMAGE: &'static str = "pdf_image";

    pub fn for_page(page: &PageImage) -> Self {
        Self {
            source: Self::SOURCE_PDF_IMAGE.to_string(),
            file_path: page.path.to_string_lossy().to_string(),
            page_number: page.page_number,
            pdf_name: page.document_id.clone(),
        }
    }
}

/// The unit written to the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedPoint {
    pub id: PointId,
    pub vector: MultiVector,
    pub payload: PagePayload,
}

/// A raw hit as returned by the vector store, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: PointId,
    pub score: f32,
    pub payload: PagePayload,
}

/// Query-time accuracy knobs handed to the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub limit: usize,
    pub timeout: Duration,
    pub rescore: bool,
    pub oversampling: f32,
}

impl SearchParams {
    /// Number of coarse candidates to fetch before rescoring.
    pub fn candidate_count(&self) -> usize {
        if !self.rescore {
            return self.limit;
        }
        let factor = self.oversampling.max(1.0);
        ((self.limit as f32) * factor).ceil() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub point_count: usize,
    pub status: CollectionStatus,
}

/// Final outcome of one indexing invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingResult {
    pub success: bool,
    pub message: String,
    pub total_pages: usize,
    pub indexed_pages: usize,
}

impl IndexingResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), total_pages: 0, indexed_pages: 0 }
    }
}

/// One ranked page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub score: f64,
    pub page_number: usize,
    pub pdf_name: String,
    pub image_path: String,
}

impl From<ScoredPoint> for SearchResult {
    fn from(hit: ScoredPoint) -> Self {
        Self {
            score: f64::from(hit.score),
            page_number: hit.payload.page_number,
            pdf_name: hit.payload.pdf_name,
            image_path: hit.payload.file_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub search_time: f64,
    pub total_results: usize,
}

/// A page the answer was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub page_number: usize,
    pub pdf_name: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub query: String,
    pub answer: String,
    pub context_used: bool,
    pub source_pages: Vec<Citation>,
    pub search_results: Vec<SearchResult>,
    pub total_time: f64,
    pub search_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub model_loaded: bool,
    pub collection_name: String,
    pub total_documents: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentList {
    pub pdf_files: Vec<SourceDocument>,
    pub total_files: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub preview_path: PathBuf,
    pub pdf_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<SearchResult>>,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), search_results: None }
    }
}

/// Result shape of every public operation: a payload or a message, never a panic.
///
/// Serializes flat, with a `success` flag merged into the payload object.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(Failure),
}

impl<T> Outcome<T> {
    pub fn fail(message: impl Into<String>) -> Self {
        Outcome::Failure(Failure::new(message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(v) => Some(v),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(f) => Some(f),
        }
    }
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (success, body) = match self {
            Outcome::Success(v) => (true, serde_json::to_value(v).map_err(S::Error::custom)?),
            Outcome::Failure(f) => (false, serde_json::to_value(f).map_err(S::Error::custom)?),
        };
        let mut map = match body {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        map.insert("success".to_string(), serde_json::Value::Bool(success));
        map.serialize(serializer)
    }
}
