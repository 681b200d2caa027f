//! pagerag-vector
//!
//! Multivector stores behind the `VectorStore` gateway: LanceDB on disk, or an
//! in-process store with binary-quantized candidate ranking.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use pagerag_core::config::VectorSettings;
use pagerag_core::traits::VectorStore;

pub mod lance;
pub mod maxsim;
pub mod memory;
pub mod schema;
pub mod table;

pub use lance::LanceVectorStore;
pub use memory::InMemoryVectorStore;

/// Store selected by `vector.uri`, with `vector.collection` created if missing.
pub async fn open_store(settings: &VectorSettings) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = if settings.is_memory() {
        info!(dim = settings.dim, "using in-memory vector store");
        Arc::new(InMemoryVectorStore::new(settings.dim))
    } else {
        let uri = pagerag_core::config::expand_path(&settings.uri);
        Arc::new(LanceVectorStore::connect(&uri.to_string_lossy(), settings.dim).await?)
    };
    store.initialize(&settings.collection).await?;
    Ok(store)
}
