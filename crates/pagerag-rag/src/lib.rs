//! pagerag-rag
//!
//! Orchestration over the gateways: indexing pipeline, progress relay,
//! retrieval, grounded answers, and the service facade that ties them up.

pub mod completion;
pub mod composer;
pub mod pipeline;
pub mod progress;
pub mod retrieval;
pub mod service;

pub use completion::AzureOpenAiClient;
pub use composer::AnswerComposer;
pub use pipeline::IndexingPipeline;
pub use progress::{spawn_indexing, ChannelSink, ProgressStream};
pub use retrieval::RetrievalEngine;
pub use service::{Gateways, PageRagService};
