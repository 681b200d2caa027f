//! pagerag-core
//!
//! Shared vocabulary for the page-image RAG workspace: domain types, progress
//! events, gateway traits, configuration and the PDF page rasterizer.

pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod rasterizer;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use event::{PageProgress, ProgressEvent, ProgressSink};
