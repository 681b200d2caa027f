//! Progress events published while a document is being indexed.
//!
//! Wire shape (one JSON object per event):
//! - data events: `{status, message, current_page, total_pages, percentage}`
//! - keepalive: `{status: "heartbeat"}`
//! - terminal: `{status: "done", result}` or `{status: "error", message}`
//!
//! As a text event stream every event is written as `data: <json>` followed by
//! a blank line.

use serde::Serialize;

use crate::types::IndexingResult;

/// Counters carried by every pipeline data event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageProgress {
    pub message: String,
    pub current_page: usize,
    pub total_pages: usize,
    pub percentage: u8,
}

impl PageProgress {
    /// Percentage is `floor(current / total * 100)`; an empty document reports 0.
    pub fn at(message: impl Into<String>, current_page: usize, total_pages: usize) -> Self {
        Self {
            message: message.into(),
            current_page,
            total_pages,
            percentage: percentage(current_page, total_pages),
        }
    }

    pub fn finished(message: impl Into<String>, total_pages: usize) -> Self {
        Self { message: message.into(), current_page: total_pages, total_pages, percentage: 100 }
    }
}

pub fn percentage(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = current.min(total) * 100 / total;
    u8::try_from(pct).unwrap_or(100)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProgressEvent {
    Started(PageProgress),
    Processing(PageProgress),
    Storing(PageProgress),
    Progress(PageProgress),
    Completed(PageProgress),
    /// A batch failed; indexing continues with the next one.
    Error(PageProgress),
    Heartbeat,
    Done { result: IndexingResult },
    /// Terminal failure: the document could not be indexed at all, or the
    /// worker ended without a result.
    #[serde(rename = "error")]
    Failed { message: String },
}

impl ProgressEvent {
    pub fn status(&self) -> &'static str {
        match self {
            ProgressEvent::Started(_) => "started",
            ProgressEvent::Processing(_) => "processing",
            ProgressEvent::Storing(_) => "storing",
            ProgressEvent::Progress(_) => "progress",
            ProgressEvent::Completed(_) => "completed",
            ProgressEvent::Error(_) | ProgressEvent::Failed { .. } => "error",
            ProgressEvent::Heartbeat => "heartbeat",
            ProgressEvent::Done { .. } => "done",
        }
    }

    /// `done` and terminal `error` close a stream; batch `error` events never do.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Done { .. } | ProgressEvent::Failed { .. })
    }

    pub fn page_progress(&self) -> Option<&PageProgress> {
        match self {
            ProgressEvent::Started(p)
            | ProgressEvent::Processing(p)
            | ProgressEvent::Storing(p)
            | ProgressEvent::Progress(p)
            | ProgressEvent::Completed(p)
            | ProgressEvent::Error(p) => Some(p),
            ProgressEvent::Heartbeat | ProgressEvent::Done { .. } | ProgressEvent::Failed { .. } => None,
        }
    }

    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => format!(r#"{{"status":"error","message":"unserializable event: {e}"}}"#),
        }
    }

    /// `data: <json>\n\n`
    pub fn to_sse(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }
}

/// Receiver side of pipeline progress. Implementations must not block for long.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}
