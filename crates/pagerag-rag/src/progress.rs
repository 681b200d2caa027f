//! Relay between an indexing worker and whoever streams its events out.
//!
//! The worker runs on its own thread with a private current-thread runtime
//! and pushes events into a bounded flume channel. The reader polls with a
//! timeout: a timeout yields a synthetic `heartbeat`, the first terminal event
//! (`done`, or `error` when the document failed or the worker died without a
//! result) closes the stream. Exactly one terminal event is ever forwarded and
//! nothing is forwarded after it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use pagerag_core::config::ProgressSettings;
use pagerag_core::event::{ProgressEvent, ProgressSink};
use pagerag_core::types::IndexingResult;

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Producer half handed to the worker.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<ProgressEvent>,
    terminal_sent: Arc<AtomicBool>,
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        if event.is_terminal() && self.terminal_sent.swap(true, Ordering::SeqCst) {
            debug!(status = event.status(), "duplicate terminal event dropped");
            return;
        }
        // a gone reader is not an error for the worker; it keeps running
        let _ = self.tx.send(event);
    }
}

enum Polled {
    Event(ProgressEvent),
    Timeout,
    Disconnected,
}

/// Consumer half. Iterate it (blocking) or call [`ProgressStream::next_event`] (async).
pub struct ProgressStream {
    rx: Receiver<ProgressEvent>,
    worker: Option<JoinHandle<()>>,
    poll_interval: Duration,
    join_timeout: Duration,
    closed: bool,
}

/// Run `job` on a dedicated worker and return the stream of its events.
///
/// `job` gets the producer sink; its return value becomes the `done` event.
pub fn spawn_indexing<F, Fut>(settings: &ProgressSettings, job: F) -> Result<ProgressStream>
where
    F: FnOnce(ChannelSink) -> Fut + Send + 'static,
    Fut: Future<Output = IndexingResult>,
{
    let (tx, rx) = flume::bounded(settings.buffer.max(1));
    let sink = ChannelSink { tx, terminal_sent: Arc::new(AtomicBool::new(false)) };

    let worker = std::thread::Builder::new()
        .name("pagerag-indexer".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build();
            let terminal = match runtime {
                Ok(rt) => ProgressEvent::Done { result: rt.block_on(job(sink.clone())) },
                Err(e) => ProgressEvent::Failed { message: format!("failed to start indexing runtime: {e}") },
            };
            sink.emit(terminal);
        })
        .map_err(|e| anyhow!("failed to spawn indexing worker: {e}"))?;

    Ok(ProgressStream {
        rx,
        worker: Some(worker),
        poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
        join_timeout: Duration::from_millis(settings.join_timeout_ms),
        closed: false,
    })
}

impl ProgressStream {
    pub fn is_closed(&self) -> bool { self.closed }

    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        if self.closed {
            return None;
        }
        let polled = match tokio::time::timeout(self.poll_interval, self.rx.recv_async()).await {
            Ok(Ok(event)) => Polled::Event(event),
            Ok(Err(_)) => Polled::Disconnected,
            Err(_) => Polled::Timeout,
        };
        let event = self.accept(polled);
        if self.closed {
            self.discard_residual();
            self.join_worker_async().await;
        }
        Some(event)
    }

    /// Stop reading. Waits up to the join timeout for the worker to finish.
    pub async fn close(mut self) {
        self.closed = true;
        self.discard_residual();
        self.join_worker_async().await;
    }

    fn accept(&mut self, polled: Polled) -> ProgressEvent {
        match polled {
            Polled::Event(event) => {
                if event.is_terminal() {
                    self.closed = true;
                }
                event
            }
            Polled::Timeout => ProgressEvent::Heartbeat,
            Polled::Disconnected => {
                self.closed = true;
                ProgressEvent::Failed { message: "indexing worker exited without a result".to_string() }
            }
        }
    }

    /// Empty the buffer once the stream is closed. Anything still queued was
    /// sent after the terminal event (or after the reader gave up) and is
    /// dropped, not forwarded.
    fn discard_residual(&mut self) {
        let residual = self.rx.try_iter().count();
        if residual > 0 {
            debug!(residual, "discarded events after stream closed");
        }
    }

    fn worker_done(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    fn reap(&mut self) {
        match self.worker.take() {
            Some(w) if w.is_finished() => {
                if w.join().is_err() {
                    warn!("indexing worker panicked");
                }
            }
            Some(_) => warn!(timeout_ms = self.join_timeout.as_millis() as u64, "indexing worker still running, detaching"),
            None => {}
        }
    }

    async fn join_worker_async(&mut self) {
        let deadline = Instant::now() + self.join_timeout;
        while !self.worker_done() && Instant::now() < deadline {
            tokio::time::sleep(JOIN_POLL).await;
        }
        self.reap();
    }

    fn join_worker_blocking(&mut self) {
        let deadline = Instant::now() + self.join_timeout;
        while !self.worker_done() && Instant::now() < deadline {
            std::thread::sleep(JOIN_POLL);
        }
        self.reap();
    }
}

/// Blocking iteration for callers without a runtime.
impl Iterator for ProgressStream {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        if self.closed {
            return None;
        }
        let polled = match self.rx.recv_timeout(self.poll_interval) {
            Ok(event) => Polled::Event(event),
            Err(RecvTimeoutError::Timeout) => Polled::Timeout,
            Err(RecvTimeoutError::Disconnected) => Polled::Disconnected,
        };
        let event = self.accept(polled);
        if self.closed {
            self.discard_residual();
            self.join_worker_blocking();
        }
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagerag_core::event::PageProgress;

    fn fast() -> ProgressSettings {
        ProgressSettings { poll_interval_ms: 20, join_timeout_ms: 1000, buffer: 8 }
    }

    fn ok(pages: usize) -> IndexingResult {
        IndexingResult { success: true, message: "ok".into(), total_pages: pages, indexed_pages: pages }
    }

    fn explode() -> IndexingResult {
        panic!("worker blew up")
    }

    #[test]
    fn events_arrive_in_order_then_done() {
        let stream = spawn_indexing(&fast(), |sink| async move {
            sink.emit(ProgressEvent::Started(PageProgress::at("s", 0, 2)));
            sink.emit(ProgressEvent::Completed(PageProgress::finished("c", 2)));
            ok(2)
        })
        .unwrap();
        let statuses: Vec<&str> = stream.filter(|e| *e != ProgressEvent::Heartbeat).map(|e| e.status()).collect();
        assert_eq!(statuses, vec!["started", "completed", "done"]);
    }

    #[test]
    fn slow_worker_produces_heartbeats() {
        let stream = spawn_indexing(&fast(), |_sink| async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            ok(0)
        })
        .unwrap();
        let events: Vec<ProgressEvent> = stream.collect();
        assert!(events.iter().any(|e| *e == ProgressEvent::Heartbeat));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(events.last().map(|e| e.status()), Some("done"));
    }

    #[test]
    fn duplicate_terminal_is_not_forwarded() {
        let stream = spawn_indexing(&fast(), |sink| async move {
            sink.emit(ProgressEvent::Done { result: ok(1) });
            ok(1)
        })
        .unwrap();
        let events: Vec<ProgressEvent> = stream.collect();
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[test]
    fn panicking_worker_ends_with_error() {
        let stream = spawn_indexing(&fast(), |sink| async move {
            sink.emit(ProgressEvent::Started(PageProgress::at("s", 0, 1)));
            explode()
        })
        .unwrap();
        let events: Vec<ProgressEvent> = stream.collect();
        assert_eq!(events.first().map(|e| e.status()), Some("started"));
        assert!(matches!(events.last(), Some(ProgressEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn close_waits_a_bounded_time_and_the_worker_still_finishes() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let settings = ProgressSettings { poll_interval_ms: 20, join_timeout_ms: 100, buffer: 8 };
        let mut stream = spawn_indexing(&settings, move |sink| async move {
            sink.emit(ProgressEvent::Started(PageProgress::at("s", 0, 1)));
            tokio::time::sleep(Duration::from_millis(1000)).await;
            sink.emit(ProgressEvent::Completed(PageProgress::finished("c", 1)));
            flag.store(true, Ordering::SeqCst);
            ok(1)
        })
        .unwrap();
        loop {
            match stream.next_event().await {
                Some(ProgressEvent::Started(_)) => break,
                Some(_) => continue,
                None => panic!("stream closed before the worker started"),
            }
        }

        let start = Instant::now();
        stream.close().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(100), "returned after {waited:?}");
        assert!(waited < Duration::from_millis(800), "returned after {waited:?}");
        assert!(!finished.load(Ordering::SeqCst));

        let deadline = Instant::now() + Duration::from_secs(3);
        while !finished.load(Ordering::SeqCst) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(finished.load(Ordering::SeqCst), "detached worker ran to completion");
    }

    #[test]
    fn dropping_the_stream_lets_the_worker_finish() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let mut stream = spawn_indexing(&fast(), move |sink| async move {
            for n in 0..5 {
                sink.emit(ProgressEvent::Progress(PageProgress::at("p", n, 5)));
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            flag.store(true, Ordering::SeqCst);
            ok(5)
        })
        .unwrap();
        assert!(stream.by_ref().any(|e| e.status() == "progress"));
        drop(stream);

        let deadline = Instant::now() + Duration::from_secs(3);
        while !finished.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_document_is_the_only_terminal() {
        let stream = spawn_indexing(&fast(), |sink| async move {
            sink.emit(ProgressEvent::Failed { message: "Failed to process document: bad".into() });
            IndexingResult::failed("Failed to process document: bad")
        })
        .unwrap();
        let events: Vec<ProgressEvent> = stream.filter(|e| *e != ProgressEvent::Heartbeat).collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ProgressEvent::Failed { message } if message.contains("bad")));
    }

    #[tokio::test]
    async fn async_reader_stops_after_terminal() {
        let mut stream = spawn_indexing(&fast(), |_sink| async move { ok(3) }).unwrap();
        let mut last = None;
        while let Some(event) = stream.next_event().await {
            last = Some(event);
        }
        assert!(stream.is_closed());
        assert!(matches!(last, Some(ProgressEvent::Done { ref result }) if result.indexed_pages == 3));
        assert!(stream.next_event().await.is_none());
    }
}
