//! Outbound stream handles.
//!
//! A stream is a writer/body pair over an unbounded channel. The writer
//! ([`ClientStream`]) is what the registry stores and what application code
//! writes raw SSE bytes into; the body ([`ClientBody`]) is handed to axum as
//! the response body.
//!
//! # Teardown
//! ```text
//! ClientStream::abort(detail)      → Teardown::Error(detail)
//! ClientStream::end() / all writers dropped, body drained
//!                                  → Teardown::Close(StreamEnded)
//! ClientBody dropped before the end (peer went away)
//!                                  → Teardown::Close(ClientDisconnected)
//! ```
//! The hook is one-shot: whichever signal comes first takes it, and
//! detaching it silences all later signals.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{ready, Context, Poll};

use axum::body::Bytes;
use futures_util::Stream;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::registry::client::ClientId;
use crate::registry::events::CloseReason;

/// Error returned when writing to a stream that can no longer carry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream is closed")]
    Closed,
}

/// Signal raised by a stream when it goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Teardown {
    Close(CloseReason),
    Error(String),
}

/// Receiver of teardown signals (the registry).
pub(crate) trait TeardownSink: Send + Sync {
    fn teardown(&self, id: &ClientId, signal: Teardown);
}

struct Hook {
    sink: Weak<dyn TeardownSink>,
    id: ClientId,
}

enum Frame {
    Data(Bytes),
    End,
    Abort(String),
}

struct Shared {
    hook: Mutex<Option<Hook>>,
    ended: AtomicBool,
}

impl Shared {
    fn fire(&self, signal: Teardown) {
        let hook = self
            .hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(hook) = hook {
            if let Some(sink) = hook.sink.upgrade() {
                sink.teardown(&hook.id, signal);
            }
        }
    }
}

/// Writer half of a client stream. Cheap to clone.
#[derive(Clone)]
pub struct ClientStream {
    tx: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
}

impl ClientStream {
    /// Create a connected writer/body pair.
    pub fn channel() -> (ClientStream, ClientBody) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            hook: Mutex::new(None),
            ended: AtomicBool::new(false),
        });

        let stream = ClientStream {
            tx,
            shared: Arc::clone(&shared),
        };
        let body = ClientBody {
            rx,
            shared,
            finished: false,
        };
        (stream, body)
    }

    /// Queue raw bytes for the client. Framing is the caller's business.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<(), StreamError> {
        if self.shared.ended.load(Ordering::Acquire) {
            return Err(StreamError::Closed);
        }
        self.tx
            .send(Frame::Data(data.into()))
            .map_err(|_| StreamError::Closed)
    }

    /// Finish the response after queued data has been flushed.
    pub fn end(&self) {
        if !self.shared.ended.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Frame::End);
        }
    }

    /// Fail the response. The connection is reset and an error teardown
    /// carrying `detail` is signalled.
    pub fn abort(&self, detail: impl Into<String>) {
        if self.shared.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        let detail = detail.into();
        let _ = self.tx.send(Frame::Abort(detail.clone()));
        self.shared.fire(Teardown::Error(detail));
    }

    /// True once the stream was ended, aborted, or the peer went away.
    pub fn is_closed(&self) -> bool {
        self.shared.ended.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Install the teardown hook. Returns `false`, leaving the existing hook
    /// in place, if one is already attached.
    pub(crate) fn attach(&self, sink: Weak<dyn TeardownSink>, id: ClientId) -> bool {
        let mut hook = self
            .shared
            .hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if hook.is_some() {
            return false;
        }
        *hook = Some(Hook { sink, id });
        true
    }

    /// Remove the teardown hook. Returns whether one was attached.
    pub(crate) fn detach(&self) -> bool {
        self.shared
            .hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .is_some()
    }
}

impl fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Response body half of a client stream.
pub struct ClientBody {
    rx: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
    finished: bool,
}

impl Stream for ClientBody {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match ready!(self.rx.poll_recv(cx)) {
            Some(Frame::Data(bytes)) => Poll::Ready(Some(Ok(bytes))),
            Some(Frame::Abort(detail)) => {
                self.finished = true;
                self.shared.fire(Teardown::Error(detail.clone()));
                Poll::Ready(Some(Err(io::Error::other(detail))))
            }
            Some(Frame::End) | None => {
                self.finished = true;
                self.shared.ended.store(true, Ordering::Release);
                self.shared.fire(Teardown::Close(CloseReason::StreamEnded));
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for ClientBody {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.ended.store(true, Ordering::Release);
            self.shared
                .fire(Teardown::Close(CloseReason::ClientDisconnected));
        }
    }
}
