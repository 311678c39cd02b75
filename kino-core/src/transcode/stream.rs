//! Byte stream over a running encoder's stdout.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::process::ChildStdout;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::ffmpeg::OutcomeHandle;
use crate::locking::LockContext;

/// Read size for encoder output.
const CHUNK_SIZE: usize = 64 * 1024;

/// Encoder output as a stream of byte chunks.
///
/// The stream owns the read lock of the source file. Dropping it (the client
/// went away, the response finished, the server shut down) cancels the lock,
/// which kills the encoder and releases the file once the process is gone.
pub struct TranscodeStream {
    reader: ReaderStream<ChildStdout>,
    context: LockContext,
    outcome: OutcomeHandle,
    finished: bool,
}

impl TranscodeStream {
    pub(crate) fn new(stdout: ChildStdout, context: LockContext, outcome: OutcomeHandle) -> Self {
        Self {
            reader: ReaderStream::with_capacity(stdout, CHUNK_SIZE),
            context,
            outcome,
            finished: false,
        }
    }

    /// Returns the read lock held for the stream.
    pub fn context(&self) -> &LockContext {
        &self.context
    }

    /// Returns a handle to the encoder's outcome.
    pub fn outcome(&self) -> OutcomeHandle {
        self.outcome.clone()
    }
}

impl Stream for TranscodeStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.reader).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                // Reads after our own kill are expected to fail.
                if self.context.is_cancelled() {
                    debug!("Encoder output closed: {}", e);
                } else {
                    warn!(
                        "Reading encoder output for {} failed: {}",
                        self.context.path().display(),
                        e
                    );
                }
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TranscodeStream {
    fn drop(&mut self) {
        if !self.context.is_cancelled() {
            debug!("Stream for {} dropped", self.context.path().display());
        }
        self.context.cancel();
    }
}
