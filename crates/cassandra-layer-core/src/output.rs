//! Line broadcasting over a child process output stream.
//!
//! An [`Output`] owns one end of a pipe (stdout or stderr). Listeners attach
//! and detach freely; the first attach starts a reader task that splits the
//! stream into lines and hands every line to all currently attached
//! listeners, in arrival order. An [`OutputHold`] postpones that start so a
//! group of listeners can be attached before the first line is delivered.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::io::AsyncRead;
use tokio_stream::StreamExt;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, error, warn};

/// A consumer of text lines produced by a process.
///
/// Consumers are invoked synchronously on the reader task, one line at a
/// time, so they must be cheap.
pub trait LineConsumer: Send + Sync {
    fn accept(&self, line: &str);
}

impl<F> LineConsumer for F
where
    F: Fn(&str) + Send + Sync,
{
    fn accept(&self, line: &str) {
        self(line)
    }
}

type Source = Box<dyn AsyncRead + Send + Unpin>;

// not yet started while `source` is present
struct Reader {
    source: Option<Source>,
    holds: usize,
}

struct Shared {
    name: String,
    next_id: AtomicU64,
    consumers: Mutex<Vec<(u64, Arc<dyn LineConsumer>)>>,
    reader: Mutex<Reader>,
}

impl Shared {
    fn consumers(&self) -> MutexGuard<'_, Vec<(u64, Arc<dyn LineConsumer>)>> {
        self.consumers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reader(&self) -> MutexGuard<'_, Reader> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_reader(self: &Arc<Self>) {
        let mut reader = self.reader();
        if reader.holds > 0 || self.consumers().is_empty() {
            return;
        }
        if let Some(source) = reader.source.take() {
            tokio::spawn(read_lines(self.clone(), source));
        }
    }

    fn remove(&self, id: u64) {
        self.consumers().retain(|(existing, _)| *existing != id);
    }

    fn publish(&self, line: &str) {
        let consumers: Vec<Arc<dyn LineConsumer>> = self
            .consumers()
            .iter()
            .map(|(_, consumer)| consumer.clone())
            .collect();

        for consumer in consumers {
            if catch_unwind(AssertUnwindSafe(|| consumer.accept(line))).is_err() {
                error!(output = %self.name, "Line consumer panicked while handling output");
            }
        }
    }
}

/// Broadcast channel for one output stream of one process.
#[derive(Clone)]
pub struct Output {
    shared: Arc<Shared>,
}

impl Output {
    pub fn new(name: impl Into<String>, source: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                next_id: AtomicU64::new(0),
                consumers: Mutex::new(Vec::new()),
                reader: Mutex::new(Reader {
                    source: Some(Box::new(source)),
                    holds: 0,
                }),
            }),
        }
    }

    /// An output that never produces lines, used when a stream was not captured
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, tokio::io::empty())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Register a consumer and start the reader task on first use.
    ///
    /// The returned [`Subscription`] detaches the consumer when dropped.
    pub fn attach(&self, consumer: Arc<dyn LineConsumer>) -> Subscription {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.consumers().push((id, consumer));
        self.shared.start_reader();

        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Number of consumers currently attached
    pub fn consumer_count(&self) -> usize {
        self.shared.consumers().len()
    }

    /// Keep the reader from starting until the returned guard is dropped.
    ///
    /// Has no effect once the reader is running.
    pub fn hold(&self) -> OutputHold {
        self.shared.reader().holds += 1;
        OutputHold {
            shared: self.shared.clone(),
        }
    }
}

/// Postpones the start of an [`Output`] reader, see [`Output::hold`]
#[must_use = "dropping the hold releases the reader immediately"]
pub struct OutputHold {
    shared: Arc<Shared>,
}

impl Drop for OutputHold {
    fn drop(&mut self) {
        {
            let mut reader = self.shared.reader();
            reader.holds = reader.holds.saturating_sub(1);
        }
        self.shared.start_reader();
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("name", &self.shared.name)
            .field("consumers", &self.consumer_count())
            .finish()
    }
}

/// Attachment of one consumer to one [`Output`].
///
/// Dropping the subscription detaches the consumer. Detaching is always
/// safe, including after the underlying stream has been closed.
#[must_use = "dropping a subscription detaches the consumer immediately"]
pub struct Subscription {
    shared: Weak<Shared>,
    id: u64,
}

impl Subscription {
    pub fn detach(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(self.id);
        }
    }
}

async fn read_lines(shared: Arc<Shared>, source: Source) {
    let mut frames = FramedRead::with_capacity(source, LossyLinesCodec, 1024);
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(line) => shared.publish(&line),
            Err(e) if is_stream_closed(&e) => break,
            Err(e) => {
                warn!(output = %shared.name, error = %e, "Output reader stopped on read error");
                break;
            }
        }
    }
    debug!(output = %shared.name, "Output reader exiting");
}

fn is_stream_closed(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
    )
}

/// Splits a byte stream on `\n`, dropping a trailing `\r`.
///
/// Invalid UTF-8 is replaced rather than treated as an error, since the
/// server and its scripts may print arbitrary bytes.
struct LossyLinesCodec;

impl LossyLinesCodec {
    fn to_line(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl Decoder for LossyLinesCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.iter().position(|b| *b == b'\n') {
            Some(index) => {
                let line = src.split_to(index + 1);
                Ok(Some(Self::to_line(&line)))
            }
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(Self::to_line(&rest)))
    }
}
