use std::{
    fmt, io,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::debug;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    #[cfg(test)]
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiving end of a client's queue, drained by its writer task.
pub type Outbox = mpsc::UnboundedReceiver<String>;

/// Returned when a line is sent to a client whose writer has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed(pub ClientId);

impl fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "outgoing queue for client {} is closed", self.0)
    }
}

impl std::error::Error for QueueClosed {}

/// Send side of one client's outgoing line queue.
///
/// Clones share the same queue. The queue closes once every clone is
/// dropped, which lets the writer flush what is left and exit.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    queue: mpsc::UnboundedSender<String>,
}

impl ClientHandle {
    pub fn new() -> (Self, Outbox) {
        let (queue, outbox) = mpsc::unbounded_channel();
        let id = ClientId::next();
        (Self { id, queue }, outbox)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn send(&self, line: impl Into<String>) -> Result<(), QueueClosed> {
        self.queue
            .send(line.into())
            .map_err(|_| QueueClosed(self.id))
    }

    /// True once the writer has stopped reading the queue.
    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

/// Starts the writer task for one client.
pub fn spawn_writer<W>(writer: W, client: ClientId, outbox: Outbox) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(error) = write_lines(writer, outbox).await {
            debug!(%client, ?error, "client writer stopped after write error");
        }
    })
}

/// Writes queued lines in order, each followed by `\n`, until the queue
/// closes. Shuts the writer down afterwards. Stops at the first write error,
/// dropping the queue so the hub stops delivering to it.
pub async fn write_lines<W>(mut writer: W, mut outbox: Outbox) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbox.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}
