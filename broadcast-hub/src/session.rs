use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader},
    time::timeout,
};
use tracing::{debug, info};

use crate::{
    hub::Hub,
    message,
    peer::{self, ClientHandle, ClientId},
};

/// How long a departing client's writer may keep flushing queued lines
/// before the connection is closed under it.
pub const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Drives one connected peer from welcome to departure.
///
/// The welcome line goes to this peer only. The arrival line is broadcast
/// before the peer is registered, so the peer never sees its own arrival.
/// Reading stops at end of stream or at the first read error; both end the
/// session the same way. The writer then gets [`WRITER_DRAIN_TIMEOUT`] to
/// flush; a peer that stopped reading has its connection closed regardless.
pub async fn run_session<S>(stream: S, peer: SocketAddr, hub: Hub) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (handle, outbox) = ClientHandle::new();
    let client = handle.id();
    let mut writer_task = peer::spawn_writer(writer, client, outbox);

    info!(%peer, %client, "client connected");

    handle.send(message::welcome(peer))?;
    hub.broadcast(message::arrived(peer)).await?;
    hub.entry(handle.clone()).await?;

    relay_lines(BufReader::new(reader), peer, client, &hub).await?;

    hub.leave(handle).await?;
    hub.broadcast(message::left(peer)).await?;
    info!(%peer, %client, "client disconnected");

    match timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await {
        Ok(joined) => joined.context("client writer panicked")?,
        Err(_) => {
            debug!(%peer, %client, "writer still blocked; closing connection");
            writer_task.abort();
        }
    }
    Ok(())
}

async fn relay_lines<R>(reader: R, peer: SocketAddr, client: ClientId, hub: &Hub) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.is_empty() => continue,
            Ok(Some(line)) => hub.broadcast(message::chat(client, peer, &line)).await?,
            Ok(None) => return Ok(()),
            Err(error) => {
                debug!(%peer, ?error, "read failed; ending session");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, Lines, ReadHalf};

    type ClientLines = Lines<BufReader<ReadHalf<DuplexStream>>>;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn next_line(lines: &mut ClientLines) -> Result<Option<String>> {
        Ok(timeout(Duration::from_secs(1), lines.next_line()).await??)
    }

    async fn next_queued(outbox: &mut peer::Outbox) -> Option<String> {
        timeout(Duration::from_secs(1), outbox.recv())
            .await
            .expect("timed out waiting for broadcast")
    }

    #[tokio::test]
    async fn session_runs_full_lifecycle() -> Result<()> {
        let (hub, _task) = Hub::spawn();
        let (watcher, mut watcher_rx) = ClientHandle::new();
        hub.entry(watcher.clone()).await?;

        let (client_side, server_side) = tokio::io::duplex(1024);
        let session = tokio::spawn(run_session(server_side, addr(9001), hub.clone()));

        let (client_read, mut client_write) = tokio::io::split(client_side);
        let mut client_lines = BufReader::new(client_read).lines();

        assert_eq!(
            next_line(&mut client_lines).await?.as_deref(),
            Some("You are 127.0.0.1:9001")
        );
        assert_eq!(
            next_queued(&mut watcher_rx).await.as_deref(),
            Some("127.0.0.1:9001 has arrived")
        );

        client_write.write_all(b"\r\nhello\r\n").await?;
        assert_eq!(
            next_queued(&mut watcher_rx).await.as_deref(),
            Some("127.0.0.1:9001: hello")
        );

        client_write.shutdown().await?;
        assert_eq!(
            next_queued(&mut watcher_rx).await.as_deref(),
            Some("127.0.0.1:9001 has left")
        );

        timeout(Duration::from_secs(1), session).await???;

        // Nothing but the welcome: no own arrival, no echo, no own departure.
        assert_eq!(next_line(&mut client_lines).await?, None);
        assert_eq!(hub.member_count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn session_closes_when_peer_stops_reading() -> Result<()> {
        let (hub, _task) = Hub::spawn();
        let (client_side, server_side) = tokio::io::duplex(64);
        let session = tokio::spawn(run_session(server_side, addr(9003), hub.clone()));

        timeout(Duration::from_secs(1), async {
            while hub.member_count().await? != 1 {
                tokio::task::yield_now().await;
            }
            Ok::<_, anyhow::Error>(())
        })
        .await??;

        // Far more than the pipe holds, so the writer blocks on a full buffer.
        for n in 0..20 {
            hub.broadcast(Message::system(format!("backlog line {n}"))).await?;
        }

        let (mut client_read, mut client_write) = tokio::io::split(client_side);
        client_write.shutdown().await?;

        timeout(Duration::from_secs(2), session)
            .await
            .context("session should close a peer that stopped reading")???;

        // The server side is gone: the peer drains what was buffered, then EOF.
        let mut buffered = Vec::new();
        timeout(Duration::from_secs(1), client_read.read_to_end(&mut buffered)).await??;
        assert!(buffered.starts_with(b"You are 127.0.0.1:9003\n"));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_utf8_ends_session_like_eof() -> Result<()> {
        let (hub, _task) = Hub::spawn();
        let (watcher, mut watcher_rx) = ClientHandle::new();
        hub.entry(watcher).await?;

        let (mut client_side, server_side) = tokio::io::duplex(1024);
        let session = tokio::spawn(run_session(server_side, addr(9002), hub.clone()));

        assert_eq!(
            next_queued(&mut watcher_rx).await.as_deref(),
            Some("127.0.0.1:9002 has arrived")
        );
        client_side.write_all(&[0xff, 0xfe, b'\n']).await?;

        assert_eq!(
            next_queued(&mut watcher_rx).await.as_deref(),
            Some("127.0.0.1:9002 has left")
        );
        timeout(Duration::from_secs(1), session).await???;
        Ok(())
    }
}
