use std::{future::Future, net::SocketAddr};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{hub::Hub, session::run_session};

/// Accepts TCP connections and hands each one to its own session task.
pub struct Server {
    listener: TcpListener,
    hub: Hub,
}

impl Server {
    /// Wraps an already bound listener and starts the hub's control loop.
    pub fn new(listener: TcpListener) -> Self {
        let (hub, _coordinator) = Hub::spawn();
        Self { listener, hub }
    }

    /// Binds `addr` and builds a server on it. Failing to bind is fatal to
    /// the caller.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self::new(listener))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle to this server's hub.
    pub fn hub(&self) -> Hub {
        self.hub.clone()
    }

    /// Accepts connections until `shutdown` resolves. Sessions already
    /// running are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, hub } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("hub shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &hub);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, hub: &Hub) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, hub),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, hub: &Hub) {
    let hub = hub.clone();
    tokio::spawn(async move {
        if let Err(err) = run_session(stream, peer, hub).await {
            warn!(peer = %peer, error = ?err, "client session ended with error");
        }
    });
}
