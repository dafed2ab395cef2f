//! TCP sockets carrying one queue pair each.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::core::*;
use crate::qpair::{EventReceiver, QueuePair, QueuePairConfig, QueuePairTasks};

/// A negotiated queue pair running over a TCP stream.
#[derive(Debug)]
pub struct Connection {
    /// Queue pair handle.
    pub qpair: QueuePair,
    /// Capsules and errors surfaced by the receive task.
    pub events: EventReceiver,
    /// Receive and transmit tasks.
    pub tasks: QueuePairTasks,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Address of the remote end.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Close the queue pair and wait for both tasks to exit.
    pub async fn shutdown(self) {
        self.qpair.close();
        self.tasks.join().await;
    }
}

fn prepare(stream: &TcpStream) -> Result<SocketAddr> {
    // Small capsules must not sit behind Nagle's algorithm.
    stream.set_nodelay(true)?;
    Ok(stream.peer_addr()?)
}

/// Connect to a controller and negotiate as initiator.
pub async fn connect<A: ToSocketAddrs>(addr: A, config: &QueuePairConfig) -> Result<Connection> {
    config.validate()?;
    let stream = TcpStream::connect(addr).await?;
    let peer_addr = prepare(&stream)?;
    debug!(%peer_addr, "connected");

    let (qpair, events, tasks) = QueuePair::initiate(stream, config).await?;
    info!(%peer_addr, "host queue pair ready");
    Ok(Connection {
        qpair,
        events,
        tasks,
        peer_addr,
    })
}

/// Listening socket that accepts host connections.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    config: QueuePairConfig,
}

impl Listener {
    /// Bind to `addr`; accepted connections negotiate with `config`.
    pub async fn bind<A: ToSocketAddrs>(addr: A, config: QueuePairConfig) -> Result<Self> {
        config.validate()?;
        let inner = TcpListener::bind(addr).await?;
        Ok(Self { inner, config })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Configuration offered to accepted hosts.
    pub fn config(&self) -> &QueuePairConfig {
        &self.config
    }

    /// Accept the next host and negotiate as target.
    ///
    /// A failed negotiation fails only this call; the listener stays usable.
    pub async fn accept(&self) -> Result<Connection> {
        let (stream, peer_addr) = self.inner.accept().await?;
        prepare(&stream)?;
        debug!(%peer_addr, "accepted");

        let (qpair, events, tasks) = QueuePair::accept(stream, &self.config).await?;
        info!(%peer_addr, "controller queue pair ready");
        Ok(Connection {
            qpair,
            events,
            tasks,
            peer_addr,
        })
    }
}
