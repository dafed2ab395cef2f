//! Receive and transmit tasks.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::engine::Shared;
use crate::core::*;
use crate::pdu::{CommonHeader, PduHeader, ReceivedPdu, validate_header};

/// Handles of a queue pair's receive and transmit tasks.
#[derive(Debug)]
pub struct QueuePairTasks {
    receiver: JoinHandle<()>,
    transmitter: JoinHandle<()>,
}

impl QueuePairTasks {
    /// Wait for both tasks to finish.
    pub async fn join(self) {
        if let Err(e) = self.receiver.await {
            warn!(error = %e, "receive task panicked");
        }
        if let Err(e) = self.transmitter.await {
            warn!(error = %e, "transmit task panicked");
        }
    }

    /// Abort both tasks without teardown.
    pub fn abort(&self) {
        self.receiver.abort();
        self.transmitter.abort();
    }

    /// Check if both tasks have finished.
    pub fn is_finished(&self) -> bool {
        self.receiver.is_finished() && self.transmitter.is_finished()
    }
}

/// Split `stream` and start both tasks.
pub(crate) fn spawn<S>(shared: Arc<Shared>, stream: S) -> QueuePairTasks
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let receiver = tokio::spawn(run_receiver(Arc::clone(&shared), reader));
    let transmitter = tokio::spawn(run_transmitter(shared, writer));
    QueuePairTasks {
        receiver,
        transmitter,
    }
}

/// Why the receive loop stopped.
enum Exit {
    /// Local close.
    Shutdown,
    /// Protocol violation; `header` is the offending header.
    Violation { error: PduError, header: Vec<u8> },
    /// Peer sent a termination request.
    Terminated { fes: u16, fei: u32 },
    /// Peer closed the stream.
    Reset,
    Io(io::Error),
}

impl From<io::Error> for Exit {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::Reset
        } else {
            Self::Io(e)
        }
    }
}

async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn run_receiver<R>(shared: Arc<Shared>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut shutdown = shared.subscribe_shutdown();
    let exit = tokio::select! {
        exit = receive_loop(&shared, &mut reader) => exit,
        _ = wait_shutdown(&mut shutdown) => Exit::Shutdown,
    };

    match exit {
        Exit::Shutdown => shared.teardown(None),
        Exit::Violation { error, header } => {
            warn!(%error, fes = error.reason().as_u16(), fei = error.fei(), "protocol violation");
            shared.terminate(&error, &header);
            let timeout = shared.params.term_close_timeout;
            tokio::select! {
                closed = tokio::time::timeout(timeout, drain(&mut reader)) => {
                    if closed.is_err() {
                        debug!(?timeout, "peer did not close after termination request");
                    }
                }
                _ = wait_shutdown(&mut shutdown) => {}
            }
            shared.teardown(Some(QueuePairError::Protocol(error)));
        }
        Exit::Terminated { fes, fei } => {
            warn!(fes, fei, "terminated by peer");
            shared.teardown(Some(QueuePairError::Terminated { fes, fei }));
        }
        Exit::Reset => shared.teardown(Some(QueuePairError::ConnectionReset)),
        Exit::Io(e) => shared.teardown(Some(QueuePairError::Io(e))),
    }
}

/// Read PDUs until something stops the connection.
async fn receive_loop<R>(shared: &Arc<Shared>, reader: &mut R) -> Exit
where
    R: AsyncRead + Unpin,
{
    let role = shared.params.role;
    let framing = *shared.rx_framing();
    loop {
        let mut ch = [0u8; COMMON_HEADER_SIZE];
        if let Err(e) = reader.read_exact(&mut ch).await {
            return e.into();
        }
        let common = CommonHeader::from_bytes(&ch);
        let layout = match validate_header(&common, role, &framing) {
            Ok(layout) => layout,
            Err(error) => {
                return Exit::Violation {
                    error,
                    header: ch.to_vec(),
                };
            }
        };

        let mut raw = BytesMut::zeroed(layout.plen);
        raw[..COMMON_HEADER_SIZE].copy_from_slice(&ch);
        if let Err(e) = reader.read_exact(&mut raw[COMMON_HEADER_SIZE..]).await {
            return e.into();
        }
        let raw = raw.freeze();
        let pdu = match ReceivedPdu::from_parts(raw.clone(), layout) {
            Ok(pdu) => pdu,
            Err(error) => {
                return Exit::Violation {
                    error,
                    header: raw[..layout.header_end()].to_vec(),
                };
            }
        };
        trace!(kind = ?layout.kind, plen = layout.plen, "received pdu");

        if let PduHeader::H2CTermReq(term) | PduHeader::C2HTermReq(term) = pdu.header() {
            return Exit::Terminated {
                fes: term.fes,
                fei: term.fei,
            };
        }
        let header = pdu.header_bytes().to_vec();
        if let Err(error) = shared.dispatch(pdu) {
            return Exit::Violation { error, header };
        }
    }
}

/// Discard input until the peer closes.
async fn drain<R>(reader: &mut R)
where
    R: AsyncRead + Unpin,
{
    let mut scratch = [0u8; 4096];
    loop {
        match reader.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

async fn run_transmitter<W>(shared: Arc<Shared>, writer: W)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    let mut shutdown = shared.subscribe_shutdown();
    if let Err(e) = transmit_loop(&shared, &mut writer, &mut shutdown).await {
        shared.teardown(Some(QueuePairError::Io(e)));
    }
    // A peer that stopped reading must not hold the task past teardown.
    let timeout = shared.params.term_close_timeout;
    match tokio::time::timeout(timeout, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!(error = %e, "stream shutdown"),
        Err(_) => debug!(?timeout, "stream shutdown abandoned"),
    }
}

/// Write queued PDUs in order, flushing whenever the queue runs dry.
///
/// Returns as soon as shutdown is signalled, abandoning a write or flush
/// the peer is not draining.
async fn transmit_loop<W>(
    shared: &Shared,
    writer: &mut BufWriter<W>,
    shutdown: &mut watch::Receiver<bool>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        if *shutdown.borrow_and_update() {
            return Ok(());
        }
        match shared.next_transmit() {
            Some(pdu) => {
                trace!(len = pdu.len(), "write pdu");
                tokio::select! {
                    written = writer.write_all(&pdu) => written?,
                    _ = wait_shutdown(shutdown) => return Ok(()),
                }
            }
            None => {
                tokio::select! {
                    flushed = writer.flush() => flushed?,
                    _ = wait_shutdown(shutdown) => return Ok(()),
                }
                tokio::select! {
                    _ = shared.tx_ready.notified() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
