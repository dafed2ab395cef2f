//! Queue pair engine.
//!
//! A queue pair owns one byte stream after negotiation. Its receive task
//! validates and dispatches PDUs; its transmit task drains the transmit
//! queue. The command layer submits capsules, moves command data, and
//! receives [`QueuePairEvent`]s.
//!
//! ```text
//!  command layer ──submit──> transmit queue ──> transmit task ──> stream
//!        ^                                                          |
//!        └──── events <── dispatch <── receive task <───────────────┘
//! ```

mod engine;
mod io;
pub mod negotiate;
mod params;
mod state;
mod transfer;

pub use engine::{EventReceiver, QueuePairEvent};
pub use io::QueuePairTasks;
pub use params::{QueuePairConfig, QueuePairConfigBuilder, QueuePairParams, pda_to_alignment};
pub use state::ConnectionPhase;
pub use transfer::DataTransferStatus;

pub(crate) use engine::Shared;

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::capsule::{Capsule, CapsuleKind, Cqe, Sqe};
use crate::core::*;

/// Handle to a running queue pair. Cheap to clone.
#[derive(Debug, Clone)]
pub struct QueuePair {
    shared: Arc<Shared>,
}

impl QueuePair {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Start a queue pair over a negotiated `stream`.
    ///
    /// Spawns the receive and transmit tasks on the current tokio runtime.
    /// Fails without spawning anything if `params` do not validate.
    pub fn spawn<S>(
        stream: S,
        params: QueuePairParams,
    ) -> Result<(Self, EventReceiver, QueuePairTasks)>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        params.validate()?;
        let (shared, events) = Shared::new(params);
        let tasks = io::spawn(Arc::clone(&shared), stream);
        Ok((Self { shared }, events, tasks))
    }

    /// Negotiate as initiator over `stream`, then start the queue pair.
    pub async fn initiate<S>(
        mut stream: S,
        config: &QueuePairConfig,
    ) -> Result<(Self, EventReceiver, QueuePairTasks)>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let params = negotiate::initiate(&mut stream, config).await?;
        Self::spawn(stream, params)
    }

    /// Negotiate as target over `stream`, then start the queue pair.
    pub async fn accept<S>(
        mut stream: S,
        config: &QueuePairConfig,
    ) -> Result<(Self, EventReceiver, QueuePairTasks)>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let params = negotiate::accept(&mut stream, config).await?;
        Self::spawn(stream, params)
    }

    /// Negotiated parameters.
    pub fn params(&self) -> &QueuePairParams {
        &self.shared.params
    }

    /// Side this queue pair plays.
    pub fn role(&self) -> Role {
        self.shared.params.role
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.shared.phase()
    }

    /// New command capsule for this queue pair.
    pub fn command(&self, sqe: Sqe) -> Capsule {
        Capsule::new(Arc::clone(&self.shared), CapsuleKind::Command(sqe))
    }

    /// New response capsule for this queue pair.
    pub fn response(&self, cqe: Cqe) -> Capsule {
        Capsule::new(Arc::clone(&self.shared), CapsuleKind::Response(cqe))
    }

    fn check_capsule(&self, capsule: &Capsule) -> Result<()> {
        if !Arc::ptr_eq(capsule.shared(), &self.shared) {
            return Err(QueuePairError::InvalidCapsule(
                "capsule belongs to another queue pair",
            ));
        }
        self.shared.ensure_established()
    }

    /// Queue a capsule for transmission.
    ///
    /// An initiator submits commands; write data up to the in-capsule limit
    /// is copied into the command PDU and its memory descriptor completed
    /// right away. Larger writes and all reads register a command buffer
    /// that completes when the transfer ends or the response arrives.
    ///
    /// A target submits responses.
    pub fn submit(&self, capsule: Capsule) -> Result<()> {
        self.check_capsule(&capsule)?;
        match (self.role(), *capsule.kind()) {
            (Role::Initiator, CapsuleKind::Command(sqe)) => {
                self.shared.submit_command(capsule, sqe)
            }
            (Role::Target, CapsuleKind::Response(cqe)) => {
                self.shared.submit_response(capsule, cqe);
                Ok(())
            }
            (Role::Initiator, CapsuleKind::Response(_)) => Err(QueuePairError::InvalidCapsule(
                "initiator cannot send a response",
            )),
            (Role::Target, CapsuleKind::Command(_)) => Err(QueuePairError::InvalidCapsule(
                "target cannot send a command",
            )),
        }
    }

    fn check_target_command(&self, capsule: &Capsule) -> Result<()> {
        if !self.role().is_target() || !capsule.is_command() {
            return Err(QueuePairError::InvalidCapsule(
                "data transfers need a received command on a target",
            ));
        }
        self.check_capsule(capsule)
    }

    /// Target: receive `len` bytes of the command's data, starting at
    /// `data_offset`, into `mem`.
    ///
    /// Copies from in-capsule data when the command carried some, otherwise
    /// solicits the data with an R2T. `mem` is completed when the transfer
    /// finishes, fails or is cancelled.
    pub fn request_data_transfer(
        &self,
        capsule: &Arc<Capsule>,
        data_offset: u32,
        len: u32,
        mem: Arc<dyn MemoryDescriptor>,
    ) -> Result<()> {
        self.check_target_command(capsule)?;
        self.shared
            .request_data_transfer(capsule, data_offset, len, mem);
        Ok(())
    }

    /// Target: send `data` as the command's data starting at `data_offset`.
    pub fn provide_data_transfer(
        &self,
        capsule: &Capsule,
        data_offset: u32,
        data: Bytes,
    ) -> Result<DataTransferStatus> {
        self.check_target_command(capsule)?;
        self.shared
            .provide_data_transfer(capsule, data_offset, data)
    }

    /// Number of transfer tags in use (target).
    pub fn active_tags(&self) -> usize {
        self.shared.rx.lock().tags.active()
    }

    /// Transfers waiting for a tag (target) or read buffers awaiting data
    /// (initiator).
    pub fn queued_receive_buffers(&self) -> usize {
        self.shared.rx.lock().list.len()
    }

    /// Write buffers awaiting R2Ts (initiator).
    pub fn queued_transmit_buffers(&self) -> usize {
        self.shared.tx_buffers.lock().len()
    }

    /// Close the queue pair, cancelling every outstanding transfer.
    pub fn close(&self) {
        self.shared.teardown(None);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::pdu::{Framing, Pdu, ReceivedPdu, encode};

    pub(crate) fn with_config(role: Role, config: &QueuePairConfig) -> (QueuePair, EventReceiver) {
        let (shared, events) = Shared::new(QueuePairParams::from_config(role, config));
        (QueuePair::from_shared(shared), events)
    }

    pub(crate) fn target() -> (QueuePair, EventReceiver) {
        with_config(Role::Target, &QueuePairConfig::default())
    }

    pub(crate) fn initiator() -> (QueuePair, EventReceiver) {
        with_config(Role::Initiator, &QueuePairConfig::default())
    }

    /// Feed `pdu` as if the peer had sent it.
    pub(crate) fn deliver(qpair: &QueuePair, pdu: &Pdu) -> std::result::Result<(), PduError> {
        let framing: Framing = *qpair.shared.rx_framing();
        let raw = encode(pdu, &framing);
        let received = ReceivedPdu::decode(raw, qpair.role(), &framing)?;
        qpair.shared.dispatch(received)
    }

    /// Drain the transmit queue, decoded as the peer would.
    pub(crate) fn sent(qpair: &QueuePair) -> Vec<ReceivedPdu> {
        let peer = match qpair.role() {
            Role::Initiator => Role::Target,
            Role::Target => Role::Initiator,
        };
        let framing = qpair.params().tx_framing();
        std::iter::from_fn(|| qpair.shared.next_transmit())
            .map(|raw| ReceivedPdu::decode(raw, peer, &framing).expect("valid pdu"))
            .collect()
    }
}
