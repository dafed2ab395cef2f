//! Command and response capsules.
//!
//! A capsule is shared through `Arc`. It keeps its queue pair alive, and
//! every command buffer keeps its capsule alive, so a received PDU stays
//! valid until the last transfer that reads from it is released.

mod entry;

pub use entry::*;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;

use crate::core::*;
use crate::pdu::ReceivedPdu;
use crate::qpair::{QueuePair, Shared};

/// Queue entry carried by a capsule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapsuleKind {
    /// Submission queue entry.
    Command(Sqe),
    /// Completion queue entry.
    Response(Cqe),
}

/// Outbound data attached by the command layer.
#[derive(Clone)]
pub(crate) struct CapsuleData {
    pub(crate) mem: Arc<dyn MemoryDescriptor>,
    pub(crate) len: u32,
    /// Host to controller.
    pub(crate) send: bool,
}

/// A command or response envelope bound to one queue pair.
pub struct Capsule {
    qpair: Arc<Shared>,
    kind: CapsuleKind,
    data: Option<CapsuleData>,
    rx_pdu: Option<ReceivedPdu>,
    active_r2ts: AtomicU32,
    #[cfg(debug_assertions)]
    pending_r2ts: AtomicU32,
}

impl Capsule {
    pub(crate) fn new(qpair: Arc<Shared>, kind: CapsuleKind) -> Self {
        Self {
            qpair,
            kind,
            data: None,
            rx_pdu: None,
            active_r2ts: AtomicU32::new(0),
            #[cfg(debug_assertions)]
            pending_r2ts: AtomicU32::new(0),
        }
    }

    /// Capsule admitted from a received PDU.
    pub(crate) fn received(qpair: Arc<Shared>, kind: CapsuleKind, pdu: Option<ReceivedPdu>) -> Self {
        Self {
            rx_pdu: pdu,
            ..Self::new(qpair, kind)
        }
    }

    /// Attach `len` bytes of command data held by `mem`.
    ///
    /// `send` is true when the data moves from host to controller.
    pub fn with_data(mut self, mem: Arc<dyn MemoryDescriptor>, len: u32, send: bool) -> Self {
        self.data = Some(CapsuleData { mem, len, send });
        self
    }

    /// Queue entry.
    pub fn kind(&self) -> &CapsuleKind {
        &self.kind
    }

    /// Submission entry, for command capsules.
    pub fn sqe(&self) -> Option<&Sqe> {
        match &self.kind {
            CapsuleKind::Command(sqe) => Some(sqe),
            CapsuleKind::Response(_) => None,
        }
    }

    /// Completion entry, for response capsules.
    pub fn cqe(&self) -> Option<&Cqe> {
        match &self.kind {
            CapsuleKind::Response(cqe) => Some(cqe),
            CapsuleKind::Command(_) => None,
        }
    }

    /// Command identifier of the entry.
    pub fn cid(&self) -> u16 {
        match &self.kind {
            CapsuleKind::Command(sqe) => sqe.cid(),
            CapsuleKind::Response(cqe) => cqe.cid(),
        }
    }

    /// Check if this is a command capsule.
    pub fn is_command(&self) -> bool {
        matches!(self.kind, CapsuleKind::Command(_))
    }

    /// Queue pair the capsule belongs to.
    pub fn qpair(&self) -> QueuePair {
        QueuePair::from_shared(Arc::clone(&self.qpair))
    }

    /// In-capsule data of a received command, if any.
    pub fn in_capsule_data(&self) -> Option<Bytes> {
        self.rx_pdu
            .as_ref()
            .filter(|pdu| pdu.data_len() > 0)
            .map(ReceivedPdu::data)
    }

    /// Length of the command's data as described by its SGL.
    pub fn data_len(&self) -> u32 {
        self.sqe().map_or(0, Sqe::sgl_length)
    }

    /// Tagged transfers of this command with an outstanding R2T.
    pub fn active_r2ts(&self) -> u32 {
        self.active_r2ts.load(Ordering::Acquire)
    }

    /// Transfers of this command waiting for a transfer tag.
    #[cfg(debug_assertions)]
    pub fn pending_r2ts(&self) -> u32 {
        self.pending_r2ts.load(Ordering::Acquire)
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.qpair
    }

    pub(crate) fn data(&self) -> Option<&CapsuleData> {
        self.data.as_ref()
    }

    pub(crate) fn r2t_started(&self) {
        self.active_r2ts.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn r2t_finished(&self) {
        let prev = self.active_r2ts.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
    }

    pub(crate) fn r2t_queued(&self) {
        #[cfg(debug_assertions)]
        self.pending_r2ts.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn r2t_dequeued(&self) {
        #[cfg(debug_assertions)]
        self.pending_r2ts.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for Capsule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capsule")
            .field("kind", &self.kind)
            .field("data_len", &self.data.as_ref().map(|data| data.len))
            .field("icd_len", &self.rx_pdu.as_ref().map(ReceivedPdu::data_len))
            .field("active_r2ts", &self.active_r2ts())
            .finish()
    }
}
