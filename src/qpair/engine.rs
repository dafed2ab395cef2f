//! Queue pair state shared by the receive task, the transmit task and
//! command layer callers.
//!
//! Locks, in acquisition order:
//!
//! ```text
//! rx (receive list + tag table) ──┐
//!                                 ├──> txq ──> phase
//! tx_buffers ─────────────────────┘
//! ```
//!
//! Buffers removed from a collection are dropped only after the lock that
//! guarded them is released; dropping the last reference completes the
//! memory descriptor.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, info, trace, warn};

use super::params::QueuePairParams;
use super::state::ConnectionPhase;
use crate::buffer::{BufferList, CommandBuffer, TagTable};
use crate::capsule::{Capsule, CapsuleKind, Cqe, Sqe, Status};
use crate::core::*;
use crate::pdu::{
    Framing, Pdu, PduHeader, R2tHeader, ReceivedPdu, construct_pdu, encode, term_req,
};

/// Event surfaced to the command layer.
#[derive(Debug)]
pub enum QueuePairEvent {
    /// A command (target) or response (initiator) arrived.
    CapsuleReceived(Arc<Capsule>),
    /// The connection failed. No further events follow.
    Error(QueuePairError),
}

/// Receiving end of a queue pair's events.
pub type EventReceiver = mpsc::UnboundedReceiver<QueuePairEvent>;

/// Receive buffers and the tag table share one lock.
#[derive(Debug)]
pub(crate) struct RxBuffers {
    pub(crate) list: BufferList,
    pub(crate) tags: TagTable,
}

/// Entry of the transmit queue.
pub(crate) enum TxItem {
    /// Encoded PDU.
    Pdu(Bytes),
    /// Capsule PDU, encoded when it reaches the head of the queue.
    Capsule { capsule: Arc<Capsule>, pdu: Pdu },
}

pub(crate) struct Shared {
    pub(crate) params: QueuePairParams,
    rx_framing: Framing,
    tx_framing: Framing,
    pub(crate) rx: Mutex<RxBuffers>,
    pub(crate) tx_buffers: Mutex<BufferList>,
    txq: Mutex<VecDeque<TxItem>>,
    pub(crate) tx_ready: Notify,
    shutdown: watch::Sender<bool>,
    phase: Mutex<ConnectionPhase>,
    events: mpsc::UnboundedSender<QueuePairEvent>,
}

impl Shared {
    pub(crate) fn new(params: QueuePairParams) -> (Arc<Self>, EventReceiver) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Self {
            params,
            rx_framing: params.rx_framing(),
            tx_framing: params.tx_framing(),
            rx: Mutex::new(RxBuffers {
                list: BufferList::default(),
                tags: TagTable::new(params.num_ttags),
            }),
            tx_buffers: Mutex::new(BufferList::default()),
            txq: Mutex::new(VecDeque::new()),
            tx_ready: Notify::new(),
            shutdown,
            phase: Mutex::new(ConnectionPhase::Established),
            events,
        });
        (shared, event_rx)
    }

    pub(crate) fn rx_framing(&self) -> &Framing {
        &self.rx_framing
    }

    pub(crate) fn phase(&self) -> ConnectionPhase {
        *self.phase.lock()
    }

    pub(crate) fn ensure_established(&self) -> Result<()> {
        if self.phase().is_established() {
            Ok(())
        } else {
            Err(QueuePairError::Closed)
        }
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn emit(&self, event: QueuePairEvent) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }

    /// Append to the transmit queue. Dropped once the connection stops
    /// being established.
    pub(crate) fn enqueue(&self, item: TxItem) {
        {
            let mut txq = self.txq.lock();
            if !self.phase().is_established() {
                return;
            }
            txq.push_back(item);
        }
        self.tx_ready.notify_one();
    }

    pub(crate) fn enqueue_pdu(&self, pdu: &Pdu) {
        trace!(kind = ?pdu.pdu_type(), len = pdu.data.len(), "queue pdu");
        self.enqueue(TxItem::Pdu(encode(pdu, &self.tx_framing)));
    }

    /// Append several PDUs back to back.
    pub(crate) fn enqueue_pdus(&self, pdus: &[Pdu]) {
        let encoded: Vec<_> = pdus
            .iter()
            .map(|pdu| encode(pdu, &self.tx_framing))
            .collect();
        {
            let mut txq = self.txq.lock();
            if !self.phase().is_established() {
                return;
            }
            txq.extend(encoded.into_iter().map(TxItem::Pdu));
        }
        self.tx_ready.notify_one();
    }

    /// Pop the next PDU to write.
    pub(crate) fn next_transmit(&self) -> Option<Bytes> {
        let item = self.txq.lock().pop_front()?;
        let bytes = match item {
            TxItem::Pdu(bytes) => bytes,
            TxItem::Capsule { capsule, pdu } => {
                trace!(cid = capsule.cid(), kind = ?pdu.pdu_type(), "encode capsule");
                construct_pdu(&pdu.header, pdu.flags, &pdu.data, &self.tx_framing)
            }
        };
        Some(bytes)
    }

    /// Replace whatever is queued with a termination request.
    pub(crate) fn terminate(&self, error: &PduError, offending: &[u8]) {
        let pdu = term_req(self.params.role, error, offending);
        let dropped = {
            let mut txq = self.txq.lock();
            let mut phase = self.phase.lock();
            if phase.is_torn_down() {
                return;
            }
            *phase = phase.terminate();
            let dropped = std::mem::take(&mut *txq);
            txq.push_back(TxItem::Pdu(pdu));
            dropped
        };
        debug!(dropped = dropped.len(), "termination request queued");
        drop(dropped);
        self.tx_ready.notify_one();
    }

    /// Fail every outstanding buffer and queued capsule and stop both tasks.
    ///
    /// Runs once; later calls are ignored.
    pub(crate) fn teardown(&self, error: Option<QueuePairError>) {
        {
            let mut phase = self.phase.lock();
            if phase.is_torn_down() {
                return;
            }
            *phase = phase.tear_down(error.is_some());
        }
        self.shutdown.send_replace(true);

        let mut cancelled = {
            let mut rx = self.rx.lock();
            let mut cancelled = rx.list.take_all();
            if self.params.role.is_target() {
                for cb in &cancelled {
                    cb.capsule().r2t_dequeued();
                }
            }
            cancelled.extend(rx.tags.drain());
            cancelled
        };
        cancelled.extend(self.tx_buffers.lock().take_all());
        let queued = std::mem::take(&mut *self.txq.lock());

        for cb in &cancelled {
            cb.fail(TransferError::Cancelled);
        }
        match &error {
            Some(error) => warn!(
                role = ?self.params.role,
                cancelled = cancelled.len(),
                queued = queued.len(),
                %error,
                "queue pair failed"
            ),
            None => info!(
                role = ?self.params.role,
                cancelled = cancelled.len(),
                queued = queued.len(),
                "queue pair closed"
            ),
        }
        drop(cancelled);
        drop(queued);

        if let Some(error) = error {
            self.emit(QueuePairEvent::Error(error));
        }
    }

    /// Dispatch a validated PDU by kind.
    pub(crate) fn dispatch(self: &Arc<Self>, pdu: ReceivedPdu) -> Result<(), PduError> {
        match pdu.header().clone() {
            PduHeader::CapsuleCmd(sqe) => self.handle_command(pdu, sqe),
            PduHeader::CapsuleResp(cqe) => {
                self.handle_response(pdu, cqe);
                Ok(())
            }
            PduHeader::H2CData(hdr) => self.handle_h2c_data(&pdu, hdr),
            PduHeader::C2HData(hdr) => self.handle_c2h_data(&pdu, hdr),
            PduHeader::R2T(hdr) => self.handle_r2t(hdr),
            PduHeader::IcReq(_)
            | PduHeader::IcResp(_)
            | PduHeader::H2CTermReq(_)
            | PduHeader::C2HTermReq(_) => Err(PduError::SequenceError),
        }
    }

    fn handle_command(self: &Arc<Self>, pdu: ReceivedPdu, sqe: Sqe) -> Result<(), PduError> {
        let icd_len = pdu.data_len();
        if icd_len > self.params.max_icd as usize {
            return Err(PduError::OutOfRange);
        }
        if icd_len > 0 && !pdu.data_digest_ok() {
            warn!(cid = sqe.cid(), "in-capsule data digest mismatch");
            self.enqueue_pdu(&Pdu::new(PduHeader::CapsuleResp(Cqe::new(
                sqe.cid(),
                Status::TRANSIENT_TRANSPORT_ERROR,
            ))));
            return Ok(());
        }

        debug!(cid = sqe.cid(), opcode = sqe.opcode(), icd_len, "command received");
        let capsule = Capsule::received(Arc::clone(self), CapsuleKind::Command(sqe), Some(pdu));
        self.emit(QueuePairEvent::CapsuleReceived(Arc::new(capsule)));
        Ok(())
    }

    /// Purge the command's buffers, then surface the response. Nothing for
    /// the command can complete after its response.
    fn handle_response(self: &Arc<Self>, pdu: ReceivedPdu, cqe: Cqe) {
        let cid = cqe.cid();
        let mut purged = self.rx.lock().list.purge(cid);
        purged.extend(self.tx_buffers.lock().purge(cid));
        debug!(cid, status = ?cqe.status(), purged = purged.len(), "response received");
        drop(purged);

        let capsule = Capsule::received(Arc::clone(self), CapsuleKind::Response(cqe), Some(pdu));
        self.emit(QueuePairEvent::CapsuleReceived(Arc::new(capsule)));
    }

    /// Send an R2T for the whole range of a tagged buffer.
    pub(crate) fn send_r2t(&self, cb: &CommandBuffer) {
        debug!(
            cid = cb.cid(),
            ttag = cb.ttag(),
            offset = cb.data_offset(),
            len = cb.data_len(),
            "r2t"
        );
        self.enqueue_pdu(&Pdu::new(PduHeader::R2T(R2tHeader {
            cccid: cb.cid(),
            ttag: cb.ttag(),
            r2to: cb.data_offset(),
            r2tl: cb.data_len(),
        })));
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("params", &self.params)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
