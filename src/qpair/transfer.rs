//! Data transfer orchestration.
//!
//! Initiator: commands carry write data inline when it fits in the
//! in-capsule limit, otherwise a command buffer is registered and the data
//! moves through R2T/H2C (writes) or C2H (reads).
//!
//! Target: received data is copied from in-capsule data or requested with
//! R2Ts, one tag per buffer; sent data goes out as C2H data PDUs.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::engine::{QueuePairEvent, RxBuffers, Shared, TxItem};
use crate::buffer::CommandBuffer;
use crate::capsule::{Capsule, CapsuleKind, Cqe, Sqe, Status};
use crate::core::*;
use crate::pdu::{DataHeader, Pdu, PduFlags, PduHeader, R2tHeader, ReceivedPdu};

/// Outcome of [`QueuePair::provide_data_transfer`](super::QueuePair::provide_data_transfer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataTransferStatus {
    /// Data PDUs queued; the command still needs a response capsule.
    Sent,
    /// The last PDU carries SUCCESS; no response capsule may be sent.
    SuccessSent,
}

fn data_flags(last: bool, success: bool) -> PduFlags {
    match (last, success) {
        (true, true) => PduFlags::LAST_PDU.union(PduFlags::SUCCESS),
        (true, false) => PduFlags::LAST_PDU,
        (false, _) => PduFlags::NONE,
    }
}

impl Shared {
    /// Queue a command, choosing in-capsule data or a command buffer.
    pub(crate) fn submit_command(&self, capsule: Capsule, mut sqe: Sqe) -> Result<()> {
        let capsule = Arc::new(capsule);
        let Some(data) = capsule.data().cloned() else {
            self.enqueue(TxItem::Capsule {
                pdu: Pdu::new(PduHeader::CapsuleCmd(sqe)),
                capsule,
            });
            return Ok(());
        };
        if data.len as usize > data.mem.len() {
            return Err(QueuePairError::InvalidCapsule(
                "data length exceeds memory descriptor",
            ));
        }

        let pdu = if data.len == 0 {
            data.mem.complete(0, Ok(()));
            Pdu::new(PduHeader::CapsuleCmd(sqe))
        } else if data.send && data.len <= self.params.max_icd {
            let mut icd = vec![0u8; data.len as usize];
            let copied = data.mem.read_at(0, &mut icd);
            data.mem
                .complete(if copied.is_ok() { data.len } else { 0 }, copied);
            copied?;
            sqe.set_sgl(SGL_TYPE_ICD, 0, data.len);
            trace!(cid = sqe.cid(), len = data.len, "in-capsule data");
            Pdu::new(PduHeader::CapsuleCmd(sqe)).with_data(Bytes::from(icd))
        } else {
            sqe.set_sgl(SGL_TYPE_COMMAND_BUFFER, 0, data.len);
            let cb = CommandBuffer::new(Arc::clone(&capsule), data.mem, 0, data.len);
            // Teardown drains both lists after moving the phase, so the
            // phase is checked under the list lock.
            let registered = if data.send {
                let mut tx_buffers = self.tx_buffers.lock();
                let open = self.phase().is_established();
                if open {
                    tx_buffers.add(Arc::clone(&cb));
                }
                open
            } else {
                let mut rx = self.rx.lock();
                let open = self.phase().is_established();
                if open {
                    rx.list.add(Arc::clone(&cb));
                }
                open
            };
            if !registered {
                cb.fail(TransferError::Cancelled);
                return Err(QueuePairError::Closed);
            }
            trace!(cid = sqe.cid(), len = data.len, send = data.send, "command buffer");
            Pdu::new(PduHeader::CapsuleCmd(sqe))
        };

        self.enqueue(TxItem::Capsule { capsule, pdu });
        Ok(())
    }

    /// Queue a response capsule.
    pub(crate) fn submit_response(&self, capsule: Capsule, cqe: Cqe) {
        self.enqueue(TxItem::Capsule {
            capsule: Arc::new(capsule),
            pdu: Pdu::new(PduHeader::CapsuleResp(cqe)),
        });
    }

    /// Move `len` bytes of the command's data at `data_offset` into `mem`.
    ///
    /// Problems with the request itself complete `mem` with the error.
    pub(crate) fn request_data_transfer(
        &self,
        capsule: &Arc<Capsule>,
        data_offset: u32,
        len: u32,
        mem: Arc<dyn MemoryDescriptor>,
    ) {
        if let Some(icd) = capsule.in_capsule_data() {
            let copied = region(icd.len(), data_offset as usize, len as usize)
                .and_then(|range| mem.write_at(0, &icd[range]));
            mem.complete(if copied.is_ok() { len } else { 0 }, copied);
            return;
        }

        let end = u64::from(data_offset) + u64::from(len);
        if end > u64::from(capsule.data_len()) || len as usize > mem.len() {
            mem.complete(0, Err(TransferError::OutOfRange));
            return;
        }
        if len == 0 {
            mem.complete(0, Ok(()));
            return;
        }

        let cb = CommandBuffer::new(Arc::clone(capsule), mem, data_offset, len);
        let mut rx = self.rx.lock();
        if !self.phase().is_established() {
            drop(rx);
            cb.fail(TransferError::Cancelled);
            return;
        }
        let admit = capsule.active_r2ts() < self.params.max_outstanding_r2ts()
            && !rx.list.holds_capsule(capsule);
        if admit && rx.tags.allocate(Arc::clone(&cb)).is_some() {
            self.send_r2t(&cb);
            return;
        }

        capsule.r2t_queued();
        rx.list.add(cb);
        debug!(
            cid = capsule.cid(),
            offset = data_offset,
            len,
            pending = rx.list.len(),
            active_tags = rx.tags.active(),
            "transfer pending"
        );
    }

    /// Free `ttag` and grant at most one pending buffer: the next one of the
    /// same command if it has room, otherwise the first one of any command
    /// that has room.
    pub(crate) fn release_tag_and_advance(
        &self,
        rx: &mut RxBuffers,
        ttag: u16,
    ) -> Option<Arc<CommandBuffer>> {
        let released = rx.tags.release(ttag)?;
        let limit = self.params.max_outstanding_r2ts();
        let same = released.capsule();
        let next = rx
            .list
            .take_first(|cb| Arc::ptr_eq(cb.capsule(), same) && cb.capsule().active_r2ts() < limit)
            .or_else(|| rx.list.take_first(|cb| cb.capsule().active_r2ts() < limit));

        if let Some(next) = next {
            next.capsule().r2t_dequeued();
            if rx.tags.allocate(Arc::clone(&next)).is_some() {
                self.send_r2t(&next);
            } else {
                // Unreachable while a slot was just freed; keep it queued.
                next.capsule().r2t_queued();
                rx.list.add(next);
            }
        }
        Some(released)
    }

    /// Queue C2H data PDUs for `data` at `data_offset` of the command's data.
    pub(crate) fn provide_data_transfer(
        &self,
        capsule: &Capsule,
        data_offset: u32,
        data: Bytes,
    ) -> Result<DataTransferStatus> {
        let total = u64::from(capsule.data_len());
        let end = u64::from(data_offset) + data.len() as u64;
        if end > total {
            return Err(TransferError::OutOfRange.into());
        }
        if data.is_empty() {
            return Ok(DataTransferStatus::Sent);
        }

        let last = end == total;
        let success = last && self.params.send_success;
        let chunk = self.params.max_tx_data as usize;
        let count = data.len().div_ceil(chunk);
        let pdus: Vec<_> = (0..count)
            .map(|i| {
                let start = i * chunk;
                let piece = data.slice(start..(start + chunk).min(data.len()));
                let final_piece = i + 1 == count;
                Pdu::new(PduHeader::C2HData(DataHeader {
                    cccid: capsule.cid(),
                    ttag: 0,
                    datao: data_offset + start as u32,
                    datal: piece.len() as u32,
                }))
                .with_flags(data_flags(final_piece && last, final_piece && success))
                .with_data(piece)
            })
            .collect();

        trace!(cid = capsule.cid(), offset = data_offset, len = data.len(), pdus = count, last, success, "c2h data");
        self.enqueue_pdus(&pdus);
        Ok(if success {
            DataTransferStatus::SuccessSent
        } else {
            DataTransferStatus::Sent
        })
    }

    /// Target: data answering an R2T.
    pub(crate) fn handle_h2c_data(
        &self,
        pdu: &ReceivedPdu,
        hdr: DataHeader,
    ) -> Result<(), PduError> {
        let len = pdu.data_len() as u32;
        let (cb, released) = {
            let mut rx = self.rx.lock();
            let cb = rx
                .tags
                .get(hdr.ttag)
                .cloned()
                .ok_or(PduError::field(OFFSET_TTAG))?;
            if cb.cid() != hdr.cccid {
                return Err(PduError::field(OFFSET_CCCID));
            }
            if hdr.datal != len {
                return Err(PduError::field(OFFSET_DATAL));
            }
            if hdr.datal > self.params.max_h2c_data {
                return Err(PduError::LimitExceeded);
            }
            if !cb.contains(hdr.datao, hdr.datal) {
                return Err(PduError::OutOfRange);
            }
            if hdr.datao != cb.expected_offset() {
                return Err(PduError::SequenceError);
            }
            let completes = hdr.datao + hdr.datal == cb.data_offset() + cb.data_len();
            if pdu.flags().is_last_pdu() != completes {
                return Err(PduError::SequenceError);
            }

            cb.advance(len);
            let released = if completes {
                self.release_tag_and_advance(&mut rx, hdr.ttag)
            } else {
                None
            };
            (cb, released)
        };

        if !pdu.data_digest_ok() {
            warn!(cid = hdr.cccid, ttag = hdr.ttag, offset = hdr.datao, "h2c data digest mismatch");
            cb.fail(TransferError::DataDigest);
        } else if let Err(error) = cb.write(hdr.datao, &pdu.data()) {
            cb.fail(error);
        }
        drop(released);
        Ok(())
    }

    /// Initiator: the controller grants a range of a write.
    pub(crate) fn handle_r2t(&self, hdr: R2tHeader) -> Result<(), PduError> {
        let (cb, removed) = {
            let mut tx_buffers = self.tx_buffers.lock();
            let cb = tx_buffers
                .find(hdr.cccid, 0)
                .cloned()
                .ok_or(PduError::field(OFFSET_CCCID))?;
            if hdr.r2to != cb.expected_offset() {
                return Err(PduError::SequenceError);
            }
            if hdr.r2tl == 0 {
                return Err(PduError::field(OFFSET_DATAL));
            }
            if !cb.contains(hdr.r2to, hdr.r2tl) {
                return Err(PduError::OutOfRange);
            }
            let removed = if cb.advance(hdr.r2tl) {
                tx_buffers.remove(hdr.cccid, 0)
            } else {
                None
            };
            (cb, removed)
        };

        debug!(cid = hdr.cccid, ttag = hdr.ttag, offset = hdr.r2to, len = hdr.r2tl, "r2t received");
        self.send_h2c_data(&cb, &hdr);
        drop(removed);
        Ok(())
    }

    /// Answer a grant with H2C data PDUs of at most the negotiated size.
    fn send_h2c_data(&self, cb: &CommandBuffer, r2t: &R2tHeader) {
        let chunk = self.params.h2c_chunk();
        let end = r2t.r2to + r2t.r2tl;
        let mut pdus = Vec::new();
        let mut offset = r2t.r2to;
        while offset < end {
            let len = chunk.min(end - offset);
            let mut payload = vec![0u8; len as usize];
            if let Err(error) = cb.read(offset, &mut payload) {
                cb.fail(error);
                payload.fill(0);
            }
            pdus.push(
                Pdu::new(PduHeader::H2CData(DataHeader {
                    cccid: r2t.cccid,
                    ttag: r2t.ttag,
                    datao: offset,
                    datal: len,
                }))
                .with_flags(data_flags(offset + len == end, false))
                .with_data(Bytes::from(payload)),
            );
            offset += len;
        }
        self.enqueue_pdus(&pdus);
    }

    /// Initiator: read data from the controller.
    pub(crate) fn handle_c2h_data(
        self: &Arc<Self>,
        pdu: &ReceivedPdu,
        hdr: DataHeader,
    ) -> Result<(), PduError> {
        let len = pdu.data_len() as u32;
        let flags = pdu.flags();
        if flags.is_success() && !flags.is_last_pdu() {
            return Err(PduError::field(OFFSET_FLAGS));
        }

        let (cb, removed) = {
            let mut rx = self.rx.lock();
            let cb = rx
                .list
                .find(hdr.cccid, 0)
                .cloned()
                .ok_or(PduError::field(OFFSET_CCCID))?;
            if hdr.datal != len {
                return Err(PduError::field(OFFSET_DATAL));
            }
            if !cb.contains(hdr.datao, hdr.datal) {
                return Err(PduError::OutOfRange);
            }
            if hdr.datao != cb.expected_offset() {
                return Err(PduError::SequenceError);
            }
            cb.advance(len);
            let removed = if flags.is_success() {
                rx.list.remove(hdr.cccid, 0)
            } else {
                None
            };
            (cb, removed)
        };

        if !pdu.data_digest_ok() {
            warn!(cid = hdr.cccid, offset = hdr.datao, "c2h data digest mismatch");
            cb.fail(TransferError::DataDigest);
        } else if let Err(error) = cb.write(hdr.datao, &pdu.data()) {
            cb.fail(error);
        }

        if removed.is_none() {
            return Ok(());
        }
        let status = match cb.error() {
            None => Status::SUCCESS,
            Some(TransferError::DataDigest) => Status::TRANSIENT_TRANSPORT_ERROR,
            Some(_) => Status::DATA_TRANSFER_ERROR,
        };
        drop(removed);
        drop(cb);

        debug!(cid = hdr.cccid, ?status, "completion from c2h success");
        let capsule = Capsule::received(
            Arc::clone(self),
            CapsuleKind::Response(Cqe::new(hdr.cccid, status)),
            None,
        );
        self.emit(QueuePairEvent::CapsuleReceived(Arc::new(capsule)));
        Ok(())
    }
}
