//! Ordered collection of command buffers keyed by (cid, ttag).

use std::collections::VecDeque;
use std::sync::Arc;

use super::CommandBuffer;
use crate::capsule::Capsule;

/// Buffers in insertion order.
///
/// On the initiator this holds every registered buffer with ttag 0. On the
/// target the receive list is the FIFO of buffers waiting for a transfer tag.
#[derive(Debug, Default)]
pub(crate) struct BufferList {
    buffers: VecDeque<Arc<CommandBuffer>>,
}

impl BufferList {
    pub(crate) fn add(&mut self, cb: Arc<CommandBuffer>) {
        self.buffers.push_back(cb);
    }

    pub(crate) fn find(&self, cid: u16, ttag: u16) -> Option<&Arc<CommandBuffer>> {
        self.buffers
            .iter()
            .find(|cb| cb.cid() == cid && cb.ttag() == ttag)
    }

    pub(crate) fn remove(&mut self, cid: u16, ttag: u16) -> Option<Arc<CommandBuffer>> {
        let at = self
            .buffers
            .iter()
            .position(|cb| cb.cid() == cid && cb.ttag() == ttag)?;
        self.buffers.remove(at)
    }

    /// Remove every buffer of command `cid`.
    pub(crate) fn purge(&mut self, cid: u16) -> Vec<Arc<CommandBuffer>> {
        let mut purged = Vec::new();
        self.buffers.retain(|cb| {
            if cb.cid() == cid {
                purged.push(Arc::clone(cb));
                false
            } else {
                true
            }
        });
        purged
    }

    /// Remove the first buffer matching `pred`.
    pub(crate) fn take_first(
        &mut self,
        pred: impl Fn(&CommandBuffer) -> bool,
    ) -> Option<Arc<CommandBuffer>> {
        let at = self.buffers.iter().position(|cb| pred(cb.as_ref()))?;
        self.buffers.remove(at)
    }

    /// Check if a buffer of `capsule` is queued.
    pub(crate) fn holds_capsule(&self, capsule: &Arc<Capsule>) -> bool {
        self.buffers
            .iter()
            .any(|cb| Arc::ptr_eq(cb.capsule(), capsule))
    }

    pub(crate) fn take_all(&mut self) -> Vec<Arc<CommandBuffer>> {
        self.buffers.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::VecMemory;
    use crate::capsule::Sqe;
    use crate::core::TransferError;
    use crate::qpair::testing;

    #[test]
    fn test_find_remove_purge() {
        let (qpair, _events) = testing::initiator();
        let a = Arc::new(qpair.command(Sqe::new(0x01, 1)));
        let b = Arc::new(qpair.command(Sqe::new(0x02, 2)));
        let mems: Vec<_> = (0..3).map(|_| VecMemory::new(8)).collect();

        let mut list = BufferList::default();
        list.add(CommandBuffer::new(a.clone(), mems[0].clone(), 0, 8));
        list.add(CommandBuffer::new(b.clone(), mems[1].clone(), 0, 8));
        list.add(CommandBuffer::new(a.clone(), mems[2].clone(), 8, 8));
        assert_eq!(list.len(), 3);
        assert!(list.holds_capsule(&b));

        assert_eq!(list.find(2, 0).map(|cb| cb.cid()), Some(2));
        assert!(list.find(2, 1).is_none());
        assert!(list.find(3, 0).is_none());

        let purged = list.purge(1);
        assert_eq!(purged.len(), 2);
        assert_eq!(list.len(), 1);
        assert!(mems[0].completion().is_none());
        drop(purged);
        assert_eq!(mems[0].completion().map(|c| c.status), Some(Ok(())));

        let removed = list.remove(2, 0).unwrap();
        removed.fail(TransferError::Cancelled);
        drop(removed);
        assert_eq!(list.len(), 0);
        assert!(!list.holds_capsule(&b));
        assert_eq!(
            mems[1].completion().map(|c| c.status),
            Some(Err(TransferError::Cancelled))
        );
    }

    #[test]
    fn test_take_first_is_fifo() {
        let (qpair, _events) = testing::target();
        let a = Arc::new(qpair.command(Sqe::new(0x01, 1)));
        let b = Arc::new(qpair.command(Sqe::new(0x01, 2)));

        let mut list = BufferList::default();
        for (capsule, offset) in [(&a, 0), (&b, 0), (&a, 4096), (&b, 4096)] {
            list.add(CommandBuffer::new(
                capsule.clone(),
                VecMemory::new(4096),
                offset,
                4096,
            ));
        }

        let next = list.take_first(|cb| cb.cid() == 2).unwrap();
        assert_eq!((next.cid(), next.data_offset()), (2, 0));
        let next = list.take_first(|_| true).unwrap();
        assert_eq!((next.cid(), next.data_offset()), (1, 0));
        assert_eq!(list.take_all().len(), 2);
        assert!(list.take_first(|_| true).is_none());
    }
}
