//! Transfer tag table (target side).

use std::sync::Arc;

use super::CommandBuffer;

/// Fixed-size array of transfer tags with a rotating allocation cursor.
///
/// A buffer holding a tag is reachable from its slot only. The owning
/// capsule's active R2T count and the table's active count move together.
#[derive(Debug)]
pub(crate) struct TagTable {
    slots: Vec<Option<Arc<CommandBuffer>>>,
    cursor: usize,
    active: usize,
}

impl TagTable {
    pub(crate) fn new(num_ttags: u16) -> Self {
        Self {
            slots: vec![None; usize::from(num_ttags)],
            cursor: 0,
            active: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn active(&self) -> usize {
        self.active
    }

    pub(crate) fn is_full(&self) -> bool {
        self.active == self.slots.len()
    }

    /// Bind `cb` to a free tag and return it.
    pub(crate) fn allocate(&mut self, cb: Arc<CommandBuffer>) -> Option<u16> {
        if self.is_full() {
            return None;
        }
        let len = self.slots.len();
        let at = (0..len)
            .map(|step| (self.cursor + step) % len)
            .find(|&at| self.slots[at].is_none())?;

        let ttag = at as u16;
        cb.set_ttag(ttag);
        cb.capsule().r2t_started();
        self.slots[at] = Some(cb);
        self.cursor = (at + 1) % len;
        self.active += 1;
        Some(ttag)
    }

    pub(crate) fn get(&self, ttag: u16) -> Option<&Arc<CommandBuffer>> {
        self.slots.get(usize::from(ttag))?.as_ref()
    }

    /// Free `ttag` and hand back the buffer that held it.
    pub(crate) fn release(&mut self, ttag: u16) -> Option<Arc<CommandBuffer>> {
        let cb = self.slots.get_mut(usize::from(ttag))?.take()?;
        cb.capsule().r2t_finished();
        self.active -= 1;
        Some(cb)
    }

    /// Free every tag.
    pub(crate) fn drain(&mut self) -> Vec<Arc<CommandBuffer>> {
        let drained: Vec<_> = self.slots.iter_mut().filter_map(Option::take).collect();
        for cb in &drained {
            cb.capsule().r2t_finished();
        }
        self.active = 0;
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::VecMemory;
    use crate::capsule::Sqe;
    use crate::qpair::testing;

    #[test]
    fn test_rotating_allocation() {
        let (qpair, _events) = testing::target();
        let capsule = Arc::new(qpair.command(Sqe::new(0x01, 1)));
        let buffer = || CommandBuffer::new(capsule.clone(), VecMemory::new(4), 0, 4);

        let mut tags = TagTable::new(3);
        assert_eq!(tags.capacity(), 3);
        assert_eq!(tags.allocate(buffer()), Some(0));
        assert_eq!(tags.allocate(buffer()), Some(1));
        assert_eq!(capsule.active_r2ts(), 2);

        assert!(tags.release(0).is_some());
        assert!(tags.release(0).is_none());
        // Cursor moves on rather than reusing the tag just freed.
        assert_eq!(tags.allocate(buffer()), Some(2));
        assert_eq!(tags.allocate(buffer()), Some(0));
        assert!(tags.is_full());
        assert_eq!(tags.allocate(buffer()), None);

        assert_eq!(tags.get(2).map(|cb| cb.ttag()), Some(2));
        assert!(tags.get(3).is_none());
        assert!(tags.release(7).is_none());

        assert_eq!(tags.drain().len(), 3);
        assert_eq!(tags.active(), 0);
        assert_eq!(capsule.active_r2ts(), 0);
    }

    #[test]
    fn test_active_never_exceeds_capacity() {
        let (qpair, _events) = testing::target();
        let mut tags = TagTable::new(4);
        let mut live = Vec::new();

        for round in 0..64u16 {
            let capsule = Arc::new(qpair.command(Sqe::new(0x01, round)));
            let cb = CommandBuffer::new(capsule, VecMemory::new(1), 0, 1);
            match tags.allocate(cb) {
                Some(ttag) => live.push(ttag),
                None => {
                    assert!(tags.is_full());
                    let ttag = live.remove(usize::from(round) % live.len());
                    assert!(tags.release(ttag).is_some());
                }
            }
            assert!(tags.active() <= tags.capacity());
            assert_eq!(tags.active(), live.len());
        }
    }
}
