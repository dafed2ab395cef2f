//! One in-flight transfer of command data.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::capsule::Capsule;
use crate::core::*;

#[derive(Debug, Default)]
struct TransferState {
    ttag: u16,
    xfered: u32,
    error: Option<TransferError>,
}

/// Moves `data_len` bytes of a command's data, starting at `data_offset`,
/// in or out of a memory descriptor.
///
/// The descriptor is completed when the last reference is dropped, with the
/// byte count reached and the first error recorded.
pub(crate) struct CommandBuffer {
    capsule: Arc<Capsule>,
    mem: Arc<dyn MemoryDescriptor>,
    data_offset: u32,
    data_len: u32,
    cid: u16,
    state: Mutex<TransferState>,
}

impl CommandBuffer {
    pub(crate) fn new(
        capsule: Arc<Capsule>,
        mem: Arc<dyn MemoryDescriptor>,
        data_offset: u32,
        data_len: u32,
    ) -> Arc<Self> {
        let cid = capsule.cid();
        Arc::new(Self {
            capsule,
            mem,
            data_offset,
            data_len,
            cid,
            state: Mutex::new(TransferState::default()),
        })
    }

    pub(crate) fn capsule(&self) -> &Arc<Capsule> {
        &self.capsule
    }

    pub(crate) fn cid(&self) -> u16 {
        self.cid
    }

    pub(crate) fn ttag(&self) -> u16 {
        self.state.lock().ttag
    }

    pub(crate) fn set_ttag(&self, ttag: u16) {
        self.state.lock().ttag = ttag;
    }

    pub(crate) fn data_offset(&self) -> u32 {
        self.data_offset
    }

    pub(crate) fn data_len(&self) -> u32 {
        self.data_len
    }

    pub(crate) fn xfered(&self) -> u32 {
        self.state.lock().xfered
    }

    /// Offset within the command data where the next PDU must start.
    pub(crate) fn expected_offset(&self) -> u32 {
        self.data_offset + self.xfered()
    }

    /// Check that `[offset, offset + len)` lies inside this buffer.
    pub(crate) fn contains(&self, offset: u32, len: u32) -> bool {
        let end = u64::from(self.data_offset) + u64::from(self.data_len);
        offset >= self.data_offset && u64::from(offset) + u64::from(len) <= end
    }

    /// Account for `len` more bytes; returns true once the buffer is full.
    pub(crate) fn advance(&self, len: u32) -> bool {
        let mut state = self.state.lock();
        state.xfered += len;
        debug_assert!(state.xfered <= self.data_len);
        state.xfered == self.data_len
    }

    /// Record a deferred error. The first error wins.
    pub(crate) fn fail(&self, error: TransferError) {
        let mut state = self.state.lock();
        if state.error.is_none() {
            state.error = Some(error);
        }
    }

    pub(crate) fn error(&self) -> Option<TransferError> {
        self.state.lock().error
    }

    /// Copy `src` to command data offset `offset`.
    pub(crate) fn write(&self, offset: u32, src: &[u8]) -> Result<(), TransferError> {
        self.mem.write_at((offset - self.data_offset) as usize, src)
    }

    /// Fill `dst` from command data offset `offset`.
    pub(crate) fn read(&self, offset: u32, dst: &mut [u8]) -> Result<(), TransferError> {
        self.mem.read_at((offset - self.data_offset) as usize, dst)
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CommandBuffer")
            .field("cid", &self.cid)
            .field("ttag", &state.ttag)
            .field("data_offset", &self.data_offset)
            .field("data_len", &self.data_len)
            .field("xfered", &state.xfered)
            .field("error", &state.error)
            .finish()
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let status = match state.error {
            Some(error) => Err(error),
            None => Ok(()),
        };
        self.mem.complete(state.xfered, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::VecMemory;
    use crate::capsule::Sqe;
    use crate::qpair::testing;

    #[test]
    fn test_release_completes_memory() {
        let (qpair, _events) = testing::target();
        let capsule = Arc::new(qpair.command(Sqe::new(0x01, 5)));
        let mem = VecMemory::new(16);

        let cb = CommandBuffer::new(capsule, mem.clone(), 32, 16);
        assert_eq!(cb.cid(), 5);
        assert!(cb.contains(32, 16));
        assert!(!cb.contains(31, 4));
        assert!(!cb.contains(40, 9));

        cb.write(40, &[7; 8]).unwrap();
        assert!(!cb.advance(8));
        assert_eq!(cb.expected_offset(), 40);
        cb.fail(TransferError::DataDigest);
        cb.fail(TransferError::Cancelled);
        assert!(mem.completion().is_none());

        drop(cb);
        let completion = mem.completion().unwrap();
        assert_eq!(completion.transferred, 8);
        assert_eq!(completion.status, Err(TransferError::DataDigest));
        assert_eq!(&mem.to_vec()[8..], &[7; 8]);
    }
}
