//! Heap backed memory descriptor.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::core::*;

/// Outcome reported to a memory descriptor when its transfer is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Bytes moved before release.
    pub transferred: u32,
    /// Deferred transfer error, if any.
    pub status: std::result::Result<(), TransferError>,
}

/// A [`MemoryDescriptor`] over a `Vec<u8>` that records its completion.
///
/// Useful for tests and for command layers that do not manage their own
/// buffers.
#[derive(Debug, Default)]
pub struct VecMemory {
    data: Mutex<Vec<u8>>,
    completion: Mutex<Option<Completion>>,
    completed: Notify,
}

impl VecMemory {
    /// Zero-filled memory of `len` bytes.
    pub fn new(len: usize) -> Arc<Self> {
        Self::from_vec(vec![0; len])
    }

    /// Memory holding `data`.
    pub fn from_vec(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data),
            ..Self::default()
        })
    }

    /// Copy of the current contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Completion, once the transfer has been released.
    pub fn completion(&self) -> Option<Completion> {
        *self.completion.lock()
    }

    /// Wait until the transfer has been released.
    pub async fn wait(&self) -> Completion {
        loop {
            let notified = self.completed.notified();
            if let Some(completion) = self.completion() {
                return completion;
            }
            notified.await;
        }
    }
}

impl MemoryDescriptor for VecMemory {
    fn len(&self) -> usize {
        self.data.lock().len()
    }

    fn write_at(&self, offset: usize, src: &[u8]) -> std::result::Result<(), TransferError> {
        let mut data = self.data.lock();
        let range = region(data.len(), offset, src.len())?;
        data[range].copy_from_slice(src);
        Ok(())
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> std::result::Result<(), TransferError> {
        let data = self.data.lock();
        let range = region(data.len(), offset, dst.len())?;
        dst.copy_from_slice(&data[range]);
        Ok(())
    }

    fn complete(&self, transferred: u32, status: std::result::Result<(), TransferError>) {
        let mut slot = self.completion.lock();
        debug_assert!(slot.is_none(), "memory descriptor completed twice");
        *slot = Some(Completion {
            transferred,
            status,
        });
        drop(slot);
        self.completed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_checked_copy() {
        let mem = VecMemory::new(8);
        mem.write_at(2, &[1, 2, 3]).unwrap();
        assert_eq!(mem.to_vec(), [0, 0, 1, 2, 3, 0, 0, 0]);
        assert_eq!(mem.write_at(6, &[9; 3]), Err(TransferError::OutOfRange));

        let mut out = [0u8; 2];
        mem.read_at(3, &mut out).unwrap();
        assert_eq!(out, [2, 3]);
        assert_eq!(mem.read_at(7, &mut out), Err(TransferError::OutOfRange));
    }

    #[tokio::test]
    async fn test_wait_for_completion() {
        let mem = VecMemory::new(4);
        assert!(mem.completion().is_none());

        let waiter = {
            let mem = mem.clone();
            tokio::spawn(async move { mem.wait().await })
        };
        tokio::task::yield_now().await;
        mem.complete(4, Err(TransferError::DataDigest));

        let completion = waiter.await.unwrap();
        assert_eq!(completion.transferred, 4);
        assert_eq!(completion.status, Err(TransferError::DataDigest));
    }
}
