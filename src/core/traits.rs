//! Collaborator traits consumed by the transport.
//!
//! The command layer owns payload memory. The transport only moves bytes in
//! and out of it through [`MemoryDescriptor`] and reports the outcome once.

use std::ops::Range;

use super::error::TransferError;

/// Payload memory supplied by the command layer for one transfer.
///
/// Offsets are relative to the start of the descriptor. Implementations must
/// reject regions that extend past [`MemoryDescriptor::len`] with
/// [`TransferError::OutOfRange`]; [`region`] performs that check.
///
/// # Example
///
/// ```ignore
/// struct Slab(parking_lot::Mutex<Vec<u8>>);
///
/// impl MemoryDescriptor for Slab {
///     fn len(&self) -> usize { self.0.lock().len() }
///
///     fn write_at(&self, offset: usize, src: &[u8]) -> Result<(), TransferError> {
///         let mut mem = self.0.lock();
///         let range = region(mem.len(), offset, src.len())?;
///         mem[range].copy_from_slice(src);
///         Ok(())
///     }
///
///     fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), TransferError> {
///         let mem = self.0.lock();
///         let range = region(mem.len(), offset, dst.len())?;
///         dst.copy_from_slice(&mem[range]);
///         Ok(())
///     }
///
///     fn complete(&self, _transferred: u32, _status: Result<(), TransferError>) {}
/// }
/// ```
pub trait MemoryDescriptor: Send + Sync + 'static {
    /// Number of addressable bytes.
    fn len(&self) -> usize;

    /// Check if the descriptor addresses no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `src` into memory starting at `offset`.
    fn write_at(&self, offset: usize, src: &[u8]) -> Result<(), TransferError>;

    /// Fill `dst` from memory starting at `offset`.
    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), TransferError>;

    /// Called exactly once, when the transfer using this memory is released.
    ///
    /// `transferred` counts the bytes moved before release. `status` carries
    /// the deferred error recorded during the transfer, if any.
    fn complete(&self, transferred: u32, status: Result<(), TransferError>);
}

/// Bounds-checked region `[offset, offset + count)` within `len` bytes.
pub fn region(len: usize, offset: usize, count: usize) -> Result<Range<usize>, TransferError> {
    let end = offset.checked_add(count).ok_or(TransferError::OutOfRange)?;
    if end > len {
        return Err(TransferError::OutOfRange);
    }
    Ok(offset..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_bounds() {
        assert_eq!(region(16, 0, 16), Ok(0..16));
        assert_eq!(region(16, 4, 8), Ok(4..12));
        assert_eq!(region(16, 16, 0), Ok(16..16));
        assert_eq!(region(16, 8, 9), Err(TransferError::OutOfRange));
        assert_eq!(region(16, usize::MAX, 2), Err(TransferError::OutOfRange));
    }
}
