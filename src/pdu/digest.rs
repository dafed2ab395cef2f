//! Header and data digests (CRC-32C, stored little endian).

use crate::core::*;

/// Digest over a header or data section.
pub fn digest(bytes: &[u8]) -> u32 {
    crc32c::crc32c(bytes)
}

fn stored_digest(bytes: &[u8], at: usize) -> Option<u32> {
    let raw: [u8; DIGEST_SIZE] = bytes.get(at..at + DIGEST_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw))
}

/// Verify the header digest that trails the `hlen` header bytes of `pdu`.
///
/// A mismatch is fatal to the connection.
pub fn verify_header_digest(pdu: &[u8], hlen: usize) -> Result<(), PduError> {
    let actual = stored_digest(pdu, hlen).ok_or(PduError::field(OFFSET_PLEN))?;
    let expected = digest(&pdu[..hlen]);
    if expected != actual {
        return Err(PduError::HeaderDigest { expected, actual });
    }
    Ok(())
}

/// Verify the data digest that trails `pdu[data_offset..data_offset + data_len]`.
///
/// A mismatch only fails the transfer the data belongs to.
pub fn verify_data_digest(
    pdu: &[u8],
    data_offset: usize,
    data_len: usize,
) -> Result<(), TransferError> {
    let end = data_offset + data_len;
    let actual = stored_digest(pdu, end).ok_or(TransferError::OutOfRange)?;
    if digest(&pdu[data_offset..end]) != actual {
        return Err(TransferError::DataDigest);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32c_check_value() {
        assert_eq!(digest(b"123456789"), 0xE306_9283);
        assert_eq!(digest(&[]), 0);
    }

    #[test]
    fn test_verify_header_digest() {
        let mut pdu = vec![0xA5u8; 24];
        let d = digest(&pdu);
        pdu.extend_from_slice(&d.to_le_bytes());
        assert!(verify_header_digest(&pdu, 24).is_ok());

        pdu[3] ^= 0x01;
        assert!(matches!(
            verify_header_digest(&pdu, 24),
            Err(PduError::HeaderDigest { .. })
        ));

        assert_eq!(
            verify_header_digest(&pdu[..26], 24),
            Err(PduError::field(OFFSET_PLEN))
        );
    }

    #[test]
    fn test_verify_data_digest() {
        let mut pdu = vec![0u8; 8];
        let data = b"payload bytes";
        pdu.extend_from_slice(data);
        pdu.extend_from_slice(&digest(data).to_le_bytes());
        assert_eq!(verify_data_digest(&pdu, 8, data.len()), Ok(()));

        pdu[10] ^= 0x80;
        assert_eq!(
            verify_data_digest(&pdu, 8, data.len()),
            Err(TransferError::DataDigest)
        );
    }
}
