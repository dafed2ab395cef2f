//! Error types for the capsule transport.

use thiserror::Error;

/// Fatal error status carried by a termination request (FES).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TermReason {
    /// A header field holds an invalid value.
    InvalidHeaderField = 0x01,
    /// A PDU arrived that is not legal at this point of the exchange.
    PduSequenceError = 0x02,
    /// Header digest did not match.
    HeaderDigestError = 0x03,
    /// Data PDU addressed bytes outside the transfer.
    DataTransferOutOfRange = 0x04,
    /// A transfer or R2T limit was exceeded.
    DataTransferLimitExceeded = 0x05,
    /// A negotiated parameter is not supported.
    UnsupportedParameter = 0x06,
}

impl TermReason {
    /// Parse a reason from its wire value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x01 => Some(Self::InvalidHeaderField),
            0x02 => Some(Self::PduSequenceError),
            0x03 => Some(Self::HeaderDigestError),
            0x04 => Some(Self::DataTransferOutOfRange),
            0x05 => Some(Self::DataTransferLimitExceeded),
            0x06 => Some(Self::UnsupportedParameter),
            _ => None,
        }
    }

    /// Wire value.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Protocol violations found while validating or dispatching a PDU.
///
/// Every variant is fatal to the connection: the receiver answers with a
/// termination request built from [`PduError::reason`] and [`PduError::fei`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PduError {
    /// Header field at the given byte offset is invalid.
    #[error("invalid header field at offset {offset}")]
    InvalidHeaderField {
        /// Byte offset of the offending field.
        offset: u32,
    },

    /// PDU is not legal in the current state.
    #[error("pdu sequence error")]
    SequenceError,

    /// Header digest mismatch.
    #[error("header digest mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")]
    HeaderDigest {
        /// Digest computed over the received header.
        expected: u32,
        /// Digest carried by the PDU.
        actual: u32,
    },

    /// Data offset or length outside the registered transfer.
    #[error("data transfer out of range")]
    OutOfRange,

    /// Data length above the negotiated limit.
    #[error("data transfer limit exceeded")]
    LimitExceeded,

    /// Negotiation parameter at the given offset is not supported.
    #[error("unsupported parameter at offset {offset}")]
    UnsupportedParameter {
        /// Byte offset of the offending field.
        offset: u32,
    },
}

impl PduError {
    /// Shorthand for [`PduError::InvalidHeaderField`].
    pub fn field(offset: u32) -> Self {
        Self::InvalidHeaderField { offset }
    }

    /// Termination reason reported to the peer.
    pub fn reason(&self) -> TermReason {
        match self {
            Self::InvalidHeaderField { .. } => TermReason::InvalidHeaderField,
            Self::SequenceError => TermReason::PduSequenceError,
            Self::HeaderDigest { .. } => TermReason::HeaderDigestError,
            Self::OutOfRange => TermReason::DataTransferOutOfRange,
            Self::LimitExceeded => TermReason::DataTransferLimitExceeded,
            Self::UnsupportedParameter { .. } => TermReason::UnsupportedParameter,
        }
    }

    /// Field error information reported to the peer.
    pub fn fei(&self) -> u32 {
        match self {
            Self::InvalidHeaderField { offset } | Self::UnsupportedParameter { offset } => *offset,
            _ => 0,
        }
    }
}

/// Errors delivered to a memory descriptor when its transfer is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Queue pair was torn down before the transfer finished.
    #[error("transfer cancelled")]
    Cancelled,

    /// Data digest of a received data PDU did not match.
    #[error("data digest mismatch")]
    DataDigest,

    /// Requested range lies outside the available data.
    #[error("transfer out of range")]
    OutOfRange,
}

/// Top-level queue pair errors.
#[derive(Debug, Error)]
pub enum QueuePairError {
    /// Local side detected a protocol violation and terminated the connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] PduError),

    /// Peer sent a termination request.
    #[error("terminated by peer: fes 0x{fes:02x}, fei {fei}")]
    Terminated {
        /// Fatal error status sent by the peer.
        fes: u16,
        /// Field error information sent by the peer.
        fei: u32,
    },

    /// Connection negotiation failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Capsule cannot be used for the requested operation.
    #[error("invalid capsule: {0}")]
    InvalidCapsule(&'static str),

    /// Transfer request failed.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Peer closed the byte stream.
    #[error("connection closed by peer")]
    ConnectionReset,

    /// Queue pair is no longer established.
    #[error("queue pair closed")]
    Closed,

    /// I/O error on the byte stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for queue pair operations.
pub type Result<T, E = QueuePairError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::OFFSET_TTAG;

    #[test]
    fn test_term_reason_roundtrip() {
        for reason in [
            TermReason::InvalidHeaderField,
            TermReason::PduSequenceError,
            TermReason::HeaderDigestError,
            TermReason::DataTransferOutOfRange,
            TermReason::DataTransferLimitExceeded,
            TermReason::UnsupportedParameter,
        ] {
            assert_eq!(TermReason::from_u16(reason.as_u16()), Some(reason));
        }
        assert_eq!(TermReason::from_u16(0), None);
        assert_eq!(TermReason::from_u16(7), None);
    }

    #[test]
    fn test_pdu_error_fes_fei() {
        let err = PduError::field(OFFSET_TTAG);
        assert_eq!(err.reason(), TermReason::InvalidHeaderField);
        assert_eq!(err.fei(), OFFSET_TTAG);

        let err = PduError::HeaderDigest {
            expected: 1,
            actual: 2,
        };
        assert_eq!(err.reason(), TermReason::HeaderDigestError);
        assert_eq!(err.fei(), 0);

        assert_eq!(PduError::SequenceError.reason().as_u16(), 0x02);
        assert_eq!(PduError::LimitExceeded.reason().as_u16(), 0x05);
    }

    #[test]
    fn test_queue_pair_error_from() {
        let err: QueuePairError = PduError::OutOfRange.into();
        assert!(matches!(err, QueuePairError::Protocol(PduError::OutOfRange)));

        let err: QueuePairError = TransferError::Cancelled.into();
        assert!(matches!(
            err,
            QueuePairError::Transfer(TransferError::Cancelled)
        ));
    }
}
