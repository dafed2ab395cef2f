//! Common PDU header, PDU types and header flags.
//!
//! Wire format (8 bytes):
//! ```text
//! +--------+--------+--------+--------+--------------------+
//! | Type   | Flags  | HLEN   | PDO    | PLEN               |
//! | 1 byte | 1 byte | 1 byte | 1 byte | 4 bytes (LE32)     |
//! +--------+--------+--------+--------+--------------------+
//! ```

use crate::core::*;

/// PDU type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    /// Initialize connection request.
    IcReq = PDU_TYPE_IC_REQ,
    /// Initialize connection response.
    IcResp = PDU_TYPE_IC_RESP,
    /// Host to controller termination request.
    H2CTermReq = PDU_TYPE_H2C_TERM_REQ,
    /// Controller to host termination request.
    C2HTermReq = PDU_TYPE_C2H_TERM_REQ,
    /// Command capsule.
    CapsuleCmd = PDU_TYPE_CAPSULE_CMD,
    /// Response capsule.
    CapsuleResp = PDU_TYPE_CAPSULE_RESP,
    /// Host to controller data.
    H2CData = PDU_TYPE_H2C_DATA,
    /// Controller to host data.
    C2HData = PDU_TYPE_C2H_DATA,
    /// Ready to transfer.
    R2T = PDU_TYPE_R2T,
}

impl PduType {
    /// Parse a PDU type from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            PDU_TYPE_IC_REQ => Some(Self::IcReq),
            PDU_TYPE_IC_RESP => Some(Self::IcResp),
            PDU_TYPE_H2C_TERM_REQ => Some(Self::H2CTermReq),
            PDU_TYPE_C2H_TERM_REQ => Some(Self::C2HTermReq),
            PDU_TYPE_CAPSULE_CMD => Some(Self::CapsuleCmd),
            PDU_TYPE_CAPSULE_RESP => Some(Self::CapsuleResp),
            PDU_TYPE_H2C_DATA => Some(Self::H2CData),
            PDU_TYPE_C2H_DATA => Some(Self::C2HData),
            PDU_TYPE_R2T => Some(Self::R2T),
            _ => None,
        }
    }

    /// Convert to the byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Fixed header length for this type.
    pub fn header_len(self) -> usize {
        match self {
            Self::IcReq | Self::IcResp => IC_HEADER_LEN,
            Self::H2CTermReq | Self::C2HTermReq => TERM_REQ_HEADER_LEN,
            Self::CapsuleCmd => CAPSULE_CMD_HEADER_LEN,
            Self::CapsuleResp => CAPSULE_RESP_HEADER_LEN,
            Self::H2CData | Self::C2HData => DATA_HEADER_LEN,
            Self::R2T => R2T_HEADER_LEN,
        }
    }

    /// Role that legitimately receives this PDU type.
    pub fn receiver(self) -> Role {
        match self {
            Self::IcReq | Self::H2CTermReq | Self::CapsuleCmd | Self::H2CData => Role::Target,
            Self::IcResp | Self::C2HTermReq | Self::CapsuleResp | Self::C2HData | Self::R2T => {
                Role::Initiator
            }
        }
    }

    /// Termination request type sent by `role`.
    pub fn term_req_from(role: Role) -> Self {
        match role {
            Role::Initiator => Self::H2CTermReq,
            Role::Target => Self::C2HTermReq,
        }
    }

    /// Check if this is a termination request.
    pub fn is_term_req(self) -> bool {
        matches!(self, Self::H2CTermReq | Self::C2HTermReq)
    }

    /// Check if this is a connection initialization PDU.
    pub fn is_ic(self) -> bool {
        matches!(self, Self::IcReq | Self::IcResp)
    }

    /// Check if header and data digests may apply to this type.
    pub fn has_digests(self) -> bool {
        !self.is_ic() && !self.is_term_req()
    }

    /// Check if this type may carry a data section.
    pub fn may_carry_data(self) -> bool {
        matches!(
            self,
            Self::H2CTermReq | Self::C2HTermReq | Self::CapsuleCmd | Self::H2CData | Self::C2HData
        )
    }

    /// Flags that may legally be set on this type.
    pub fn permitted_flags(self) -> PduFlags {
        match self {
            Self::IcReq | Self::IcResp | Self::H2CTermReq | Self::C2HTermReq => PduFlags::NONE,
            Self::CapsuleCmd => PduFlags::HDGST.union(PduFlags::DDGST),
            Self::CapsuleResp | Self::R2T => PduFlags::HDGST,
            Self::H2CData => PduFlags::HDGST
                .union(PduFlags::DDGST)
                .union(PduFlags::LAST_PDU),
            Self::C2HData => PduFlags::HDGST
                .union(PduFlags::DDGST)
                .union(PduFlags::LAST_PDU)
                .union(PduFlags::SUCCESS),
        }
    }
}

/// Common header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PduFlags(u8);

impl PduFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Header digest present.
    pub const HDGST: Self = Self(FLAG_HDGSTF);
    /// Data digest present.
    pub const DDGST: Self = Self(FLAG_DDGSTF);
    /// Last data PDU of a transfer.
    pub const LAST_PDU: Self = Self(FLAG_LAST_PDU);
    /// Command succeeded, response capsule elided.
    pub const SUCCESS: Self = Self(FLAG_SUCCESS);

    /// Create flags from a raw byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Combine two flag sets.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Check if every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Clear the bits of `other`.
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Check if HDGSTF is set.
    pub fn has_header_digest(self) -> bool {
        self.0 & FLAG_HDGSTF != 0
    }

    /// Check if DDGSTF is set.
    pub fn has_data_digest(self) -> bool {
        self.0 & FLAG_DDGSTF != 0
    }

    /// Check if LAST_PDU is set.
    pub fn is_last_pdu(self) -> bool {
        self.0 & FLAG_LAST_PDU != 0
    }

    /// Check if SUCCESS is set.
    pub fn is_success(self) -> bool {
        self.0 & FLAG_SUCCESS != 0
    }

    /// Flags that are only meaningful to the PDU kind (not to framing).
    pub fn kind_flags(self) -> Self {
        self.without(Self::HDGST).without(Self::DDGST)
    }
}

/// Common header shared by all PDUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    /// Raw PDU type byte.
    pub pdu_type: u8,
    /// Header flags.
    pub flags: PduFlags,
    /// Header length, excluding the header digest.
    pub hlen: u8,
    /// Offset of the data section, 0 if none.
    pub pdo: u8,
    /// Total PDU length, digests and padding included.
    pub plen: u32,
}

impl CommonHeader {
    /// Parsed PDU type, if known.
    pub fn kind(&self) -> Option<PduType> {
        PduType::from_byte(self.pdu_type)
    }

    /// Serialize to bytes (8 bytes).
    pub fn to_bytes(&self) -> [u8; COMMON_HEADER_SIZE] {
        let mut buf = [0u8; COMMON_HEADER_SIZE];
        buf[0] = self.pdu_type;
        buf[1] = self.flags.as_byte();
        buf[2] = self.hlen;
        buf[3] = self.pdo;
        buf[4..8].copy_from_slice(&self.plen.to_le_bytes());
        buf
    }

    /// Parse from bytes.
    pub fn from_bytes(bytes: &[u8; COMMON_HEADER_SIZE]) -> Self {
        Self {
            pdu_type: bytes[0],
            flags: PduFlags::from_byte(bytes[1]),
            hlen: bytes[2],
            pdo: bytes[3],
            plen: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdu_type_roundtrip() {
        for t in [
            PduType::IcReq,
            PduType::IcResp,
            PduType::H2CTermReq,
            PduType::C2HTermReq,
            PduType::CapsuleCmd,
            PduType::CapsuleResp,
            PduType::H2CData,
            PduType::C2HData,
            PduType::R2T,
        ] {
            assert_eq!(PduType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(PduType::from_byte(0x08), None);
        assert_eq!(PduType::from_byte(0xFF), None);
    }

    #[test]
    fn test_pdu_type_receivers() {
        assert_eq!(PduType::CapsuleCmd.receiver(), Role::Target);
        assert_eq!(PduType::H2CData.receiver(), Role::Target);
        assert_eq!(PduType::R2T.receiver(), Role::Initiator);
        assert_eq!(PduType::C2HData.receiver(), Role::Initiator);
        assert_eq!(PduType::term_req_from(Role::Initiator), PduType::H2CTermReq);
        assert_eq!(PduType::term_req_from(Role::Target), PduType::C2HTermReq);
    }

    #[test]
    fn test_flags() {
        let flags = PduFlags::HDGST.union(PduFlags::LAST_PDU);
        assert!(flags.has_header_digest());
        assert!(!flags.has_data_digest());
        assert!(flags.is_last_pdu());
        assert_eq!(flags.kind_flags(), PduFlags::LAST_PDU);
        assert!(PduType::H2CData.permitted_flags().contains(flags));
        assert!(!PduType::R2T.permitted_flags().contains(flags));
        assert!(!PduType::H2CData
            .permitted_flags()
            .contains(PduFlags::SUCCESS));
    }

    #[test]
    fn test_common_header_roundtrip() {
        let ch = CommonHeader {
            pdu_type: PDU_TYPE_H2C_DATA,
            flags: PduFlags::LAST_PDU,
            hlen: 24,
            pdo: 24,
            plen: 0x0102_0304,
        };
        let bytes = ch.to_bytes();
        assert_eq!(bytes, [0x06, 0x04, 24, 24, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(CommonHeader::from_bytes(&bytes), ch);
    }
}
