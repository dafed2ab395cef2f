//! Kind-specific PDU headers.
//!
//! Each kind occupies the bytes between the common header and `hlen`. All
//! multi-byte fields are little endian; reserved bytes are written as zero
//! and ignored on receive.

use bytes::Bytes;

use super::header::{PduFlags, PduType};
use crate::capsule::{Cqe, Sqe};
use crate::core::*;

/// Initialize connection request.
///
/// ```text
/// 8      10     11     12          16            128
/// +------+------+------+-----------+-------------+
/// | PFV  | HPDA | DGST | MAXR2T    | reserved    |
/// +------+------+------+-----------+-------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcReq {
    /// PDU format version.
    pub pfv: u16,
    /// Host PDU data alignment, `(hpda + 1) * 4` bytes.
    pub hpda: u8,
    /// Requested digests (`DGST_HEADER`, `DGST_DATA`).
    pub dgst: u8,
    /// Max outstanding R2Ts per command the host accepts, 0's based.
    pub maxr2t: u32,
}

/// Initialize connection response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcResp {
    /// PDU format version.
    pub pfv: u16,
    /// Controller PDU data alignment, `(cpda + 1) * 4` bytes.
    pub cpda: u8,
    /// Enabled digests.
    pub dgst: u8,
    /// Max data bytes per H2C data PDU.
    pub maxh2cdata: u32,
}

/// Termination request fields. The data section holds the offending header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermReq {
    /// Fatal error status.
    pub fes: u16,
    /// Field error information.
    pub fei: u32,
}

/// H2C / C2H data header. `ttag` is reserved (zero) for C2H data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Command capsule command id.
    pub cccid: u16,
    /// Transfer tag from the R2T being answered.
    pub ttag: u16,
    /// Offset of this PDU's data within the command's data.
    pub datao: u32,
    /// Data length.
    pub datal: u32,
}

/// Ready-to-transfer grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct R2tHeader {
    /// Command capsule command id.
    pub cccid: u16,
    /// Transfer tag assigned by the controller.
    pub ttag: u16,
    /// Offset of the requested data.
    pub r2to: u32,
    /// Length of the requested data.
    pub r2tl: u32,
}

/// Kind-specific header of a PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PduHeader {
    /// Initialize connection request.
    IcReq(IcReq),
    /// Initialize connection response.
    IcResp(IcResp),
    /// Host to controller termination request.
    H2CTermReq(TermReq),
    /// Controller to host termination request.
    C2HTermReq(TermReq),
    /// Command capsule.
    CapsuleCmd(Sqe),
    /// Response capsule.
    CapsuleResp(Cqe),
    /// Host to controller data.
    H2CData(DataHeader),
    /// Controller to host data.
    C2HData(DataHeader),
    /// Ready to transfer.
    R2T(R2tHeader),
}

fn le16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

impl PduHeader {
    /// PDU type of this header.
    pub fn pdu_type(&self) -> PduType {
        match self {
            Self::IcReq(_) => PduType::IcReq,
            Self::IcResp(_) => PduType::IcResp,
            Self::H2CTermReq(_) => PduType::H2CTermReq,
            Self::C2HTermReq(_) => PduType::C2HTermReq,
            Self::CapsuleCmd(_) => PduType::CapsuleCmd,
            Self::CapsuleResp(_) => PduType::CapsuleResp,
            Self::H2CData(_) => PduType::H2CData,
            Self::C2HData(_) => PduType::C2HData,
            Self::R2T(_) => PduType::R2T,
        }
    }

    /// Write the kind-specific fields into `header`, a zeroed buffer of
    /// exactly `hlen` bytes whose first 8 bytes hold the common header.
    pub fn encode_into(&self, header: &mut [u8]) {
        debug_assert_eq!(header.len(), self.pdu_type().header_len());
        match self {
            Self::IcReq(ic) => {
                header[8..10].copy_from_slice(&ic.pfv.to_le_bytes());
                header[10] = ic.hpda;
                header[11] = ic.dgst;
                header[12..16].copy_from_slice(&ic.maxr2t.to_le_bytes());
            }
            Self::IcResp(ic) => {
                header[8..10].copy_from_slice(&ic.pfv.to_le_bytes());
                header[10] = ic.cpda;
                header[11] = ic.dgst;
                header[12..16].copy_from_slice(&ic.maxh2cdata.to_le_bytes());
            }
            Self::H2CTermReq(term) | Self::C2HTermReq(term) => {
                header[8..10].copy_from_slice(&term.fes.to_le_bytes());
                header[10..14].copy_from_slice(&term.fei.to_le_bytes());
            }
            Self::CapsuleCmd(sqe) => {
                header[COMMON_HEADER_SIZE..].copy_from_slice(sqe.as_bytes());
            }
            Self::CapsuleResp(cqe) => {
                header[COMMON_HEADER_SIZE..].copy_from_slice(cqe.as_bytes());
            }
            Self::H2CData(data) | Self::C2HData(data) => {
                header[8..10].copy_from_slice(&data.cccid.to_le_bytes());
                header[10..12].copy_from_slice(&data.ttag.to_le_bytes());
                header[12..16].copy_from_slice(&data.datao.to_le_bytes());
                header[16..20].copy_from_slice(&data.datal.to_le_bytes());
            }
            Self::R2T(r2t) => {
                header[8..10].copy_from_slice(&r2t.cccid.to_le_bytes());
                header[10..12].copy_from_slice(&r2t.ttag.to_le_bytes());
                header[12..16].copy_from_slice(&r2t.r2to.to_le_bytes());
                header[16..20].copy_from_slice(&r2t.r2tl.to_le_bytes());
            }
        }
    }

    /// Parse the kind-specific fields from a header of validated length.
    pub fn parse(kind: PduType, header: &[u8]) -> Result<Self, PduError> {
        if header.len() < kind.header_len() {
            return Err(PduError::field(OFFSET_HLEN));
        }
        let parsed = match kind {
            PduType::IcReq => Self::IcReq(IcReq {
                pfv: le16(header, 8),
                hpda: header[10],
                dgst: header[11],
                maxr2t: le32(header, 12),
            }),
            PduType::IcResp => Self::IcResp(IcResp {
                pfv: le16(header, 8),
                cpda: header[10],
                dgst: header[11],
                maxh2cdata: le32(header, 12),
            }),
            PduType::H2CTermReq | PduType::C2HTermReq => {
                let term = TermReq {
                    fes: le16(header, 8),
                    fei: le32(header, 10),
                };
                if kind == PduType::H2CTermReq {
                    Self::H2CTermReq(term)
                } else {
                    Self::C2HTermReq(term)
                }
            }
            PduType::CapsuleCmd => Self::CapsuleCmd(
                Sqe::from_slice(&header[COMMON_HEADER_SIZE..])
                    .ok_or(PduError::field(OFFSET_HLEN))?,
            ),
            PduType::CapsuleResp => Self::CapsuleResp(
                Cqe::from_slice(&header[COMMON_HEADER_SIZE..])
                    .ok_or(PduError::field(OFFSET_HLEN))?,
            ),
            PduType::H2CData => Self::H2CData(DataHeader {
                cccid: le16(header, 8),
                ttag: le16(header, 10),
                datao: le32(header, 12),
                datal: le32(header, 16),
            }),
            PduType::C2HData => Self::C2HData(DataHeader {
                cccid: le16(header, 8),
                ttag: 0,
                datao: le32(header, 12),
                datal: le32(header, 16),
            }),
            PduType::R2T => Self::R2T(R2tHeader {
                cccid: le16(header, 8),
                ttag: le16(header, 10),
                r2to: le32(header, 12),
                r2tl: le32(header, 16),
            }),
        };
        Ok(parsed)
    }
}

/// A PDU as the codec sees it, independent of framing parameters.
///
/// `flags` only holds kind flags (LAST_PDU, SUCCESS); digest flags are
/// derived from the framing when the PDU is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    /// Kind-specific header.
    pub header: PduHeader,
    /// Kind flags.
    pub flags: PduFlags,
    /// Data section.
    pub data: Bytes,
}

impl Pdu {
    /// Create a PDU without data or kind flags.
    pub fn new(header: PduHeader) -> Self {
        Self {
            header,
            flags: PduFlags::NONE,
            data: Bytes::new(),
        }
    }

    /// Attach a data section.
    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = data;
        self
    }

    /// Set kind flags.
    pub fn with_flags(mut self, flags: PduFlags) -> Self {
        self.flags = flags;
        self
    }

    /// PDU type.
    pub fn pdu_type(&self) -> PduType {
        self.header.pdu_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(header: &PduHeader) -> Vec<u8> {
        let mut buf = vec![0u8; header.pdu_type().header_len()];
        header.encode_into(&mut buf);
        buf
    }

    #[test]
    fn test_r2t_layout() {
        let header = PduHeader::R2T(R2tHeader {
            cccid: 0x0102,
            ttag: 0x0304,
            r2to: 0x1000,
            r2tl: 0x2000,
        });
        let buf = encoded(&header);
        assert_eq!(hex::encode(&buf[8..20]), "020104030010000000200000");
        assert_eq!(PduHeader::parse(PduType::R2T, &buf).unwrap(), header);
    }

    #[test]
    fn test_c2h_ignores_reserved_tag() {
        let mut buf = vec![0u8; DATA_HEADER_LEN];
        buf[8..10].copy_from_slice(&7u16.to_le_bytes());
        buf[10..12].copy_from_slice(&0xFFFFu16.to_le_bytes());
        buf[16..20].copy_from_slice(&512u32.to_le_bytes());
        let parsed = PduHeader::parse(PduType::C2HData, &buf).unwrap();
        assert_eq!(
            parsed,
            PduHeader::C2HData(DataHeader {
                cccid: 7,
                ttag: 0,
                datao: 0,
                datal: 512
            })
        );
    }

    #[test]
    fn test_ic_req_layout() {
        let header = PduHeader::IcReq(IcReq {
            pfv: 0,
            hpda: 3,
            dgst: DGST_HEADER | DGST_DATA,
            maxr2t: 15,
        });
        let buf = encoded(&header);
        assert_eq!(buf.len(), IC_HEADER_LEN);
        assert_eq!(buf[10], 3);
        assert_eq!(buf[11], 0x03);
        assert_eq!(buf[12..16], [15, 0, 0, 0]);
        assert!(buf[16..].iter().all(|&b| b == 0));
        assert_eq!(PduHeader::parse(PduType::IcReq, &buf).unwrap(), header);
    }

    #[test]
    fn test_term_req_layout() {
        let header = PduHeader::C2HTermReq(TermReq {
            fes: 0x0002,
            fei: 0x0A0B0C0D,
        });
        let buf = encoded(&header);
        assert_eq!(hex::encode(&buf[8..14]), "02000d0c0b0a");
        assert_eq!(PduHeader::parse(PduType::C2HTermReq, &buf).unwrap(), header);
    }

    #[test]
    fn test_parse_short_header() {
        assert_eq!(
            PduHeader::parse(PduType::CapsuleCmd, &[0u8; 24]),
            Err(PduError::field(OFFSET_HLEN))
        );
    }
}
