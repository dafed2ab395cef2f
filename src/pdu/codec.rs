//! PDU construction, validation and decoding.
//!
//! [`construct_pdu`] is the only place that computes `plen` and `pdo`.
//! [`validate_header`] checks a received common header against the
//! negotiated framing before the rest of the PDU is read.

use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};

use super::digest::{digest, verify_data_digest, verify_header_digest};
use super::header::{CommonHeader, PduFlags, PduType};
use super::kinds::{Pdu, PduHeader};
use crate::core::*;

/// Framing parameters for one direction of a queue pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// Header digests enabled.
    pub header_digest: bool,
    /// Data digests enabled.
    pub data_digest: bool,
    /// PDU data alignment in bytes.
    pub alignment: u32,
    /// Largest accepted data section (receive direction only).
    pub max_data_len: u32,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            header_digest: false,
            data_digest: false,
            alignment: DEFAULT_ALIGNMENT,
            max_data_len: DEFAULT_MAX_RX_DATA,
        }
    }
}

impl Framing {
    /// Framing with the given digests and alignment.
    pub fn new(header_digest: bool, data_digest: bool, alignment: u32) -> Self {
        Self {
            header_digest,
            data_digest,
            alignment,
            ..Self::default()
        }
    }

    /// Set the data section limit.
    pub fn with_max_data_len(mut self, max_data_len: u32) -> Self {
        self.max_data_len = max_data_len;
        self
    }
}

/// Location of the sections of a validated PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduLayout {
    /// PDU type.
    pub kind: PduType,
    /// Header length.
    pub hlen: usize,
    /// Header digest follows the header.
    pub header_digest: bool,
    /// Start of the data section.
    pub data_offset: usize,
    /// Length of the data section.
    pub data_len: usize,
    /// Data digest follows the data section.
    pub data_digest: bool,
    /// Total PDU length.
    pub plen: usize,
}

impl PduLayout {
    /// Header plus header digest.
    pub fn header_end(&self) -> usize {
        self.hlen + if self.header_digest { DIGEST_SIZE } else { 0 }
    }

    /// Byte range of the data section.
    pub fn data_range(&self) -> Range<usize> {
        self.data_offset..self.data_offset + self.data_len
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Validate a received common header for a queue pair playing `role`.
///
/// Returns where the data section lives, or the violation to report in a
/// termination request.
pub fn validate_header(
    ch: &CommonHeader,
    role: Role,
    framing: &Framing,
) -> Result<PduLayout, PduError> {
    let kind = ch.kind().ok_or(PduError::field(OFFSET_PDU_TYPE))?;
    if kind.receiver() != role {
        return Err(PduError::field(OFFSET_PDU_TYPE));
    }
    if kind.is_ic() {
        return Err(PduError::SequenceError);
    }

    let hlen = kind.header_len();
    if ch.hlen as usize != hlen {
        return Err(PduError::field(OFFSET_HLEN));
    }
    if !kind.permitted_flags().contains(ch.flags) {
        return Err(PduError::field(OFFSET_FLAGS));
    }

    let header_digest = kind.has_digests() && framing.header_digest;
    if kind.has_digests() && ch.flags.has_header_digest() != framing.header_digest {
        return Err(PduError::field(OFFSET_FLAGS));
    }

    let header_end = hlen + if header_digest { DIGEST_SIZE } else { 0 };
    let plen = ch.plen as usize;
    if plen < header_end {
        return Err(PduError::field(OFFSET_PLEN));
    }

    let mut layout = PduLayout {
        kind,
        hlen,
        header_digest,
        data_offset: header_end,
        data_len: 0,
        data_digest: false,
        plen,
    };

    if plen == header_end {
        if ch.pdo != 0 {
            return Err(PduError::field(OFFSET_PDO));
        }
        if ch.flags.has_data_digest() {
            return Err(PduError::field(OFFSET_FLAGS));
        }
        return Ok(layout);
    }

    if !kind.may_carry_data() {
        return Err(PduError::field(OFFSET_PLEN));
    }

    if kind.is_term_req() {
        if plen - hlen > TERM_REQ_MAX_DATA_LEN {
            return Err(PduError::field(OFFSET_PLEN));
        }
        layout.data_len = plen - hlen;
        return Ok(layout);
    }

    if ch.flags.has_data_digest() != framing.data_digest {
        return Err(PduError::field(OFFSET_FLAGS));
    }
    let pdo = ch.pdo as usize;
    if pdo < header_end || pdo % framing.alignment as usize != 0 || pdo > plen {
        return Err(PduError::field(OFFSET_PDO));
    }
    let trailer = if framing.data_digest { DIGEST_SIZE } else { 0 };
    if plen <= pdo + trailer {
        return Err(PduError::field(OFFSET_PLEN));
    }

    let data_len = plen - pdo - trailer;
    if data_len > framing.max_data_len as usize {
        return Err(if kind == PduType::H2CData {
            PduError::LimitExceeded
        } else {
            PduError::field(OFFSET_PLEN)
        });
    }

    layout.data_offset = pdo;
    layout.data_len = data_len;
    layout.data_digest = framing.data_digest;
    Ok(layout)
}

/// Build the wire form of a PDU.
///
/// Layout: header, optional header digest, zero padding up to the aligned
/// data offset, payload, optional data digest. Digests and padding never
/// apply to IC or termination PDUs.
pub fn construct_pdu(
    header: &PduHeader,
    flags: PduFlags,
    payload: &[u8],
    framing: &Framing,
) -> Bytes {
    let kind = header.pdu_type();
    let hlen = kind.header_len();
    let header_digest = kind.has_digests() && framing.header_digest;
    let data_digest = kind.has_digests() && framing.data_digest && !payload.is_empty();
    let header_end = hlen + if header_digest { DIGEST_SIZE } else { 0 };

    let (pdo, plen) = if payload.is_empty() {
        (0, header_end)
    } else if kind.is_term_req() {
        (0, hlen + payload.len())
    } else {
        let pdo = align_up(header_end, framing.alignment as usize);
        let trailer = if data_digest { DIGEST_SIZE } else { 0 };
        (pdo, pdo + payload.len() + trailer)
    };

    let mut flags = flags.kind_flags();
    if header_digest {
        flags = flags.union(PduFlags::HDGST);
    }
    if data_digest {
        flags = flags.union(PduFlags::DDGST);
    }

    let ch = CommonHeader {
        pdu_type: kind.as_byte(),
        flags,
        hlen: hlen as u8,
        pdo: pdo as u8,
        plen: plen as u32,
    };

    let mut head = vec![0u8; hlen];
    head[..COMMON_HEADER_SIZE].copy_from_slice(&ch.to_bytes());
    header.encode_into(&mut head);

    let mut buf = BytesMut::with_capacity(plen);
    buf.put_slice(&head);
    if header_digest {
        buf.put_u32_le(digest(&head));
    }
    if !payload.is_empty() {
        if !kind.is_term_req() {
            buf.put_bytes(0, pdo - header_end);
        }
        buf.put_slice(payload);
        if data_digest {
            buf.put_u32_le(digest(payload));
        }
    }
    debug_assert_eq!(buf.len(), plen);
    buf.freeze()
}

/// Encode a [`Pdu`] with the given framing.
pub fn encode(pdu: &Pdu, framing: &Framing) -> Bytes {
    construct_pdu(&pdu.header, pdu.flags, &pdu.data, framing)
}

/// A complete PDU read from the byte stream.
///
/// Holds the received bytes; the data section is a view into them.
#[derive(Debug, Clone)]
pub struct ReceivedPdu {
    raw: Bytes,
    common: CommonHeader,
    header: PduHeader,
    layout: PduLayout,
    data_digest_ok: bool,
}

impl ReceivedPdu {
    /// Finish decoding a PDU whose common header produced `layout`.
    ///
    /// `raw` must hold exactly `layout.plen` bytes. The header digest is
    /// verified here; a data digest mismatch is recorded, not returned.
    pub fn from_parts(raw: Bytes, layout: PduLayout) -> Result<Self, PduError> {
        if raw.len() != layout.plen {
            return Err(PduError::field(OFFSET_PLEN));
        }
        let mut ch_bytes = [0u8; COMMON_HEADER_SIZE];
        ch_bytes.copy_from_slice(&raw[..COMMON_HEADER_SIZE]);
        let common = CommonHeader::from_bytes(&ch_bytes);

        if layout.header_digest {
            verify_header_digest(&raw, layout.hlen)?;
        }
        let header = PduHeader::parse(layout.kind, &raw[..layout.hlen])?;

        let data_digest_ok = !layout.data_digest
            || verify_data_digest(&raw, layout.data_offset, layout.data_len).is_ok();

        Ok(Self {
            raw,
            common,
            header,
            layout,
            data_digest_ok,
        })
    }

    /// Validate and decode a complete PDU.
    pub fn decode(raw: Bytes, role: Role, framing: &Framing) -> Result<Self, PduError> {
        if raw.len() < COMMON_HEADER_SIZE {
            return Err(PduError::field(OFFSET_PLEN));
        }
        let mut ch_bytes = [0u8; COMMON_HEADER_SIZE];
        ch_bytes.copy_from_slice(&raw[..COMMON_HEADER_SIZE]);
        let layout = validate_header(&CommonHeader::from_bytes(&ch_bytes), role, framing)?;
        Self::from_parts(raw, layout)
    }

    /// PDU type.
    pub fn kind(&self) -> PduType {
        self.layout.kind
    }

    /// Common header.
    pub fn common(&self) -> &CommonHeader {
        &self.common
    }

    /// Kind-specific header.
    pub fn header(&self) -> &PduHeader {
        &self.header
    }

    /// Kind flags (LAST_PDU, SUCCESS).
    pub fn flags(&self) -> PduFlags {
        self.common.flags.kind_flags()
    }

    /// Section layout.
    pub fn layout(&self) -> &PduLayout {
        &self.layout
    }

    /// Data section.
    pub fn data(&self) -> Bytes {
        self.raw.slice(self.layout.data_range())
    }

    /// Data section length.
    pub fn data_len(&self) -> usize {
        self.layout.data_len
    }

    /// Check if the data digest matched (always true without data digests).
    pub fn data_digest_ok(&self) -> bool {
        self.data_digest_ok
    }

    /// Header bytes, digest included, as copied into termination requests.
    pub fn header_bytes(&self) -> &[u8] {
        &self.raw[..self.layout.header_end()]
    }

    /// Raw PDU bytes.
    pub fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    /// Framing-independent view of the PDU.
    pub fn to_pdu(&self) -> Pdu {
        Pdu {
            header: self.header.clone(),
            flags: self.flags(),
            data: self.data(),
        }
    }
}

/// Build a termination request carrying `err` and a copy of `offending`.
pub fn term_req(sender: Role, err: &PduError, offending: &[u8]) -> Bytes {
    let term = super::kinds::TermReq {
        fes: err.reason().as_u16(),
        fei: err.fei(),
    };
    let header = match PduType::term_req_from(sender) {
        PduType::H2CTermReq => PduHeader::H2CTermReq(term),
        _ => PduHeader::C2HTermReq(term),
    };
    let copy = &offending[..offending.len().min(TERM_REQ_MAX_DATA_LEN)];
    construct_pdu(&header, PduFlags::NONE, copy, &Framing::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::{Cqe, Sqe, Status};
    use crate::pdu::kinds::{DataHeader, R2tHeader};
    use rand::Rng;

    fn all_framings() -> Vec<Framing> {
        let mut out = Vec::new();
        for hd in [false, true] {
            for dd in [false, true] {
                for alignment in [4, 8, 32, 128] {
                    out.push(Framing::new(hd, dd, alignment));
                }
            }
        }
        out
    }

    fn h2c(datao: u32, data: &[u8]) -> Pdu {
        Pdu::new(PduHeader::H2CData(DataHeader {
            cccid: 3,
            ttag: 1,
            datao,
            datal: data.len() as u32,
        }))
        .with_flags(PduFlags::LAST_PDU)
        .with_data(Bytes::copy_from_slice(data))
    }

    #[test]
    fn test_roundtrip_with_digests() {
        let mut sqe = Sqe::new(0x01, 9);
        sqe.set_sgl(SGL_TYPE_ICD, 0, 5);
        let cases = [
            (
                Role::Target,
                Pdu::new(PduHeader::CapsuleCmd(sqe)).with_data(Bytes::from_static(b"hello")),
            ),
            (Role::Target, Pdu::new(PduHeader::CapsuleCmd(Sqe::new(0x02, 1)))),
            (
                Role::Initiator,
                Pdu::new(PduHeader::CapsuleResp(Cqe::new(9, Status::SUCCESS))),
            ),
            (Role::Target, h2c(4096, &[0x5A; 1000])),
            (
                Role::Initiator,
                Pdu::new(PduHeader::C2HData(DataHeader {
                    cccid: 3,
                    ttag: 0,
                    datao: 0,
                    datal: 3,
                }))
                .with_flags(PduFlags::LAST_PDU.union(PduFlags::SUCCESS))
                .with_data(Bytes::from_static(&[1, 2, 3])),
            ),
            (
                Role::Initiator,
                Pdu::new(PduHeader::R2T(R2tHeader {
                    cccid: 3,
                    ttag: 7,
                    r2to: 0,
                    r2tl: 65536,
                })),
            ),
        ];

        for framing in all_framings() {
            for (receiver, pdu) in &cases {
                let wire = encode(pdu, &framing);
                let decoded = ReceivedPdu::decode(wire.clone(), *receiver, &framing).unwrap();
                assert_eq!(&decoded.to_pdu(), pdu, "framing {framing:?}");
                assert!(decoded.data_digest_ok());
                assert_eq!(decoded.common().plen as usize, wire.len());
            }
        }
    }

    #[test]
    fn test_padding_is_zero_and_aligned() {
        let framing = Framing::new(true, true, 32);
        let wire = encode(&h2c(0, &[0xFF; 10]), &framing);
        // 24 header + 4 digest, padded to 32.
        assert_eq!(wire[3], 32);
        assert!(wire[28..32].iter().all(|&b| b == 0));
        assert_eq!(wire.len(), 32 + 10 + 4);
        assert_eq!(wire[1], FLAG_HDGSTF | FLAG_DDGSTF | FLAG_LAST_PDU);
    }

    #[test]
    fn test_no_data_has_zero_pdo() {
        let framing = Framing::new(true, true, 8);
        let wire = encode(
            &Pdu::new(PduHeader::CapsuleResp(Cqe::new(1, Status::SUCCESS))),
            &framing,
        );
        assert_eq!(wire.len(), CAPSULE_RESP_HEADER_LEN + DIGEST_SIZE);
        assert_eq!(wire[3], 0);
        assert_eq!(wire[1], FLAG_HDGSTF);
    }

    #[test]
    fn test_payload_flip_fails_data_digest() {
        let framing = Framing::new(false, true, 4);
        let payload: Vec<u8> = (0..=255u8).collect();
        let wire = encode(&h2c(0, &payload), &framing);
        let mut rng = rand::thread_rng();

        for _ in 0..64 {
            let mut corrupt = wire.to_vec();
            let at = DATA_HEADER_LEN + rng.gen_range(0..payload.len());
            corrupt[at] ^= 1 << rng.gen_range(0..8);
            let decoded =
                ReceivedPdu::decode(Bytes::from(corrupt), Role::Target, &framing).unwrap();
            assert!(!decoded.data_digest_ok());
        }
    }

    #[test]
    fn test_header_flip_fails_header_digest() {
        let framing = Framing::new(true, false, 4);
        let wire = encode(&h2c(0, &[1, 2, 3, 4]), &framing);

        // Bytes past the common header: the common header itself is checked
        // structurally first.
        for at in COMMON_HEADER_SIZE..DATA_HEADER_LEN {
            let mut corrupt = wire.to_vec();
            corrupt[at] ^= 0x10;
            let err =
                ReceivedPdu::decode(Bytes::from(corrupt), Role::Target, &framing).unwrap_err();
            assert!(matches!(err, PduError::HeaderDigest { .. }), "byte {at}");
        }

        // Every header byte, checked directly against the digest.
        for at in 0..DATA_HEADER_LEN {
            let mut corrupt = wire.to_vec();
            corrupt[at] ^= 0x01;
            assert!(verify_header_digest(&corrupt, DATA_HEADER_LEN).is_err());
        }
    }

    #[test]
    fn test_validate_rejects_wrong_role() {
        let framing = Framing::default();
        let wire = encode(&h2c(0, &[0; 4]), &framing);
        assert_eq!(
            ReceivedPdu::decode(wire, Role::Initiator, &framing).unwrap_err(),
            PduError::field(OFFSET_PDU_TYPE)
        );
    }

    #[test]
    fn test_validate_digest_flag_mismatch() {
        let sender = Framing::new(true, false, 4);
        let receiver = Framing::new(false, false, 4);
        let wire = encode(&h2c(0, &[0; 4]), &sender);
        assert_eq!(
            ReceivedPdu::decode(wire, Role::Target, &receiver).unwrap_err(),
            PduError::field(OFFSET_FLAGS)
        );

        let sender = Framing::new(false, true, 4);
        let wire = encode(&h2c(0, &[0; 4]), &sender);
        assert_eq!(
            ReceivedPdu::decode(wire, Role::Target, &receiver).unwrap_err(),
            PduError::field(OFFSET_FLAGS)
        );
    }

    #[test]
    fn test_validate_alignment() {
        let sender = Framing::new(false, false, 4);
        let receiver = Framing::new(false, false, 16);
        // pdo 24 is not a multiple of 16.
        let wire = encode(&h2c(0, &[0; 4]), &sender);
        assert_eq!(
            ReceivedPdu::decode(wire, Role::Target, &receiver).unwrap_err(),
            PduError::field(OFFSET_PDO)
        );
    }

    #[test]
    fn test_validate_structural_errors() {
        let framing = Framing::default();
        let base = CommonHeader {
            pdu_type: PDU_TYPE_H2C_DATA,
            flags: PduFlags::NONE,
            hlen: 24,
            pdo: 24,
            plen: 28,
        };
        assert!(validate_header(&base, Role::Target, &framing).is_ok());

        let ch = CommonHeader { hlen: 20, ..base };
        assert_eq!(
            validate_header(&ch, Role::Target, &framing),
            Err(PduError::field(OFFSET_HLEN))
        );

        let ch = CommonHeader { plen: 16, ..base };
        assert_eq!(
            validate_header(&ch, Role::Target, &framing),
            Err(PduError::field(OFFSET_PLEN))
        );

        let ch = CommonHeader { pdo: 20, ..base };
        assert_eq!(
            validate_header(&ch, Role::Target, &framing),
            Err(PduError::field(OFFSET_PDO))
        );

        let ch = CommonHeader {
            flags: PduFlags::SUCCESS,
            ..base
        };
        assert_eq!(
            validate_header(&ch, Role::Target, &framing),
            Err(PduError::field(OFFSET_FLAGS))
        );

        let ch = CommonHeader {
            pdu_type: 0x42,
            ..base
        };
        assert_eq!(
            validate_header(&ch, Role::Target, &framing),
            Err(PduError::field(OFFSET_PDU_TYPE))
        );

        let ch = CommonHeader {
            pdu_type: PDU_TYPE_IC_REQ,
            hlen: 128,
            pdo: 0,
            plen: 128,
            ..base
        };
        assert_eq!(
            validate_header(&ch, Role::Target, &framing),
            Err(PduError::SequenceError)
        );
    }

    #[test]
    fn test_validate_h2c_limit() {
        let framing = Framing::default().with_max_data_len(4096);
        let ch = CommonHeader {
            pdu_type: PDU_TYPE_H2C_DATA,
            flags: PduFlags::NONE,
            hlen: 24,
            pdo: 24,
            plen: 24 + 4097,
        };
        assert_eq!(
            validate_header(&ch, Role::Target, &framing),
            Err(PduError::LimitExceeded)
        );
    }

    #[test]
    fn test_validate_r2t_without_data() {
        let framing = Framing::default();
        let ch = CommonHeader {
            pdu_type: PDU_TYPE_R2T,
            flags: PduFlags::NONE,
            hlen: 24,
            pdo: 24,
            plen: 32,
        };
        assert_eq!(
            validate_header(&ch, Role::Initiator, &framing),
            Err(PduError::field(OFFSET_PLEN))
        );
    }

    #[test]
    fn test_term_req_copies_header() {
        let offending = [0xEEu8; 200];
        let wire = term_req(Role::Target, &PduError::field(OFFSET_TTAG), &offending);
        assert_eq!(wire.len(), TERM_REQ_MAX_PDU_LEN);
        assert_eq!(wire[0], PDU_TYPE_C2H_TERM_REQ);

        let decoded = ReceivedPdu::decode(wire, Role::Initiator, &Framing::new(true, true, 8))
            .unwrap();
        match decoded.header() {
            PduHeader::C2HTermReq(term) => {
                assert_eq!(term.fes, 0x01);
                assert_eq!(term.fei, OFFSET_TTAG);
            }
            other => panic!("unexpected header {other:?}"),
        }
        assert_eq!(decoded.data_len(), TERM_REQ_MAX_DATA_LEN);
    }
}
