//! Protocol constants for the NVMe/TCP transport binding.
//!
//! Wire values are fixed by the protocol and MUST NOT be changed. Defaults at
//! the bottom of this file are local policy.

use std::time::Duration;

// =============================================================================
// PDU TYPES
// =============================================================================

/// Initialize connection request (host to controller).
pub const PDU_TYPE_IC_REQ: u8 = 0x00;

/// Initialize connection response (controller to host).
pub const PDU_TYPE_IC_RESP: u8 = 0x01;

/// Host to controller termination request.
pub const PDU_TYPE_H2C_TERM_REQ: u8 = 0x02;

/// Controller to host termination request.
pub const PDU_TYPE_C2H_TERM_REQ: u8 = 0x03;

/// Command capsule.
pub const PDU_TYPE_CAPSULE_CMD: u8 = 0x04;

/// Response capsule.
pub const PDU_TYPE_CAPSULE_RESP: u8 = 0x05;

/// Host to controller data.
pub const PDU_TYPE_H2C_DATA: u8 = 0x06;

/// Controller to host data.
pub const PDU_TYPE_C2H_DATA: u8 = 0x07;

/// Ready to transfer.
pub const PDU_TYPE_R2T: u8 = 0x09;

// =============================================================================
// COMMON HEADER FLAGS
// =============================================================================

/// Header digest present.
pub const FLAG_HDGSTF: u8 = 0x01;

/// Data digest present.
pub const FLAG_DDGSTF: u8 = 0x02;

/// Last data PDU of a transfer (H2C and C2H data).
pub const FLAG_LAST_PDU: u8 = 0x04;

/// Command completed successfully, no response capsule follows (C2H data).
pub const FLAG_SUCCESS: u8 = 0x08;

// =============================================================================
// HEADER SIZES
// =============================================================================

/// Common header size (type + flags + hlen + pdo + plen).
pub const COMMON_HEADER_SIZE: usize = 8;

/// ICReq / ICResp header length.
pub const IC_HEADER_LEN: usize = 128;

/// Termination request header length.
pub const TERM_REQ_HEADER_LEN: usize = 24;

/// Command capsule header length (common header + SQE).
pub const CAPSULE_CMD_HEADER_LEN: usize = COMMON_HEADER_SIZE + SQE_SIZE;

/// Response capsule header length (common header + CQE).
pub const CAPSULE_RESP_HEADER_LEN: usize = COMMON_HEADER_SIZE + CQE_SIZE;

/// H2C / C2H data header length.
pub const DATA_HEADER_LEN: usize = 24;

/// R2T header length.
pub const R2T_HEADER_LEN: usize = 24;

/// Header and data digest size (CRC-32C).
pub const DIGEST_SIZE: usize = 4;

/// Submission queue entry size.
pub const SQE_SIZE: usize = 64;

/// Completion queue entry size.
pub const CQE_SIZE: usize = 16;

/// Largest termination request PDU, header included.
pub const TERM_REQ_MAX_PDU_LEN: usize = 152;

/// Largest header copy carried by a termination request.
pub const TERM_REQ_MAX_DATA_LEN: usize = TERM_REQ_MAX_PDU_LEN - TERM_REQ_HEADER_LEN;

// =============================================================================
// FIELD OFFSETS (used as field error information in termination requests)
// =============================================================================

/// Offset of the PDU type byte.
pub const OFFSET_PDU_TYPE: u32 = 0;

/// Offset of the flags byte.
pub const OFFSET_FLAGS: u32 = 1;

/// Offset of the header length byte.
pub const OFFSET_HLEN: u32 = 2;

/// Offset of the PDU data offset byte.
pub const OFFSET_PDO: u32 = 3;

/// Offset of the PDU length field.
pub const OFFSET_PLEN: u32 = 4;

/// Offset of `cccid` in data and R2T PDUs.
pub const OFFSET_CCCID: u32 = 8;

/// Offset of `ttag` in H2C data and R2T PDUs.
pub const OFFSET_TTAG: u32 = 10;

/// Offset of `datao` / `r2to`.
pub const OFFSET_DATAO: u32 = 12;

/// Offset of `datal` / `r2tl`.
pub const OFFSET_DATAL: u32 = 16;

/// Offset of `pfv` in IC PDUs.
pub const OFFSET_PFV: u32 = 8;

/// Offset of `hpda` / `cpda` in IC PDUs.
pub const OFFSET_PDA: u32 = 10;

/// Offset of `dgst` in IC PDUs.
pub const OFFSET_DGST: u32 = 11;

/// Offset of `maxr2t` / `maxh2cdata` in IC PDUs.
pub const OFFSET_IC_LIMIT: u32 = 12;

// =============================================================================
// NEGOTIATION
// =============================================================================

/// PDU format version.
pub const PDU_FORMAT_VERSION: u16 = 0;

/// Largest encodable PDU data alignment value (`(pda + 1) * 4` bytes).
pub const MAX_PDA: u8 = 31;

/// `dgst` bit requesting header digests.
pub const DGST_HEADER: u8 = 0x01;

/// `dgst` bit requesting data digests.
pub const DGST_DATA: u8 = 0x02;

/// Smallest legal MAXH2CDATA.
pub const MIN_MAX_H2C_DATA: u32 = 4096;

// =============================================================================
// STATUS CODES
// =============================================================================

/// Generic command status type.
pub const SCT_GENERIC: u8 = 0x0;

/// Successful completion.
pub const SC_SUCCESS: u8 = 0x00;

/// Data transfer error.
pub const SC_DATA_TRANSFER_ERROR: u8 = 0x04;

/// Transient transport error.
pub const SC_TRANSIENT_TRANSPORT_ERROR: u8 = 0x22;

// =============================================================================
// SGL DESCRIPTORS
// =============================================================================

/// Data block descriptor with offset subtype (in-capsule data).
pub const SGL_TYPE_ICD: u8 = 0x01;

/// Transport specific data block descriptor (data moved by R2T / C2H).
pub const SGL_TYPE_COMMAND_BUFFER: u8 = 0x5a;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Default PDU data alignment in bytes (pda = 0).
pub const DEFAULT_ALIGNMENT: u32 = 4;

/// Default max outstanding R2Ts per command (0's based).
pub const DEFAULT_MAX_R2T: u32 = 0;

/// Default MAXH2CDATA advertised by a controller.
pub const DEFAULT_MAX_H2C_DATA: u32 = 256 * 1024;

/// Default max payload placed in one transmitted data PDU.
pub const DEFAULT_MAX_TX_DATA: u32 = 256 * 1024;

/// Default cap on the data section of a received PDU.
pub const DEFAULT_MAX_RX_DATA: u32 = 1024 * 1024;

/// Default in-capsule data size accepted by a controller.
pub const DEFAULT_MAX_ICD: u32 = 8192;

/// Default transfer tag pool size.
pub const DEFAULT_NUM_TTAGS: u16 = 64;

/// Wait this long for the peer to close after a termination request.
pub const TERM_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
