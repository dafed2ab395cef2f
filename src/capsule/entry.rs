//! Submission and completion queue entries carried by capsules.
//!
//! The command layer fills these in; the transport reads the command id and
//! data pointer and rewrites the SGL descriptor to describe how the data
//! moves on the wire.

use crate::core::*;

/// Direction of the data phase encoded in the opcode's low two bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    /// No data phase.
    None,
    /// Host to controller (write).
    HostToController,
    /// Controller to host (read).
    ControllerToHost,
    /// Both directions.
    Bidirectional,
}

/// 64-byte submission queue entry.
///
/// ```text
/// 0      1      2      4      8        24             40          64
/// +------+------+------+------+--------+--------------+-----------+
/// |opcode|flags | cid  | nsid | rsvd/  | SGL1 (dptr)  | cdw10-15  |
/// |      |      |      |      | mptr   |              |           |
/// +------+------+------+------+--------+--------------+-----------+
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Sqe([u8; SQE_SIZE]);

impl Sqe {
    /// PSDT value selecting SGLs for the data pointer.
    const PSDT_SGL: u8 = 0x40;

    /// Create an entry with the given opcode and command id.
    pub fn new(opcode: u8, cid: u16) -> Self {
        let mut bytes = [0u8; SQE_SIZE];
        bytes[0] = opcode;
        bytes[1] = Self::PSDT_SGL;
        bytes[2..4].copy_from_slice(&cid.to_le_bytes());
        Self(bytes)
    }

    /// Wrap raw entry bytes.
    pub fn from_bytes(bytes: [u8; SQE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice of at least 64 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; SQE_SIZE] = bytes.get(..SQE_SIZE)?.try_into().ok()?;
        Some(Self(raw))
    }

    /// Raw entry bytes.
    pub fn as_bytes(&self) -> &[u8; SQE_SIZE] {
        &self.0
    }

    /// Opcode.
    pub fn opcode(&self) -> u8 {
        self.0[0]
    }

    /// Command identifier.
    pub fn cid(&self) -> u16 {
        u16::from_le_bytes([self.0[2], self.0[3]])
    }

    /// Set the command identifier.
    pub fn set_cid(&mut self, cid: u16) {
        self.0[2..4].copy_from_slice(&cid.to_le_bytes());
    }

    /// Namespace identifier.
    pub fn nsid(&self) -> u32 {
        u32::from_le_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    /// Set the namespace identifier.
    pub fn set_nsid(&mut self, nsid: u32) {
        self.0[4..8].copy_from_slice(&nsid.to_le_bytes());
    }

    /// Command dword 10 through 15 (`index` 10..=15).
    pub fn cdw(&self, index: usize) -> u32 {
        let start = 40 + (index - 10) * 4;
        u32::from_le_bytes([
            self.0[start],
            self.0[start + 1],
            self.0[start + 2],
            self.0[start + 3],
        ])
    }

    /// Set command dword 10 through 15.
    pub fn set_cdw(&mut self, index: usize, value: u32) {
        let start = 40 + (index - 10) * 4;
        self.0[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Data direction implied by the opcode.
    pub fn data_direction(&self) -> DataDirection {
        match self.opcode() & 0x03 {
            0b01 => DataDirection::HostToController,
            0b10 => DataDirection::ControllerToHost,
            0b11 => DataDirection::Bidirectional,
            _ => DataDirection::None,
        }
    }

    /// SGL descriptor address.
    pub fn sgl_address(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.0[24..32]);
        u64::from_le_bytes(raw)
    }

    /// SGL descriptor length: total bytes of the command's data.
    pub fn sgl_length(&self) -> u32 {
        u32::from_le_bytes([self.0[32], self.0[33], self.0[34], self.0[35]])
    }

    /// SGL descriptor identifier (type in the high nibble, subtype low).
    pub fn sgl_type(&self) -> u8 {
        self.0[39]
    }

    /// Rewrite SGL1 as a single data block descriptor.
    pub fn set_sgl(&mut self, sgl_type: u8, address: u64, length: u32) {
        self.0[24..32].copy_from_slice(&address.to_le_bytes());
        self.0[32..36].copy_from_slice(&length.to_le_bytes());
        self.0[36..39].fill(0);
        self.0[39] = sgl_type;
    }
}

impl std::fmt::Debug for Sqe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sqe")
            .field("opcode", &self.opcode())
            .field("cid", &self.cid())
            .field("nsid", &self.nsid())
            .field("sgl_type", &self.sgl_type())
            .field("sgl_length", &self.sgl_length())
            .finish()
    }
}

/// Completion status (status code type and status code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Status code type.
    pub sct: u8,
    /// Status code.
    pub sc: u8,
}

impl Status {
    /// Successful completion.
    pub const SUCCESS: Self = Self {
        sct: SCT_GENERIC,
        sc: SC_SUCCESS,
    };

    /// Transient transport error, retry may succeed.
    pub const TRANSIENT_TRANSPORT_ERROR: Self = Self {
        sct: SCT_GENERIC,
        sc: SC_TRANSIENT_TRANSPORT_ERROR,
    };

    /// Data transfer error.
    pub const DATA_TRANSFER_ERROR: Self = Self {
        sct: SCT_GENERIC,
        sc: SC_DATA_TRANSFER_ERROR,
    };

    /// Check if this is a successful completion.
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Encode into the CQE status field (phase bit left clear).
    pub fn to_field(self) -> u16 {
        ((self.sct as u16 & 0x7) << 9) | ((self.sc as u16) << 1)
    }

    /// Decode from the CQE status field.
    pub fn from_field(field: u16) -> Self {
        Self {
            sct: ((field >> 9) & 0x7) as u8,
            sc: ((field >> 1) & 0xff) as u8,
        }
    }
}

/// 16-byte completion queue entry.
///
/// ```text
/// 0        4        8      10     12     14       16
/// +--------+--------+------+------+------+--------+
/// | dw0    | dw1    | sqhd | sqid | cid  | status |
/// +--------+--------+------+------+------+--------+
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Cqe([u8; CQE_SIZE]);

impl Cqe {
    /// Create a completion for `cid` with `status`.
    pub fn new(cid: u16, status: Status) -> Self {
        let mut bytes = [0u8; CQE_SIZE];
        bytes[12..14].copy_from_slice(&cid.to_le_bytes());
        bytes[14..16].copy_from_slice(&status.to_field().to_le_bytes());
        Self(bytes)
    }

    /// Wrap raw entry bytes.
    pub fn from_bytes(bytes: [u8; CQE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice of at least 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; CQE_SIZE] = bytes.get(..CQE_SIZE)?.try_into().ok()?;
        Some(Self(raw))
    }

    /// Raw entry bytes.
    pub fn as_bytes(&self) -> &[u8; CQE_SIZE] {
        &self.0
    }

    /// Command specific dword 0.
    pub fn dw0(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Set command specific dword 0.
    pub fn set_dw0(&mut self, value: u32) {
        self.0[0..4].copy_from_slice(&value.to_le_bytes());
    }

    /// Submission queue head pointer.
    pub fn sqhd(&self) -> u16 {
        u16::from_le_bytes([self.0[8], self.0[9]])
    }

    /// Set the submission queue head pointer.
    pub fn set_sqhd(&mut self, sqhd: u16) {
        self.0[8..10].copy_from_slice(&sqhd.to_le_bytes());
    }

    /// Submission queue identifier.
    pub fn sqid(&self) -> u16 {
        u16::from_le_bytes([self.0[10], self.0[11]])
    }

    /// Command identifier.
    pub fn cid(&self) -> u16 {
        u16::from_le_bytes([self.0[12], self.0[13]])
    }

    /// Completion status.
    pub fn status(&self) -> Status {
        Status::from_field(u16::from_le_bytes([self.0[14], self.0[15]]))
    }
}

impl std::fmt::Debug for Cqe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cqe")
            .field("cid", &self.cid())
            .field("sqhd", &self.sqhd())
            .field("status", &self.status())
            .finish()
    }
}
