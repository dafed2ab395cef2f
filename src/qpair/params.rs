//! Queue pair configuration and negotiated parameters.

use std::time::Duration;

use crate::core::*;
use crate::pdu::Framing;

/// Local queue pair configuration, offered during negotiation.
#[derive(Debug, Clone)]
pub struct QueuePairConfig {
    /// Request (initiator) or allow (target) header digests.
    pub header_digest: bool,

    /// Request (initiator) or allow (target) data digests.
    pub data_digest: bool,

    /// Required PDU data alignment for received PDUs, `(pda + 1) * 4` bytes.
    pub pda: u8,

    /// Max outstanding R2Ts per command, 0's based.
    pub max_r2t: u32,

    /// Max data per H2C data PDU (advertised by a target).
    pub max_h2c_data: u32,

    /// Max data placed in one transmitted data PDU.
    pub max_tx_data: u32,

    /// Max data section accepted in a received PDU (initiator).
    pub max_rx_data: u32,

    /// Max in-capsule data: sent inline by an initiator, accepted by a target.
    ///
    /// Negotiation does not carry this value. Both sides must be configured
    /// with the same limit, since a target terminates the connection when a
    /// command carries more than its own limit.
    pub max_icd: u32,

    /// Transfer tag pool size (target).
    pub num_ttags: u16,

    /// Let the target elide the response with the C2H SUCCESS flag.
    pub send_success: bool,

    /// How long to wait for the peer to close after a termination request.
    pub term_close_timeout: Duration,
}

impl Default for QueuePairConfig {
    fn default() -> Self {
        Self {
            header_digest: false,
            data_digest: false,
            pda: 0,
            max_r2t: DEFAULT_MAX_R2T,
            max_h2c_data: DEFAULT_MAX_H2C_DATA,
            max_tx_data: DEFAULT_MAX_TX_DATA,
            max_rx_data: DEFAULT_MAX_RX_DATA,
            max_icd: DEFAULT_MAX_ICD,
            num_ttags: DEFAULT_NUM_TTAGS,
            send_success: false,
            term_close_timeout: TERM_CLOSE_TIMEOUT,
        }
    }
}

impl QueuePairConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> QueuePairConfigBuilder {
        QueuePairConfigBuilder::new()
    }

    /// Reject values that cannot be negotiated.
    pub fn validate(&self) -> Result<()> {
        if self.pda > MAX_PDA {
            return Err(QueuePairError::Negotiation(format!(
                "pda {} above {MAX_PDA}",
                self.pda
            )));
        }
        if self.max_h2c_data < MIN_MAX_H2C_DATA || self.max_h2c_data % 4 != 0 {
            return Err(QueuePairError::Negotiation(format!(
                "max_h2c_data {} must be a multiple of 4 and at least {MIN_MAX_H2C_DATA}",
                self.max_h2c_data
            )));
        }
        if self.max_tx_data == 0 {
            return Err(QueuePairError::Negotiation("max_tx_data is zero".into()));
        }
        if self.num_ttags == 0 {
            return Err(QueuePairError::Negotiation("num_ttags is zero".into()));
        }
        Ok(())
    }

    /// Alignment in bytes this side requires of received PDUs.
    pub fn alignment(&self) -> u32 {
        pda_to_alignment(self.pda)
    }
}

/// Builder for [`QueuePairConfig`].
#[derive(Debug, Default)]
pub struct QueuePairConfigBuilder {
    config: QueuePairConfig,
}

impl QueuePairConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request or allow header digests.
    pub fn header_digest(mut self, enabled: bool) -> Self {
        self.config.header_digest = enabled;
        self
    }

    /// Request or allow data digests.
    pub fn data_digest(mut self, enabled: bool) -> Self {
        self.config.data_digest = enabled;
        self
    }

    /// Set the PDU data alignment value.
    pub fn pda(mut self, pda: u8) -> Self {
        self.config.pda = pda;
        self
    }

    /// Set max outstanding R2Ts per command (0's based).
    pub fn max_r2t(mut self, max_r2t: u32) -> Self {
        self.config.max_r2t = max_r2t;
        self
    }

    /// Set max data per H2C data PDU.
    pub fn max_h2c_data(mut self, len: u32) -> Self {
        self.config.max_h2c_data = len;
        self
    }

    /// Set max data per transmitted data PDU.
    pub fn max_tx_data(mut self, len: u32) -> Self {
        self.config.max_tx_data = len;
        self
    }

    /// Set max data section of a received PDU.
    pub fn max_rx_data(mut self, len: u32) -> Self {
        self.config.max_rx_data = len;
        self
    }

    /// Set max in-capsule data.
    pub fn max_icd(mut self, len: u32) -> Self {
        self.config.max_icd = len;
        self
    }

    /// Set the transfer tag pool size.
    pub fn num_ttags(mut self, count: u16) -> Self {
        self.config.num_ttags = count;
        self
    }

    /// Enable the C2H SUCCESS shortcut.
    pub fn send_success(mut self, enabled: bool) -> Self {
        self.config.send_success = enabled;
        self
    }

    /// Set the close timeout after a termination request.
    pub fn term_close_timeout(mut self, timeout: Duration) -> Self {
        self.config.term_close_timeout = timeout;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> QueuePairConfig {
        self.config
    }
}

/// Convert a wire PDA value to bytes.
pub fn pda_to_alignment(pda: u8) -> u32 {
    (u32::from(pda) + 1) * 4
}

/// Parameters a queue pair runs with, fixed at negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePairParams {
    /// Side this queue pair plays.
    pub role: Role,
    /// Header digests enabled.
    pub header_digest: bool,
    /// Data digests enabled.
    pub data_digest: bool,
    /// Alignment of transmitted PDU data, in bytes.
    pub tx_alignment: u32,
    /// Alignment of received PDU data, in bytes.
    pub rx_alignment: u32,
    /// Max outstanding R2Ts per command, 0's based.
    pub max_r2t: u32,
    /// Max data per H2C data PDU.
    pub max_h2c_data: u32,
    /// Max data per transmitted data PDU.
    pub max_tx_data: u32,
    /// Max data section of a received PDU (initiator).
    pub max_rx_data: u32,
    /// Max in-capsule data.
    pub max_icd: u32,
    /// Transfer tag pool size.
    pub num_ttags: u16,
    /// C2H SUCCESS shortcut enabled.
    pub send_success: bool,
    /// Close timeout after a termination request.
    pub term_close_timeout: Duration,
}

impl QueuePairParams {
    /// Parameters taken directly from `config`, both directions using its
    /// alignment and digest settings.
    pub fn from_config(role: Role, config: &QueuePairConfig) -> Self {
        Self {
            role,
            header_digest: config.header_digest,
            data_digest: config.data_digest,
            tx_alignment: config.alignment(),
            rx_alignment: config.alignment(),
            max_r2t: config.max_r2t,
            max_h2c_data: config.max_h2c_data,
            max_tx_data: config.max_tx_data,
            max_rx_data: config.max_rx_data,
            max_icd: config.max_icd,
            num_ttags: config.num_ttags,
            send_success: config.send_success,
            term_close_timeout: config.term_close_timeout,
        }
    }

    /// Reject parameters the engine cannot run with.
    ///
    /// [`QueuePairParams::from_config`] of a validated configuration always
    /// passes; hand-built parameters may not.
    pub fn validate(&self) -> Result<()> {
        if self.max_h2c_data == 0 || self.max_tx_data == 0 {
            return Err(QueuePairError::Negotiation(format!(
                "data pdu size must be nonzero (max_h2c_data {}, max_tx_data {})",
                self.max_h2c_data, self.max_tx_data
            )));
        }
        if self.tx_alignment == 0 || self.rx_alignment == 0 {
            return Err(QueuePairError::Negotiation("alignment is zero".into()));
        }
        Ok(())
    }

    /// Effective outstanding R2T limit per command.
    pub fn max_outstanding_r2ts(&self) -> u32 {
        self.max_r2t.saturating_add(1)
    }

    /// Largest H2C data PDU payload the initiator sends.
    pub fn h2c_chunk(&self) -> u32 {
        self.max_h2c_data.min(self.max_tx_data)
    }

    /// Framing of received PDUs.
    pub fn rx_framing(&self) -> Framing {
        let max_data_len = match self.role {
            Role::Initiator => self.max_rx_data,
            Role::Target => self.max_h2c_data.max(self.max_icd),
        };
        Framing::new(self.header_digest, self.data_digest, self.rx_alignment)
            .with_max_data_len(max_data_len)
    }

    /// Framing of transmitted PDUs.
    pub fn tx_framing(&self) -> Framing {
        Framing::new(self.header_digest, self.data_digest, self.tx_alignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = QueuePairConfig::builder()
            .header_digest(true)
            .pda(3)
            .max_r2t(2)
            .max_icd(0)
            .num_ttags(8)
            .send_success(true)
            .term_close_timeout(Duration::from_millis(50))
            .build();
        assert!(config.header_digest);
        assert!(!config.data_digest);
        assert_eq!(config.alignment(), 16);
        assert_eq!(config.max_icd, 0);
        assert!(config.validate().is_ok());

        let params = QueuePairParams::from_config(Role::Target, &config);
        assert_eq!(params.max_outstanding_r2ts(), 3);
        assert_eq!(params.rx_framing().alignment, 16);
        assert_eq!(params.rx_framing().max_data_len, DEFAULT_MAX_H2C_DATA);
        assert!(params.tx_framing().header_digest);
    }

    #[test]
    fn test_validate_rejects() {
        let bad = [
            QueuePairConfig::builder().pda(32).build(),
            QueuePairConfig::builder().max_h2c_data(2048).build(),
            QueuePairConfig::builder().max_h2c_data(4098).build(),
            QueuePairConfig::builder().max_tx_data(0).build(),
            QueuePairConfig::builder().num_ttags(0).build(),
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(QueuePairError::Negotiation(_))
            ));
        }
        assert!(QueuePairConfig::default().validate().is_ok());
    }

    #[test]
    fn test_h2c_chunk() {
        let config = QueuePairConfig::builder()
            .max_h2c_data(8192)
            .max_tx_data(4096)
            .build();
        let params = QueuePairParams::from_config(Role::Initiator, &config);
        assert_eq!(params.h2c_chunk(), 4096);
        assert_eq!(params.rx_framing().max_data_len, DEFAULT_MAX_RX_DATA);
    }

    #[test]
    fn test_params_validate() {
        let params = QueuePairParams::from_config(Role::Target, &QueuePairConfig::default());
        assert!(params.validate().is_ok());

        let zero_tx = QueuePairParams {
            max_tx_data: 0,
            ..params
        };
        let zero_h2c = QueuePairParams {
            max_h2c_data: 0,
            ..params
        };
        let zero_alignment = QueuePairParams {
            rx_alignment: 0,
            ..params
        };
        for bad in [zero_tx, zero_h2c, zero_alignment] {
            assert!(matches!(
                bad.validate(),
                Err(QueuePairError::Negotiation(_))
            ));
        }
    }
}
