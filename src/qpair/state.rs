//! Connection lifecycle.

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Negotiated, PDU traffic flowing.
    Established,
    /// A termination request is queued; waiting for the peer to close.
    Terminating,
    /// Closed locally.
    Closed,
    /// Connection failed (protocol error, peer termination, I/O error).
    Failed,
}

impl ConnectionPhase {
    /// Check if new capsules and transfers are accepted.
    pub fn is_established(self) -> bool {
        self == Self::Established
    }

    /// Check if teardown has run.
    pub fn is_torn_down(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Phase after a termination request has been queued. Only an
    /// established connection starts terminating.
    pub fn terminate(self) -> Self {
        match self {
            Self::Established => Self::Terminating,
            other => other,
        }
    }

    /// Phase after teardown.
    pub fn tear_down(self, failed: bool) -> Self {
        match self {
            Self::Closed | Self::Failed => self,
            _ if failed => Self::Failed,
            _ => Self::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let phase = ConnectionPhase::Established;
        assert!(phase.is_established());
        assert_eq!(phase.terminate(), ConnectionPhase::Terminating);
        assert_eq!(phase.tear_down(false), ConnectionPhase::Closed);
        assert_eq!(phase.terminate().tear_down(true), ConnectionPhase::Failed);

        // Terminal phases are sticky.
        assert_eq!(
            ConnectionPhase::Closed.tear_down(true),
            ConnectionPhase::Closed
        );
        assert_eq!(ConnectionPhase::Failed.terminate(), ConnectionPhase::Failed);
        assert!(ConnectionPhase::Failed.is_torn_down());
        assert!(!ConnectionPhase::Terminating.is_torn_down());
    }
}
