//! # nvmf-tcp
//!
//! Capsule transport for NVMe over a reliable byte stream.
//!
//! A queue pair carries command and response capsules between a host
//! (initiator) and a controller (target) as PDUs: an 8-byte common header,
//! a type-specific header, optional CRC-32C header and data digests, and
//! padding that aligns the data section to what the receiver asked for.
//! Command data travels either inside the command capsule or through
//! R2T-solicited H2C transfers (writes) and C2H transfers (reads).
//!
//! ## Feature Flags
//!
//! - `transport` (default): TCP connect/accept helpers on top of `tokio::net`
//!
//! ## Modules
//!
//! - [`core`]: Constants, error types and the memory descriptor trait
//! - [`pdu`]: PDU headers, digests and framing
//! - [`capsule`]: Submission/completion entries and capsules
//! - [`buffer`]: Command buffers and memory descriptors
//! - [`qpair`]: Negotiation and the queue pair engine
//! - [`transport`]: TCP sockets (requires `transport` feature)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use nvmf_tcp::prelude::*;
//!
//! # async fn run() -> nvmf_tcp::core::Result<()> {
//! let config = QueuePairConfig::builder().data_digest(true).build();
//! let mut conn = connect("127.0.0.1:4420", &config).await?;
//!
//! let mut sqe = Sqe::new(0x01, 1);
//! sqe.set_nsid(1);
//! let mem = VecMemory::from_vec(vec![0xA5; 4096]);
//! conn.qpair.submit(conn.qpair.command(sqe).with_data(mem, 4096, true))?;
//!
//! if let Some(QueuePairEvent::CapsuleReceived(resp)) = conn.events.recv().await {
//!     println!("cid {} done: {:?}", resp.cid(), resp.cqe().map(Cqe::status));
//! }
//! conn.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod buffer;
pub mod capsule;
pub mod pdu;
pub mod qpair;

// TCP transport (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::buffer::{Completion, VecMemory};
    pub use crate::capsule::{Capsule, CapsuleKind, Cqe, DataDirection, Sqe, Status};
    pub use crate::pdu::{Pdu, PduFlags, PduHeader, PduType};
    pub use crate::qpair::{
        ConnectionPhase, DataTransferStatus, EventReceiver, QueuePair, QueuePairConfig,
        QueuePairEvent, QueuePairParams, QueuePairTasks,
    };

    #[cfg(feature = "transport")]
    pub use crate::transport::{Connection, Listener, connect};
}

// Re-export commonly used items at crate root
pub use crate::core::{MemoryDescriptor, PduError, QueuePairError, Role, TransferError};
pub use crate::qpair::{QueuePair, QueuePairConfig, QueuePairEvent};
