//! Core types, constants, errors and collaborator traits.
//!
//! Everything here is free of I/O and shared by the codec, the buffer manager
//! and the queue pair engine.

mod constants;
mod error;
mod traits;

pub use constants::*;
pub use error::*;
pub use traits::*;

/// Side of the connection a queue pair plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Host: sends commands, receives responses.
    Initiator,
    /// Controller: receives commands, sends responses.
    Target,
}

impl Role {
    /// Check if this is the initiator role.
    pub fn is_initiator(self) -> bool {
        self == Self::Initiator
    }

    /// Check if this is the target role.
    pub fn is_target(self) -> bool {
        self == Self::Target
    }
}
