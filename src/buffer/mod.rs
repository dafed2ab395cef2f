//! Command buffer manager.
//!
//! Command buffers track transfers of command data. The initiator keeps
//! them in a receive list (reads) and a transmit list (writes). The target
//! keeps a tag table of buffers with an outstanding R2T and a FIFO of
//! buffers waiting for one.

mod command;
mod list;
mod memory;
mod tags;

pub(crate) use command::CommandBuffer;
pub(crate) use list::BufferList;
pub use memory::{Completion, VecMemory};
pub(crate) use tags::TagTable;
