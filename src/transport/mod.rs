//! TCP transport.
//!
//! Thin glue between `tokio::net` sockets and the queue pair engine: a
//! [`Listener`] accepts host connections and negotiates as target,
//! [`connect`] dials a controller and negotiates as initiator. Either way
//! the result is a running [`Connection`].
//!
//! ```text
//! host                         controller
//!  connect ──── TCP ────> Listener::accept
//!     ICReq ──────────────────>
//!     <────────────────── ICResp
//!  Connection              Connection
//! ```

mod socket;

pub use socket::*;
