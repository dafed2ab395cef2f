//! PDU codec.
//!
//! ```text
//! +---------------+--------+--------+---------+-----------+
//! | Common header | Kind   | HDGST  | PAD     | DATA      | DDGST
//! | 8 bytes       | fields | 0 or 4 | to PDO  | 0..N      | 0 or 4
//! +---------------+--------+--------+---------+-----------+
//! |<-------- hlen -------->|
//! ```

mod codec;
mod digest;
mod header;
mod kinds;

pub use codec::*;
pub use digest::*;
pub use header::*;
pub use kinds::*;
