//! # rqferry: reliable bulk file transfer over RaptorQ
//!
//! One sender delivers one file to one receiver over lossy UDP datagrams,
//! using RaptorQ forward error correction instead of retransmission. The
//! receiver acknowledges decoded blocks in a 256-bit mask and feeds a
//! loss-rate estimate back to the sender, which adapts how many repair
//! symbols it interleaves with the source sweep.
//!
//! # RFC
//!
//! | RFC      | Title      | Link       |
//! | ------------- | ------------- | ------------- |
//! | RFC 6330 | RaptorQ Forward Error Correction Scheme for Object Delivery | <https://www.rfc-editor.org/rfc/rfc6330.html> |
//! | RFC 5052 | Forward Error Correction (FEC) Building Block | <https://www.rfc-editor.org/rfc/rfc5052> |
//!

#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

mod common;
mod fec;
mod net;
mod tools;

pub mod receiver;
pub mod sender;

pub use crate::common::{DEFAULT_PORT, DEFAULT_SYMBOL_SIZE};
pub use crate::tools::error;
