//!
//! Sending endpoint: opens the file, sizes the encoder, runs the handshake
//! and drives the two-phase symbol schedule until every block is
//! acknowledged.
//!

mod handshake;
mod session;

pub use crate::common::wire::REPAIR_SUSPEND;
pub use session::{Config, SenderSession, TransferReport};
