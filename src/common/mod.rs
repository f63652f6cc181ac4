mod bitmask;
mod filemap;
mod oti;
mod partition;
pub mod wire;

pub use bitmask::Bitmask256;
pub use filemap::{padded_size, FileMap, FileMapMut};
pub use oti::{TransferParams, DEFAULT_SYMBOL_SIZE, MAX_BLOCKS};

use std::time::Duration;

/// Default UDP port of the receiver.
pub const DEFAULT_PORT: u16 = 6330;

/// Interval between two heartbeat acknowledgements from the receiver.
pub const HEARTBEAT: Duration = Duration::from_millis(50);

/// How long the sender keeps draining the socket after the last block is
/// acknowledged, and how long a complete receiver waits for silence.
pub const TEARDOWN_WINDOW: Duration = Duration::from_millis(100);
