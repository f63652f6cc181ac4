//!
//! Facade around the RFC 6330 (RaptorQ) codec.
//!
//! The transport only ever talks to [`ObjectEncoder`] and [`ObjectDecoder`];
//! everything specific to the `raptorq` crate stays inside this module.
//!

mod raptorq;

pub use self::raptorq::{ObjectDecoder, ObjectEncoder};
