mod socket;

pub use socket::{DatagramSock, SockError};
