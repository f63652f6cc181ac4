use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::fd::AsRawFd;
use std::time::Duration;

use crate::tools::error::Result;

///
/// Socket failure, classified so a control loop knows whether to retry in
/// place or give the connection up.
///
#[derive(Debug)]
pub enum SockError {
    /// Nothing to read or no room to write; retry after the next readiness
    /// wait.
    WouldBlock,
    /// The peer is gone.
    Closed,
    /// Unrecoverable transport failure.
    Fatal(std::io::Error),
}

/// Result of a send or receive on a [`DatagramSock`].
pub type SockResult<T> = std::result::Result<T, SockError>;

fn classify(err: std::io::Error) -> SockError {
    match err.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => SockError::WouldBlock,
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected => SockError::Closed,
        _ => SockError::Fatal(err),
    }
}

/// Readiness reported by [`DatagramSock::poll`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    /// A datagram (or a pending socket error) can be read.
    pub readable: bool,
    /// A datagram can be written.
    pub writable: bool,
}

///
/// UDP datagram socket.
///
/// The one concrete variant of the transport capability set
/// {bind, connect, send, recv, poll} the endpoints are written against.
/// Datagram boundaries are preserved by UDP itself; readiness is a
/// `poll(2)` wait so a control loop never spins on `WouldBlock`.
///
#[derive(Debug)]
pub struct DatagramSock {
    sock: UdpSocket,
}

impl DatagramSock {
    /// Bind a socket on `addr`.
    pub fn bind(addr: SocketAddr) -> Result<DatagramSock> {
        let sock = UdpSocket::bind(addr)?;
        Ok(DatagramSock { sock })
    }

    /// Return a socket connected to `addr`, bound to an ephemeral local port.
    pub fn connect_to<A: ToSocketAddrs>(addr: A) -> Result<DatagramSock> {
        let sock = UdpSocket::bind("0.0.0.0:0")?;
        sock.connect(addr)?;
        Ok(DatagramSock { sock })
    }

    /// Connect this socket to a peer, fixing the destination of `send` and
    /// filtering `recv` to that peer.
    pub fn connect(&self, addr: SocketAddr) -> Result<()> {
        self.sock.connect(addr)?;
        Ok(())
    }

    /// The local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let addr = self.sock.local_addr()?;
        Ok(addr)
    }

    /// Switch between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.sock.set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// Send one datagram to the connected peer.
    pub fn send(&self, buf: &[u8]) -> SockResult<usize> {
        self.sock.send(buf).map_err(classify)
    }

    /// Receive one datagram from the connected peer.
    pub fn recv(&self, buf: &mut [u8]) -> SockResult<usize> {
        self.sock.recv(buf).map_err(classify)
    }

    /// Receive one datagram and the address it came from.
    pub fn recv_from(&self, buf: &mut [u8]) -> SockResult<(usize, SocketAddr)> {
        self.sock.recv_from(buf).map_err(classify)
    }

    /// Wait until the socket is ready. `None` waits indefinitely.
    pub fn poll(&self, readable: bool, writable: bool, timeout: Option<Duration>) -> Result<Readiness> {
        let mut events: libc::c_short = 0;
        if readable {
            events |= libc::POLLIN;
        }
        if writable {
            events |= libc::POLLOUT;
        }
        let mut fds = libc::pollfd {
            fd: self.sock.as_raw_fd(),
            events,
            revents: 0,
        };
        let timeout_ms = match timeout {
            Some(timeout) => timeout.as_millis().min(i32::MAX as u128) as libc::c_int,
            None => -1,
        };

        loop {
            let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            return Ok(Readiness {
                readable: fds.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0,
                writable: fds.revents & libc::POLLOUT != 0,
            });
        }
    }
}
