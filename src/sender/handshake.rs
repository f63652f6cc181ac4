use std::time::{Duration, Instant};

use crate::common::wire::{HandshakeReq, HandshakeResp};
use crate::net::{DatagramSock, SockError};
use crate::tools::error::{FerryError, Result};

/// Attempts before the handshake is abandoned.
const HANDSHAKE_RETRIES: u32 = 5;

/// How long to wait for the response to one request.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// Send `req` and wait for the matching response, retrying on timeout.
///
/// A response carrying a different connection id is fatal; a `Closed` socket
/// result only burns the current attempt, so a receiver that comes up a
/// moment late is still caught.
pub fn initiate(sock: &DatagramSock, req: &HandshakeReq) -> Result<()> {
    let encoded = req.encode()?;
    let mut buf = [0u8; 128];

    for attempt in 1..=HANDSHAKE_RETRIES {
        log::info!(
            "handshake attempt {}/{}: connection {:#010x}, {:?} ({} bytes)",
            attempt,
            HANDSHAKE_RETRIES,
            req.connection_id,
            req.file_name,
            req.file_size
        );

        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        match sock.send(&encoded) {
            Ok(_) => {}
            Err(SockError::WouldBlock) | Err(SockError::Closed) => {
                wait_out(deadline);
                continue;
            }
            Err(SockError::Fatal(err)) => return Err(err.into()),
        }

        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            let ready = sock.poll(true, false, Some(left))?;
            if !ready.readable {
                continue;
            }
            let n = match sock.recv(&mut buf) {
                Ok(n) => n,
                Err(SockError::WouldBlock) => continue,
                Err(SockError::Closed) => {
                    wait_out(deadline);
                    break;
                }
                Err(SockError::Fatal(err)) => return Err(err.into()),
            };
            let resp = match HandshakeResp::decode(&buf[..n]) {
                Ok(resp) => resp,
                Err(_) => {
                    log::warn!("dropping unexpected datagram during handshake");
                    continue;
                }
            };
            if resp.connection_id != req.connection_id {
                return Err(FerryError::new(format!(
                    "handshake response for foreign connection {:#010x}",
                    resp.connection_id
                )));
            }
            log::info!("handshake complete: connection {:#010x}", req.connection_id);
            return Ok(());
        }
    }

    Err(FerryError::new(format!(
        "no handshake response after {} attempts",
        HANDSHAKE_RETRIES
    )))
}

fn wait_out(deadline: Instant) {
    let left = deadline.saturating_duration_since(Instant::now());
    if !left.is_zero() {
        std::thread::sleep(left);
    }
}
