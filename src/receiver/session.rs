use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::common::wire::{self, Ack, DataPacket, HandshakeReq, HandshakeResp};
use crate::common::{
    padded_size, Bitmask256, FileMapMut, TransferParams, DEFAULT_PORT, HEARTBEAT, TEARDOWN_WINDOW,
};
use crate::fec::ObjectDecoder;
use crate::net::{DatagramSock, SockError};
use crate::receiver::{feedback, queue};
use crate::tools::error::{FerryError, Result};
use crate::tools::progress::Progress;

///
/// Configuration of the receiving endpoint.
///
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on; when taken, an OS-chosen port is used instead.
    pub port: u16,
    /// Directory the received file is written into.
    pub output_dir: PathBuf,
    /// Log per-symbol events instead of drawing a progress bar.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            output_dir: PathBuf::from("."),
            debug: false,
        }
    }
}

///
/// One receiver-side connection.
///
/// [`ReceiverSession::bind`] claims the listen socket;
/// [`ReceiverSession::run`] accepts a single connection and reconstructs the
/// announced file, reading the socket on a dedicated thread while the
/// calling thread owns the decoder and the output mapping.
///
pub struct ReceiverSession {
    cfg: Config,
    sock: Arc<DatagramSock>,
}

impl ReceiverSession {
    /// Bind the listen socket, falling back to an ephemeral port when the
    /// configured one is taken.
    pub fn bind(cfg: Config) -> Result<ReceiverSession> {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        let sock = match DatagramSock::bind(SocketAddr::new(any, cfg.port)) {
            Ok(sock) => sock,
            Err(err) if err.0.kind() == std::io::ErrorKind::AddrInUse && cfg.port != 0 => {
                log::warn!("port {} in use, falling back to an ephemeral port", cfg.port);
                DatagramSock::bind(SocketAddr::new(any, 0))?
            }
            Err(err) => return Err(err),
        };
        Ok(ReceiverSession {
            cfg,
            sock: Arc::new(sock),
        })
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.sock.local_addr()
    }

    /// Accept one connection and receive the file; returns the output path.
    pub fn run(self) -> Result<PathBuf> {
        let (req, peer) = self.accept()?;
        self.sock.connect(peer)?;

        let params = TransferParams::from_oti(req.oti_common, req.oti_scheme)?;
        if req.file_size == 0 || padded_size(req.file_size) != params.transfer_length() {
            return Err(FerryError::new(format!(
                "announced file size {} does not match the FEC transfer length {}",
                req.file_size,
                params.transfer_length()
            )));
        }
        let file_name = sanitize_file_name(&req.file_name)?;
        let path = self.cfg.output_dir.join(file_name);

        self.respond(req.connection_id)?;

        let mut out = FileMapMut::create(&path, params.mapped_size(), req.file_size)?;
        let decoded = Arc::new(Bitmask256::new());
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = queue::symbol_queue();

        self.sock.set_nonblocking(true)?;
        let reader = {
            let sock = Arc::clone(&self.sock);
            let decoded = Arc::clone(&decoded);
            let stop = Arc::clone(&stop);
            let symbol_size = params.symbol_size();
            std::thread::Builder::new()
                .name("rqferry-reader".to_owned())
                .spawn(move || reader_task(&sock, tx, &decoded, &stop, symbol_size))?
        };

        let mut task = DecoderTask {
            sock: &self.sock,
            rx: &rx,
            decoded: &decoded,
            out: &mut out,
            decoder: ObjectDecoder::new(params.clone()),
            params: &params,
            connection_id: req.connection_id,
            progress: Progress::new(params.nb_blocks() as u64, !self.cfg.debug),
            num_recv: vec![0; params.nb_blocks()],
            max_esi_recv: vec![0; params.nb_blocks()],
            repair_interval: wire::INITIAL_REPAIR_INTERVAL,
        };
        let result = task.run();

        stop.store(true, Ordering::Relaxed);
        drop(rx);
        reader
            .join()
            .map_err(|_| FerryError::new("reader task panicked"))?;

        let repair_interval = result?;
        out.finalize()?;
        log::info!("all {} blocks decoded, wrote {:?}", params.nb_blocks(), path);
        self.linger(req.connection_id, repair_interval)?;
        Ok(path)
    }

    /// Wait for the first inbound datagram; it must be a valid handshake
    /// request, the receiver-side handshake is one-shot.
    fn accept(&self) -> Result<(HandshakeReq, SocketAddr)> {
        log::info!("listening on {:?}", self.local_addr()?);
        let mut buf = [0u8; 2048];
        let (n, peer) = loop {
            match self.sock.recv_from(&mut buf) {
                Ok(received) => break received,
                Err(SockError::WouldBlock) => {
                    self.sock.poll(true, false, None)?;
                }
                Err(SockError::Closed) => {
                    return Err(FerryError::new("socket closed while listening"))
                }
                Err(SockError::Fatal(err)) => return Err(err.into()),
            }
        };
        let req = HandshakeReq::decode(&buf[..n])?;
        log::info!(
            "connection {:#010x} from {}: {:?}, {} bytes",
            req.connection_id,
            peer,
            req.file_name,
            req.file_size
        );
        Ok((req, peer))
    }

    fn respond(&self, connection_id: u32) -> Result<()> {
        let resp = HandshakeResp { connection_id }.encode();
        match self.sock.send(&resp) {
            Ok(_) => Ok(()),
            Err(SockError::WouldBlock) => Err(FerryError::new("socket not writable for handshake")),
            Err(SockError::Closed) => Err(FerryError::new("peer vanished during handshake")),
            Err(SockError::Fatal(err)) => Err(err.into()),
        }
    }

    /// Keep acknowledging a full bitmap until the sender has been silent for
    /// the tear-down window, so a lost final acknowledgement is repaired.
    fn linger(&self, connection_id: u32, repair_interval: u32) -> Result<()> {
        log::info!("transfer complete, lingering until the sender goes silent");
        let full = Bitmask256::new();
        full.set_first_n(256);
        let encoded = Ack {
            connection_id,
            bitmap: full.snapshot(),
            repair_interval,
        }
        .encode();

        let mut buf = [0u8; 2048];
        let mut last_heard = Instant::now();
        let mut next_ack = Instant::now();
        while last_heard.elapsed() < TEARDOWN_WINDOW {
            let now = Instant::now();
            if now >= next_ack {
                match self.sock.send(&encoded) {
                    Ok(_) | Err(SockError::WouldBlock) => {}
                    Err(SockError::Closed) => break,
                    Err(SockError::Fatal(err)) => return Err(err.into()),
                }
                next_ack = now + HEARTBEAT;
            }
            let wait = next_ack
                .saturating_duration_since(Instant::now())
                .min(TEARDOWN_WINDOW.saturating_sub(last_heard.elapsed()));
            match self.sock.poll(true, false, Some(wait)) {
                Ok(ready) if ready.readable => {}
                Ok(_) => continue,
                Err(_) => break,
            }
            match self.sock.recv(&mut buf) {
                Ok(_) => last_heard = Instant::now(),
                Err(SockError::WouldBlock) => {}
                Err(_) => break,
            }
        }
        Ok(())
    }
}

/// Network reader: drops everything that is not a well-sized data packet for
/// a block that is still missing, and pushes the rest onto the symbol queue.
/// Never touches the output mapping.
fn reader_task(
    sock: &DatagramSock,
    tx: Sender<DataPacket>,
    decoded: &Bitmask256,
    stop: &AtomicBool,
    symbol_size: usize,
) {
    // one spare byte so an oversized datagram is detectable after truncation
    let mut buf = vec![0u8; wire::DATA_PACKET_OVERHEAD + symbol_size + 1];
    while !stop.load(Ordering::Relaxed) {
        match sock.poll(true, false, Some(HEARTBEAT)) {
            Ok(ready) if ready.readable => {}
            Ok(_) => continue,
            Err(_) => break,
        }
        let n = match sock.recv(&mut buf) {
            Ok(n) => n,
            Err(SockError::WouldBlock) => continue,
            Err(SockError::Closed) => {
                log::info!("sender closed the connection");
                break;
            }
            Err(SockError::Fatal(err)) => {
                log::error!("socket failure: {:?}", err);
                break;
            }
        };
        if wire::opcode(&buf[..n]) != Some(wire::DATA_PACKET) {
            log::debug!("dropping datagram with opcode {:?}", wire::opcode(&buf[..n]));
            continue;
        }
        let pkt = match DataPacket::decode(&buf[..n]) {
            Ok(pkt) => pkt,
            Err(_) => continue,
        };
        if pkt.payload.len() != symbol_size {
            log::warn!("dropping mis-sized symbol of {} bytes", pkt.payload.len());
            continue;
        }
        if decoded.test(pkt.sbn()) {
            log::debug!("dropping symbol of decoded block {}", pkt.sbn());
            continue;
        }
        let mut pkt = pkt;
        loop {
            match tx.send_timeout(pkt, HEARTBEAT) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(back)) => {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    pkt = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }
}

/// Decoder task: owns the codec state and the output mapping, sends the
/// heartbeat acknowledgements and recomputes the repair interval whenever a
/// block completes.
struct DecoderTask<'a> {
    sock: &'a DatagramSock,
    rx: &'a Receiver<DataPacket>,
    decoded: &'a Bitmask256,
    out: &'a mut FileMapMut,
    decoder: ObjectDecoder,
    params: &'a TransferParams,
    connection_id: u32,
    progress: Progress,
    num_recv: Vec<u64>,
    max_esi_recv: Vec<u32>,
    repair_interval: u32,
}

impl DecoderTask<'_> {
    /// Run until every block is decoded; returns the final repair interval.
    fn run(&mut self) -> Result<u32> {
        let nb_blocks = self.decoder.blocks();
        let mut next_ack = Instant::now() + HEARTBEAT;

        loop {
            let now = Instant::now();
            if now >= next_ack {
                self.send_ack()?;
                next_ack = now + HEARTBEAT;
            }
            if self.decoded.count() as usize == nb_blocks {
                return Ok(self.repair_interval);
            }

            let pkt = match self
                .rx
                .recv_timeout(next_ack.saturating_duration_since(Instant::now()))
            {
                Ok(pkt) => pkt,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return if self.decoded.count() as usize == nb_blocks {
                        Ok(self.repair_interval)
                    } else {
                        Err(FerryError::new("connection lost before every block decoded"))
                    };
                }
            };

            let (sbn, esi) = (pkt.sbn(), pkt.esi());
            if sbn as usize >= nb_blocks {
                log::warn!("dropping symbol of out-of-range block {}", sbn);
                continue;
            }
            self.num_recv[sbn as usize] += 1;
            if esi > self.max_esi_recv[sbn as usize] {
                self.max_esi_recv[sbn as usize] = esi;
            }
            if !self.decoder.add_symbol(&pkt.payload, pkt.symbol_id) {
                log::debug!("useless symbol sbn={} esi={}", sbn, esi);
                continue;
            }
            if self.decoded.test(sbn) || !self.decoder.can_decode(sbn) {
                continue;
            }

            let offset = self.params.block_offset(sbn) as usize;
            let size = self.decoder.block_size(sbn);
            if self.decoder.decode(self.out.block_mut(offset, size), sbn) {
                self.decoded.set(sbn);
                self.repair_interval = feedback::repair_interval(
                    self.num_recv[sbn as usize],
                    self.max_esi_recv[sbn as usize],
                );
                log::info!(
                    "block {} decoded ({}/{}), repair interval {}",
                    sbn,
                    self.decoded.count(),
                    nb_blocks,
                    self.repair_interval
                );
                self.progress.update(u64::from(self.decoded.count()));
                self.send_ack()?;
                next_ack = Instant::now() + HEARTBEAT;
            }
        }
    }

    fn send_ack(&self) -> Result<()> {
        let ack = Ack {
            connection_id: self.connection_id,
            bitmap: self.decoded.snapshot(),
            repair_interval: self.repair_interval,
        };
        match self.sock.send(&ack.encode()) {
            Ok(_) => Ok(()),
            Err(SockError::WouldBlock) => {
                log::debug!("socket not writable, heartbeat skipped");
                Ok(())
            }
            Err(SockError::Closed) => {
                // the reader observes the closure and ends the stream
                log::debug!("peer gone while acknowledging");
                Ok(())
            }
            Err(SockError::Fatal(err)) => Err(err.into()),
        }
    }
}

fn sanitize_file_name(name: &str) -> Result<&str> {
    if name.is_empty()
        || name.len() > wire::FILE_NAME_LEN
        || name.contains(['/', '\\'])
        || name == "."
        || name == ".."
    {
        return Err(FerryError::new(format!("refusing unsafe file name {:?}", name)));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::sanitize_file_name;

    #[test]
    pub fn test_sanitize_file_name() {
        crate::tests::init();
        assert!(sanitize_file_name("payload.bin").is_ok());
        assert!(sanitize_file_name("a").is_ok());
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name(".").is_err());
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("../escape").is_err());
        assert!(sanitize_file_name("dir/inner").is_err());
        assert!(sanitize_file_name("dir\\inner").is_err());
    }
}
