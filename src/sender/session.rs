use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngExt;

use crate::common::wire;
use crate::common::{
    Bitmask256, FileMap, DEFAULT_PORT, DEFAULT_SYMBOL_SIZE, HEARTBEAT, TEARDOWN_WINDOW,
};
use crate::fec::ObjectEncoder;
use crate::net::{DatagramSock, SockError};
use crate::sender::handshake;
use crate::tools::error::{FerryError, Result};
use crate::tools::progress::Progress;

///
/// Configuration of the sending endpoint.
///
#[derive(Debug, Clone)]
pub struct Config {
    /// Receiver host name or address.
    pub host: String,
    /// Receiver port.
    pub port: u16,
    /// File to transfer.
    pub path: PathBuf,
    /// Symbol size in bytes, a multiple of the symbol alignment.
    pub symbol_size: u16,
    /// Delay inserted before each send, the placeholder for a real
    /// congestion controller.
    pub pacing: Duration,
    /// Log every symbol instead of drawing a progress bar.
    pub debug: bool,
}

impl Config {
    /// Return a configuration with the default port, symbol size and pacing.
    pub fn new(host: &str, path: &Path) -> Self {
        Config {
            host: host.to_owned(),
            port: DEFAULT_PORT,
            path: path.to_owned(),
            symbol_size: DEFAULT_SYMBOL_SIZE,
            pacing: Duration::from_micros(350),
            debug: false,
        }
    }
}

///
/// Statistics of a completed transfer.
///
#[derive(Debug, Clone, Copy)]
pub struct TransferReport {
    /// Number of source blocks of the transfer.
    pub nb_blocks: usize,
    /// Source symbols sent.
    pub source_symbols_sent: u64,
    /// Repair symbols sent.
    pub repair_symbols_sent: u64,
    /// Repair interval in effect when the transfer completed.
    pub repair_interval: u32,
}

///
/// One sender-side connection.
///
/// [`SenderSession::connect`] opens the file, sizes the encoder, starts the
/// precompute worker and runs the handshake; [`SenderSession::run`] then
/// drives the symbol schedule until the aggregated acknowledgement covers
/// every block.
///
pub struct SenderSession {
    cfg: Config,
    sock: DatagramSock,
    encoder: ObjectEncoder,
    connection_id: u32,
    acked: Bitmask256,
    /// Next source symbol to send, per block.
    source_esi: Vec<u32>,
    /// Next repair symbol to send, per block. Starts at `K(sbn)`.
    repair_esi: Vec<u32>,
    source_sent: u64,
    repair_sent: u64,
    repair_interval: u32,
    /// One reused buffer holding the packet header and the symbol bytes.
    scratch: Vec<u8>,
    progress: Progress,
}

impl SenderSession {
    /// Establish a connection for the file named in `cfg`.
    pub fn connect(cfg: Config) -> Result<SenderSession> {
        let file = Arc::new(FileMap::open(&cfg.path)?);
        let mut encoder = ObjectEncoder::open(Arc::clone(&file), cfg.symbol_size)?;
        encoder.precompute();

        let file_name = cfg
            .path
            .file_name()
            .ok_or_else(|| FerryError::new(format!("{:?} has no file name", cfg.path)))?
            .to_string_lossy()
            .into_owned();

        let sock = DatagramSock::connect_to((cfg.host.as_str(), cfg.port))?;
        let connection_id = rand::rng().random::<u32>();
        let req = wire::HandshakeReq {
            connection_id,
            file_name,
            file_size: file.file_size(),
            oti_common: encoder.params().oti_common(),
            oti_scheme: encoder.params().oti_scheme(),
        };
        handshake::initiate(&sock, &req)?;
        sock.set_nonblocking(true)?;

        let nb_blocks = encoder.blocks();
        let repair_esi = (0..nb_blocks)
            .map(|sbn| encoder.params().nb_source_symbols(sbn as u8) as u32)
            .collect();
        let scratch = vec![0u8; wire::DATA_PACKET_OVERHEAD + encoder.params().symbol_size()];
        let progress = Progress::new(nb_blocks as u64, !cfg.debug);

        Ok(SenderSession {
            cfg,
            sock,
            encoder,
            connection_id,
            acked: Bitmask256::new(),
            source_esi: vec![0; nb_blocks],
            repair_esi,
            source_sent: 0,
            repair_sent: 0,
            repair_interval: wire::INITIAL_REPAIR_INTERVAL,
            scratch,
            progress,
        })
    }

    /// Drive the transfer until every block is acknowledged.
    pub fn run(mut self) -> Result<TransferReport> {
        let nb_blocks = self.encoder.blocks();
        log::info!("transmitting {} blocks", nb_blocks);

        // Phase A: sweep the source symbols of every block in order. After
        // every repair_interval-th source symbol, emit one repair symbol for
        // each earlier block the receiver has not acknowledged yet.
        'sweep: for curr_block in 0..nb_blocks {
            let sbn = curr_block as u8;
            let nb_source = self.encoder.params().nb_source_symbols(sbn) as u32;
            while self.source_esi[curr_block] < nb_source {
                if self.drain_acks()? {
                    break 'sweep;
                }
                if self.acked.test(sbn) {
                    continue 'sweep;
                }
                let esi = self.source_esi[curr_block];
                self.send_source_symbol(sbn, esi)?;
                self.source_esi[curr_block] = esi + 1;
                self.source_sent += 1;
                if self.repair_due() {
                    for prev_block in 0..curr_block {
                        if !self.acked.test(prev_block as u8) {
                            self.send_repair_symbol(prev_block as u8)?;
                        }
                    }
                }
            }
        }

        // Phase B: cycle repair symbols over whatever is still missing.
        while !self.complete() {
            for sbn in 0..nb_blocks {
                if self.drain_acks()? {
                    break;
                }
                if self.acked.test(sbn as u8) {
                    continue;
                }
                self.send_repair_symbol(sbn as u8)?;
            }
        }

        self.teardown();
        log::info!(
            "transfer acknowledged: {} source and {} repair symbols sent",
            self.source_sent,
            self.repair_sent
        );
        Ok(TransferReport {
            nb_blocks,
            source_symbols_sent: self.source_sent,
            repair_symbols_sent: self.repair_sent,
            repair_interval: self.repair_interval,
        })
    }

    fn complete(&self) -> bool {
        self.acked.count() as usize >= self.encoder.blocks()
    }

    fn repair_due(&self) -> bool {
        self.repair_interval != wire::REPAIR_SUSPEND
            && self.repair_interval != 0
            && self.source_sent % u64::from(self.repair_interval) == 0
    }

    fn send_source_symbol(&mut self, sbn: u8, esi: u32) -> Result<()> {
        wire::encode_data_header(&mut self.scratch, wire::symbol_id(sbn, esi));
        self.encoder
            .write_source_symbol(sbn, esi, &mut self.scratch[wire::DATA_PACKET_OVERHEAD..]);
        log::debug!("send source symbol sbn={} esi={}", sbn, esi);
        self.send_scratch()
    }

    fn send_repair_symbol(&mut self, sbn: u8) -> Result<()> {
        let esi = self.repair_esi[sbn as usize];
        self.repair_esi[sbn as usize] = esi + 1;
        wire::encode_data_header(&mut self.scratch, wire::symbol_id(sbn, esi));
        self.encoder
            .write_repair_symbol(sbn, esi, &mut self.scratch[wire::DATA_PACKET_OVERHEAD..])?;
        log::debug!("send repair symbol sbn={} esi={}", sbn, esi);
        self.repair_sent += 1;
        self.send_scratch()
    }

    fn send_scratch(&mut self) -> Result<()> {
        loop {
            self.pace();
            match self.sock.send(&self.scratch) {
                Ok(_) => return Ok(()),
                Err(SockError::WouldBlock) => {
                    // multiplex the blocked send with acknowledgement reads
                    let ready = self.sock.poll(true, true, Some(HEARTBEAT))?;
                    if ready.readable && self.drain_acks()? {
                        return Ok(());
                    }
                    if !ready.writable {
                        continue;
                    }
                }
                Err(SockError::Closed) => {
                    self.peer_closed()?;
                    return Ok(());
                }
                Err(SockError::Fatal(err)) => return Err(err.into()),
            }
        }
    }

    /// The congestion-control hook: one call before each send.
    fn pace(&self) {
        if !self.cfg.pacing.is_zero() {
            std::thread::sleep(self.cfg.pacing);
        }
    }

    /// Merge every acknowledgement currently queued on the socket.
    /// Returns true once all blocks are acknowledged.
    fn drain_acks(&mut self) -> Result<bool> {
        let mut buf = [0u8; 128];
        loop {
            match self.sock.recv(&mut buf) {
                Ok(n) => {
                    if wire::opcode(&buf[..n]) != Some(wire::ACK) {
                        log::warn!(
                            "dropping datagram with unexpected opcode {:?}",
                            wire::opcode(&buf[..n])
                        );
                        continue;
                    }
                    let ack = match wire::Ack::decode(&buf[..n]) {
                        Ok(ack) => ack,
                        Err(_) => continue,
                    };
                    if ack.connection_id != self.connection_id {
                        log::warn!(
                            "dropping acknowledgement of foreign connection {:#010x}",
                            ack.connection_id
                        );
                        continue;
                    }
                    self.acked.bitwise_or(&Bitmask256::from_words(ack.bitmap));
                    self.repair_interval = ack.repair_interval;
                    log::debug!(
                        "ack: {} blocks, repair interval {}",
                        self.acked.count(),
                        self.repair_interval
                    );
                    self.progress.update(u64::from(self.acked.count()));
                }
                Err(SockError::WouldBlock) => break,
                Err(SockError::Closed) => {
                    self.peer_closed()?;
                    return Ok(true);
                }
                Err(SockError::Fatal(err)) => return Err(err.into()),
            }
        }
        Ok(self.complete())
    }

    /// A closed peer is a clean end only when nothing is missing anymore.
    fn peer_closed(&self) -> Result<()> {
        if self.complete() {
            Ok(())
        } else {
            Err(FerryError::new(
                "receiver closed the connection before acknowledging every block",
            ))
        }
    }

    /// Drain the socket for the tear-down window so late heartbeats from the
    /// receiver do not bounce back as errors.
    fn teardown(&mut self) {
        let deadline = Instant::now() + TEARDOWN_WINDOW;
        let mut buf = [0u8; 2048];
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return;
            }
            match self.sock.poll(true, false, Some(left)) {
                Ok(ready) if ready.readable => {}
                _ => return,
            }
            match self.sock.recv(&mut buf) {
                Ok(_) | Err(SockError::WouldBlock) => continue,
                Err(_) => return,
            }
        }
    }
}
