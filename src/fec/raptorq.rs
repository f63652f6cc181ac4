use std::borrow::Cow;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver};

use crate::common::wire;
use crate::common::{FileMap, TransferParams};
use crate::tools::error::{FerryError, Result};

///
/// RFC 6330 encoder over a memory-mapped file.
///
/// One `SourceBlockEncoder` per block, built on a background worker so that
/// intermediate-symbol computation overlaps the source sweep. Source symbols
/// are copied straight out of the file map and never wait for the worker;
/// repair symbols block until their block has been precomputed.
///
pub struct ObjectEncoder {
    params: TransferParams,
    file: Arc<FileMap>,
    blocks: Vec<Option<raptorq::SourceBlockEncoder>>,
    pending: Option<Receiver<(u8, raptorq::SourceBlockEncoder)>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl ObjectEncoder {
    /// Size the encoder for `file` and the given symbol size.
    pub fn open(file: Arc<FileMap>, symbol_size: u16) -> Result<ObjectEncoder> {
        let params = TransferParams::for_transfer(file.padded_size(), symbol_size)?;
        let nb_blocks = params.nb_blocks();
        Ok(ObjectEncoder {
            params,
            file,
            blocks: (0..nb_blocks).map(|_| None).collect(),
            pending: None,
            worker: None,
        })
    }

    /// FEC parameters of the transfer.
    pub fn params(&self) -> &TransferParams {
        &self.params
    }

    /// Number of source blocks.
    pub fn blocks(&self) -> usize {
        self.params.nb_blocks()
    }

    /// Start computing intermediate symbols for every block on a background
    /// worker. Results are collected lazily by the repair-symbol accessors.
    pub fn precompute(&mut self) {
        debug_assert!(self.worker.is_none());
        let (tx, rx) = unbounded();
        let params = self.params.clone();
        let file = Arc::clone(&self.file);
        self.pending = Some(rx);
        self.worker = Some(std::thread::spawn(move || {
            let config = params.config().clone();
            for sbn in 0..params.nb_blocks() {
                let sbn = sbn as u8;
                let data = block_data(&file, &params, sbn);
                let encoder = raptorq::SourceBlockEncoder::new(sbn, &config, &data);
                if tx.send((sbn, encoder)).is_err() {
                    // encoder dropped, nobody wants the rest
                    return;
                }
                log::debug!("precomputed block {}", sbn);
            }
        }));
    }

    /// Copy the source symbol `esi` of block `sbn` into `buf`, zero-filling
    /// the padding past the end of the file.
    pub fn write_source_symbol(&self, sbn: u8, esi: u32, buf: &mut [u8]) {
        let symbol_size = self.params.symbol_size();
        debug_assert!((esi as usize) < self.params.nb_source_symbols(sbn));
        debug_assert_eq!(buf.len(), symbol_size);

        let data = self.file.as_slice();
        let start = self.params.block_offset(sbn) as usize + esi as usize * symbol_size;
        let end = std::cmp::min(start + symbol_size, data.len());
        if start < end {
            buf[..end - start].copy_from_slice(&data[start..end]);
            buf[end - start..].fill(0);
        } else {
            buf.fill(0);
        }
    }

    /// Fill `buf` with the repair symbol `esi` (`esi >= K`) of block `sbn`,
    /// waiting for the background precompute of that block if necessary.
    pub fn write_repair_symbol(&mut self, sbn: u8, esi: u32, buf: &mut [u8]) -> Result<()> {
        let k = self.params.nb_source_symbols(sbn) as u32;
        debug_assert!(esi >= k);
        self.wait_ready(sbn)?;

        let encoder = match self.blocks[sbn as usize].as_ref() {
            Some(encoder) => encoder,
            None => return Err(FerryError::new("repair symbol requested before precompute")),
        };
        let packets = encoder.repair_packets(esi - k, 1);
        let packet = packets
            .first()
            .ok_or_else(|| FerryError::new("codec produced no repair symbol"))?;
        buf.copy_from_slice(packet.data());
        Ok(())
    }

    fn drain_ready(&mut self) {
        if let Some(rx) = self.pending.as_ref() {
            while let Ok((sbn, encoder)) = rx.try_recv() {
                self.blocks[sbn as usize] = Some(encoder);
            }
        }
    }

    fn wait_ready(&mut self, sbn: u8) -> Result<()> {
        self.drain_ready();
        while self.blocks[sbn as usize].is_none() {
            let rx = self
                .pending
                .as_ref()
                .ok_or_else(|| FerryError::new("precompute was not started"))?;
            match rx.recv() {
                Ok((got, encoder)) => self.blocks[got as usize] = Some(encoder),
                Err(_) => return Err(FerryError::new("precompute worker died")),
            }
        }
        Ok(())
    }
}

impl Drop for ObjectEncoder {
    fn drop(&mut self) {
        // disconnect first so the worker stops early
        self.pending.take();
        if let Some(worker) = self.worker.take() {
            worker.join().ok();
        }
    }
}

/// Bytes of block `sbn`, padded with zeroes to a whole number of symbols.
fn block_data<'a>(file: &'a FileMap, params: &TransferParams, sbn: u8) -> Cow<'a, [u8]> {
    let start = params.block_offset(sbn) as usize;
    let len = params.block_size(sbn);
    let data = file.as_slice();
    if start + len <= data.len() {
        Cow::Borrowed(&data[start..start + len])
    } else {
        let mut padded = vec![0u8; len];
        if start < data.len() {
            padded[..data.len() - start].copy_from_slice(&data[start..]);
        }
        Cow::Owned(padded)
    }
}

///
/// RFC 6330 decoder: accumulates encoding symbols per block and reconstructs
/// each block into a caller-provided byte range.
///
/// Not thread-safe; the receiver serializes all access on its decoder task.
///
pub struct ObjectDecoder {
    params: TransferParams,
    blocks: Vec<BlockState>,
}

struct BlockState {
    packets: Vec<raptorq::EncodingPacket>,
    completed: bool,
}

impl ObjectDecoder {
    /// Return a decoder for the given transfer parameters.
    pub fn new(params: TransferParams) -> ObjectDecoder {
        let nb_blocks = params.nb_blocks();
        ObjectDecoder {
            params,
            blocks: (0..nb_blocks)
                .map(|_| BlockState {
                    packets: Vec::new(),
                    completed: false,
                })
                .collect(),
        }
    }

    /// Number of source blocks.
    pub fn blocks(&self) -> usize {
        self.params.nb_blocks()
    }

    /// Size of block `sbn` in bytes.
    pub fn block_size(&self, sbn: u8) -> usize {
        self.params.block_size(sbn)
    }

    /// Store one encoding symbol. Returns `false` for duplicates, symbols of
    /// completed blocks and mis-sized payloads, which leave the state intact.
    pub fn add_symbol(&mut self, payload: &[u8], id: u32) -> bool {
        let (sbn, esi) = wire::split_symbol_id(id);
        if sbn as usize >= self.blocks.len() || payload.len() != self.params.symbol_size() {
            return false;
        }
        let state = &mut self.blocks[sbn as usize];
        if state.completed {
            return false;
        }
        if state
            .packets
            .iter()
            .any(|p| p.payload_id().encoding_symbol_id() == esi)
        {
            return false;
        }
        state.packets.push(raptorq::EncodingPacket::new(
            raptorq::PayloadId::new(sbn, esi),
            payload.to_vec(),
        ));
        true
    }

    /// True when enough symbols have arrived to attempt decoding `sbn`.
    pub fn can_decode(&self, sbn: u8) -> bool {
        let state = &self.blocks[sbn as usize];
        !state.completed && state.packets.len() >= self.params.nb_source_symbols(sbn)
    }

    /// Try to reconstruct block `sbn` into `dst` (exactly the block size).
    /// Succeeds once enough linearly-independent symbols have been collected;
    /// the stored symbols are released on success.
    pub fn decode(&mut self, dst: &mut [u8], sbn: u8) -> bool {
        debug_assert_eq!(dst.len(), self.params.block_size(sbn));
        let state = &mut self.blocks[sbn as usize];
        if state.completed {
            return false;
        }

        let mut decoder =
            raptorq::SourceBlockDecoder::new(sbn, self.params.config(), dst.len() as u64);
        match decoder.decode(state.packets.iter().cloned()) {
            Some(data) => {
                dst.copy_from_slice(&data);
                state.completed = true;
                state.packets = Vec::new();
                true
            }
            None => {
                log::debug!(
                    "block {} not decodable yet with {} symbols",
                    sbn,
                    state.packets.len()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use crate::common::FileMap;

    use super::{ObjectDecoder, ObjectEncoder};

    const SYMBOL_SIZE: u16 = 16;

    fn test_encoder(content: &[u8]) -> (tempfile::TempDir, ObjectEncoder) {
        crate::tests::init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.bin");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        drop(file);

        let map = Arc::new(FileMap::open(&path).unwrap());
        let encoder = ObjectEncoder::open(map, SYMBOL_SIZE).unwrap();
        (dir, encoder)
    }

    fn test_content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    pub fn test_source_symbols_cover_content() {
        let content = test_content(5000);
        let (_dir, encoder) = test_encoder(&content);
        assert!(encoder.blocks() > 1);

        let mut rebuilt = Vec::new();
        let mut symbol = vec![0u8; SYMBOL_SIZE as usize];
        for sbn in 0..encoder.blocks() {
            for esi in 0..encoder.params().nb_source_symbols(sbn as u8) {
                encoder.write_source_symbol(sbn as u8, esi as u32, &mut symbol);
                rebuilt.extend_from_slice(&symbol);
            }
        }
        assert_eq!(&rebuilt[..content.len()], &content[..]);
        assert!(rebuilt[content.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    pub fn test_decode_from_source_symbols() {
        let content = test_content(4096);
        let (_dir, encoder) = test_encoder(&content);
        let params = encoder.params().clone();
        let mut decoder = ObjectDecoder::new(params.clone());

        let mut symbol = vec![0u8; SYMBOL_SIZE as usize];
        let mut output = vec![0u8; params.mapped_size() as usize];
        for sbn in 0..encoder.blocks() {
            let sbn = sbn as u8;
            let k = params.nb_source_symbols(sbn);
            for esi in 0..k {
                encoder.write_source_symbol(sbn, esi as u32, &mut symbol);
                assert!(decoder.add_symbol(&symbol, crate::common::wire::symbol_id(sbn, esi as u32)));
            }
            assert!(decoder.can_decode(sbn));
            let offset = params.block_offset(sbn) as usize;
            let size = params.block_size(sbn);
            assert!(decoder.decode(&mut output[offset..offset + size], sbn));
        }
        assert_eq!(&output[..content.len()], &content[..]);
    }

    #[test]
    pub fn test_decode_from_repair_symbols() {
        let content = test_content(2048);
        let (_dir, mut encoder) = test_encoder(&content);
        encoder.precompute();
        let params = encoder.params().clone();
        let mut decoder = ObjectDecoder::new(params.clone());

        // lose every source symbol of block 0, feed repair symbols instead
        let sbn = 0u8;
        let k = params.nb_source_symbols(sbn) as u32;
        let size = params.block_size(sbn);
        let mut output = vec![0u8; size];
        let mut symbol = vec![0u8; SYMBOL_SIZE as usize];
        let mut decoded = false;
        for esi in k..k + 12 {
            encoder.write_repair_symbol(sbn, esi, &mut symbol).unwrap();
            assert!(decoder.add_symbol(&symbol, crate::common::wire::symbol_id(sbn, esi)));
            if decoder.can_decode(sbn) && decoder.decode(&mut output, sbn) {
                decoded = true;
                break;
            }
        }
        assert!(decoded, "block did not decode from repair symbols");
        assert_eq!(&output[..], &content[..size]);
    }

    #[test]
    pub fn test_add_symbol_rejects_duplicates() {
        let content = test_content(1024);
        let (_dir, encoder) = test_encoder(&content);
        let mut decoder = ObjectDecoder::new(encoder.params().clone());

        let mut symbol = vec![0u8; SYMBOL_SIZE as usize];
        encoder.write_source_symbol(0, 0, &mut symbol);
        let id = crate::common::wire::symbol_id(0, 0);
        assert!(decoder.add_symbol(&symbol, id));
        assert!(!decoder.add_symbol(&symbol, id));
        // wrong payload size
        assert!(!decoder.add_symbol(&symbol[..8], crate::common::wire::symbol_id(0, 1)));
        // out-of-range block
        assert!(!decoder.add_symbol(&symbol, crate::common::wire::symbol_id(200, 0)));
    }

    #[test]
    pub fn test_repair_waits_for_precompute() {
        let content = test_content(600);
        let (_dir, mut encoder) = test_encoder(&content);
        let mut symbol = vec![0u8; SYMBOL_SIZE as usize];
        let k = encoder.params().nb_source_symbols(0) as u32;
        // without precompute there is nothing to wait for
        assert!(encoder.write_repair_symbol(0, k, &mut symbol).is_err());
        encoder.precompute();
        assert!(encoder.write_repair_symbol(0, k, &mut symbol).is_ok());
        assert!(encoder.write_repair_symbol(0, k + 1, &mut symbol).is_ok());
    }
}
