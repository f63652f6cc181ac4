use crate::common::partition::{self, BlockLayout};
use crate::tools::error::{FerryError, Result};

/// Symbol alignment (Al) required by the codec.
/// <https://www.rfc-editor.org/rfc/rfc6330.html#section-3.3.3>
pub const SYMBOL_ALIGNMENT: u16 = 4;

/// The maximum number of source blocks; block numbers must fit the 8-bit SBN.
pub const MAX_BLOCKS: u64 = 256;

/// Symbol size that keeps a data packet inside a 1400-byte datagram,
/// rounded down to the symbol alignment.
pub const DEFAULT_SYMBOL_SIZE: u16 =
    (1400 - crate::common::wire::DATA_PACKET_OVERHEAD as u16) & !(SYMBOL_ALIGNMENT - 1);

/// Transfer lengths are carried in the 40-bit F field of the Common OTI.
const MAX_TRANSFER_LENGTH: u64 = (1 << 40) - 1;

/// Block sizes tried by the encoder sizing policy, in symbols per block.
const SIZING_CANDIDATES: [u64; 5] = [64, 128, 256, 512, 1024];

///
/// FEC Object Transmission Information of one transfer, and the block layout
/// both endpoints derive from it.
///
/// The Common OTI packs `F(40) | reserved(8) | T(16)` and the Scheme-Specific
/// OTI packs `Z(8) | N(16) | Al(8)`, as laid out in RFC 6330 §3.3.2/§3.3.3.
/// `N` is always 1 (no sub-blocking) and `Z = 0` encodes 256 blocks.
///
#[derive(Debug, Clone)]
pub struct TransferParams {
    config: raptorq::ObjectTransmissionInformation,
    transfer_length: u64,
    symbol_size: u16,
    layout: BlockLayout,
}

impl TransferParams {
    /// Size the encoder for a transfer of `padded_size` octets.
    ///
    /// Tries block sizes of 64, 128, ... 1024 symbols and accepts the first
    /// one the codec can represent, i.e. the first yielding at most
    /// [`MAX_BLOCKS`] source blocks. Fails when even 1024-symbol blocks are
    /// not enough.
    pub fn for_transfer(padded_size: u64, symbol_size: u16) -> Result<Self> {
        if symbol_size == 0 || symbol_size % SYMBOL_ALIGNMENT != 0 {
            return Err(FerryError::new(format!(
                "symbol size {} is not a positive multiple of {}",
                symbol_size, SYMBOL_ALIGNMENT
            )));
        }
        if padded_size > MAX_TRANSFER_LENGTH {
            return Err(FerryError::new(format!(
                "transfer of {} bytes exceeds the 40-bit OTI transfer length",
                padded_size
            )));
        }

        for nb_symbols in SIZING_CANDIDATES {
            let layout =
                match partition::block_partitioning(nb_symbols, padded_size, u64::from(symbol_size))
                {
                    Some(layout) => layout,
                    None => break,
                };
            if layout.nb_blocks <= MAX_BLOCKS {
                log::info!(
                    "sized encoder: {} blocks of at most {} symbols ({} bytes each)",
                    layout.nb_blocks,
                    layout.a_large,
                    symbol_size
                );
                return Ok(Self::assemble(padded_size, symbol_size, layout));
            }
            log::debug!(
                "{}-symbol blocks give {} blocks, above the {} limit",
                nb_symbols,
                layout.nb_blocks,
                MAX_BLOCKS
            );
        }

        Err(FerryError::new(format!(
            "cannot split {} bytes into at most {} blocks of at most {} symbols",
            padded_size,
            MAX_BLOCKS,
            SIZING_CANDIDATES[SIZING_CANDIDATES.len() - 1]
        )))
    }

    /// Rebuild the parameters from the OTI words of a handshake request.
    pub fn from_oti(common: u64, scheme: u32) -> Result<Self> {
        let transfer_length = common >> 24;
        let symbol_size = (common & 0xFFFF) as u16;
        let z = (scheme >> 24) & 0xFF;
        let n = (scheme >> 8) & 0xFFFF;
        let al = (scheme & 0xFF) as u16;

        if al != SYMBOL_ALIGNMENT {
            return Err(FerryError::new(format!("unsupported symbol alignment {}", al)));
        }
        if n != 1 {
            return Err(FerryError::new(format!("unsupported sub-block count {}", n)));
        }
        if symbol_size == 0 || symbol_size % SYMBOL_ALIGNMENT != 0 || transfer_length == 0 {
            return Err(FerryError::new("malformed Common OTI"));
        }

        let nb_blocks = if z == 0 { MAX_BLOCKS } else { u64::from(z) };
        let total = num_integer::div_ceil(transfer_length, u64::from(symbol_size));
        if total < nb_blocks {
            return Err(FerryError::new(format!(
                "{} blocks announced for {} symbols",
                nb_blocks, total
            )));
        }

        let layout = partition::layout_for_blocks(total, nb_blocks);
        Ok(Self::assemble(transfer_length, symbol_size, layout))
    }

    fn assemble(transfer_length: u64, symbol_size: u16, layout: BlockLayout) -> Self {
        // The per-block codec entry points never read Z back out of the
        // config, so encoding 256 as 0 here is harmless.
        let config = raptorq::ObjectTransmissionInformation::new(
            transfer_length,
            symbol_size,
            (layout.nb_blocks % MAX_BLOCKS) as u8,
            1,
            SYMBOL_ALIGNMENT as u8,
        );
        TransferParams {
            config,
            transfer_length,
            symbol_size,
            layout,
        }
    }

    /// Common OTI word announced in the handshake.
    pub fn oti_common(&self) -> u64 {
        (self.transfer_length << 24) | u64::from(self.symbol_size)
    }

    /// Scheme-Specific OTI word announced in the handshake.
    pub fn oti_scheme(&self) -> u32 {
        (((self.layout.nb_blocks % MAX_BLOCKS) as u32) << 24)
            | (1u32 << 8)
            | u32::from(SYMBOL_ALIGNMENT)
    }

    /// Codec configuration shared by every block of the transfer.
    pub fn config(&self) -> &raptorq::ObjectTransmissionInformation {
        &self.config
    }

    /// Number of source blocks.
    pub fn nb_blocks(&self) -> usize {
        self.layout.nb_blocks as usize
    }

    /// Number of source symbols of block `sbn`.
    pub fn nb_source_symbols(&self, sbn: u8) -> usize {
        self.layout.nb_symbols(sbn) as usize
    }

    /// Size of block `sbn` in bytes, a whole number of symbols.
    pub fn block_size(&self, sbn: u8) -> usize {
        self.nb_source_symbols(sbn) * usize::from(self.symbol_size)
    }

    /// Byte offset of block `sbn` within the (padded) transfer.
    pub fn block_offset(&self, sbn: u8) -> u64 {
        self.layout.first_symbol(sbn) * u64::from(self.symbol_size)
    }

    /// Bytes the receiver maps: the sum of all block sizes.
    pub fn mapped_size(&self) -> u64 {
        self.layout.total_symbols() * u64::from(self.symbol_size)
    }

    /// Symbol size in bytes.
    pub fn symbol_size(&self) -> usize {
        usize::from(self.symbol_size)
    }

    /// Padded transfer length announced in the Common OTI.
    pub fn transfer_length(&self) -> u64 {
        self.transfer_length
    }
}

#[cfg(test)]
mod tests {
    use super::{TransferParams, DEFAULT_SYMBOL_SIZE, MAX_BLOCKS};

    #[test]
    pub fn test_default_symbol_size() {
        assert_eq!(DEFAULT_SYMBOL_SIZE, 1392);
        assert_eq!(DEFAULT_SYMBOL_SIZE % 4, 0);
    }

    #[test]
    pub fn test_sizing_picks_smallest_candidate() {
        crate::tests::init();
        // 10 MB at 1400-byte symbols: 7143 symbols, 64-symbol blocks are enough
        let params = TransferParams::for_transfer(10_000_000, 1400).unwrap();
        assert_eq!(params.nb_blocks(), 112);
        assert!(params.nb_source_symbols(0) <= 64);

        // 40000 symbols: 64- and 128-symbol blocks exceed 256 blocks, 256 fits
        let params = TransferParams::for_transfer(40_000 * 1400, 1400).unwrap();
        assert!(params.nb_source_symbols(0) <= 256);
        assert!(params.nb_blocks() <= MAX_BLOCKS as usize);
        assert_eq!(params.nb_blocks(), 157);
    }

    #[test]
    pub fn test_sizing_fails_loudly() {
        crate::tests::init();
        // more than 256 * 1024 symbols cannot be represented
        let too_big = 1400u64 * 1024 * 256 + 1400;
        assert!(TransferParams::for_transfer(too_big, 1400).is_err());
        // zero-length transfers have no blocks
        assert!(TransferParams::for_transfer(0, 1400).is_err());
        // misaligned symbol size
        assert!(TransferParams::for_transfer(1000, 1399).is_err());
    }

    #[test]
    pub fn test_oti_roundtrip() {
        crate::tests::init();
        for size in [4u64, 1392, 5_000_000, 100_000_000] {
            let params = TransferParams::for_transfer(size, DEFAULT_SYMBOL_SIZE).unwrap();
            let peer = TransferParams::from_oti(params.oti_common(), params.oti_scheme()).unwrap();
            assert_eq!(peer.nb_blocks(), params.nb_blocks());
            assert_eq!(peer.symbol_size(), params.symbol_size());
            assert_eq!(peer.transfer_length(), params.transfer_length());
            assert_eq!(peer.mapped_size(), params.mapped_size());
            for sbn in 0..params.nb_blocks() {
                assert_eq!(
                    peer.nb_source_symbols(sbn as u8),
                    params.nb_source_symbols(sbn as u8)
                );
                assert_eq!(peer.block_offset(sbn as u8), params.block_offset(sbn as u8));
            }
        }
    }

    #[test]
    pub fn test_blocks_cover_transfer() {
        let params = TransferParams::for_transfer(123_457, 1392).unwrap();
        let mut offset = 0u64;
        for sbn in 0..params.nb_blocks() {
            assert_eq!(params.block_offset(sbn as u8), offset);
            offset += params.block_size(sbn as u8) as u64;
        }
        assert_eq!(offset, params.mapped_size());
        assert!(params.mapped_size() >= params.transfer_length());
    }

    #[test]
    pub fn test_from_oti_rejects_garbage() {
        crate::tests::init();
        let params = TransferParams::for_transfer(100_000, 1392).unwrap();
        // wrong alignment byte
        assert!(TransferParams::from_oti(params.oti_common(), params.oti_scheme() ^ 0x01).is_err());
        // sub-blocking is not supported
        assert!(TransferParams::from_oti(params.oti_common(), params.oti_scheme() | 0x200).is_err());
        // zero symbol size
        assert!(TransferParams::from_oti(100 << 24, params.oti_scheme()).is_err());
    }
}
