//!
//! Block Partitioning Algorithm
//! See <https://www.rfc-editor.org/rfc/rfc5052#section-9.1>
//!
//! Splits the transfer into `nb_blocks` source blocks, the first `nb_a_large`
//! of them holding `a_large` symbols and the rest `a_small`. Both endpoints
//! derive the identical layout from the OTI alone.
//!

/// Symbol layout of the source blocks of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    /// Symbols in each of the larger source blocks.
    pub a_large: u64,
    /// Symbols in each of the smaller source blocks.
    pub a_small: u64,
    /// Number of blocks holding `a_large` symbols; they come first.
    pub nb_a_large: u64,
    /// Total number of source blocks.
    pub nb_blocks: u64,
}

impl BlockLayout {
    /// Number of source symbols in block `sbn`.
    pub fn nb_symbols(&self, sbn: u8) -> u64 {
        if u64::from(sbn) < self.nb_a_large {
            self.a_large
        } else {
            self.a_small
        }
    }

    /// Index of the first symbol of block `sbn` within the transfer.
    pub fn first_symbol(&self, sbn: u8) -> u64 {
        let sbn = u64::from(sbn);
        if sbn <= self.nb_a_large {
            sbn * self.a_large
        } else {
            self.nb_a_large * self.a_large + (sbn - self.nb_a_large) * self.a_small
        }
    }

    /// Total number of symbols across all blocks.
    pub fn total_symbols(&self) -> u64 {
        self.nb_a_large * self.a_large + (self.nb_blocks - self.nb_a_large) * self.a_small
    }
}

/// Partition a transfer of `l` octets into blocks of at most `b` symbols of
/// `e` octets each.
pub fn block_partitioning(b: u64, l: u64, e: u64) -> Option<BlockLayout> {
    if b == 0 || e == 0 {
        log::error!("invalid partitioning parameters b={} e={}", b, e);
        return None;
    }

    let t = num_integer::div_ceil(l, e);
    let n = num_integer::div_ceil(t, b);
    log::debug!("t={} n={} b={} l={} e={}", t, n, b, l, e);
    if n == 0 {
        return None;
    }

    Some(layout_for_blocks(t, n))
}

/// Layout of `t` symbols spread over `n` blocks, `n >= 1`.
pub fn layout_for_blocks(t: u64, n: u64) -> BlockLayout {
    debug_assert!(n >= 1);
    let a_large = num_integer::div_ceil(t, n);
    let a_small = num_integer::div_floor(t, n);
    BlockLayout {
        a_large,
        a_small,
        nb_a_large: t - a_small * n,
        nb_blocks: n,
    }
}

#[cfg(test)]
mod tests {
    use super::block_partitioning;

    #[test]
    pub fn test_partition_empty() {
        crate::tests::init();
        assert!(block_partitioning(64, 0, 1024).is_none());
        assert!(block_partitioning(0, 1024, 1024).is_none());
        assert!(block_partitioning(64, 1024, 0).is_none());
    }

    #[test]
    pub fn test_partition_single_block() {
        let layout = block_partitioning(64, 100, 16).unwrap();
        assert_eq!(layout.nb_blocks, 1);
        assert_eq!(layout.nb_symbols(0), 7);
        assert_eq!(layout.total_symbols(), 7);
    }

    #[test]
    pub fn test_partition_covers_every_symbol() {
        crate::tests::init();
        for l in [1u64, 63, 64, 65, 1000, 123_457, 10_000_000] {
            let layout = block_partitioning(64, l, 1400).unwrap();
            let t = num_integer::div_ceil(l, 1400);
            assert_eq!(layout.total_symbols(), t, "l={}", l);
            assert!(layout.a_large <= 64);
            assert!(layout.a_large - layout.a_small <= 1);

            // per-block symbol counts and offsets are consistent
            let mut offset = 0;
            for sbn in 0..layout.nb_blocks {
                assert_eq!(layout.first_symbol(sbn as u8), offset);
                offset += layout.nb_symbols(sbn as u8);
            }
            assert_eq!(offset, t);
        }
    }

    #[test]
    pub fn test_large_blocks_come_first() {
        // 130 symbols over 64-symbol blocks: 3 blocks of 44/43/43
        let layout = block_partitioning(64, 130 * 10, 10).unwrap();
        assert_eq!(layout.nb_blocks, 3);
        assert_eq!(layout.a_large, 44);
        assert_eq!(layout.a_small, 43);
        assert_eq!(layout.nb_a_large, 1);
        assert_eq!(layout.nb_symbols(0), 44);
        assert_eq!(layout.nb_symbols(1), 43);
        assert_eq!(layout.nb_symbols(2), 43);
    }
}
