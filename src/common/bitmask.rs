use std::sync::Mutex;

///
/// A bit mask of 256 bits, one per source block.
///
/// The set only ever grows: bits are set when a block is acknowledged or
/// decoded and never cleared, so merging feedback that arrives reordered or
/// duplicated is a plain bitwise OR. All operations are linearizable, which
/// lets the receiver's reader test bits while the decoder sets them.
///
#[derive(Debug, Default)]
pub struct Bitmask256 {
    words: Mutex<[u64; 4]>,
}

impl Bitmask256 {
    /// Return an empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a mask holding the given words, as carried by an acknowledgement.
    pub fn from_words(words: [u64; 4]) -> Self {
        Bitmask256 {
            words: Mutex::new(words),
        }
    }

    /// Set the n-th bit.
    pub fn set(&self, n: u8) {
        let mut words = self.words.lock().unwrap();
        words[n as usize / 64] |= 1u64 << (n % 64);
    }

    /// Test the n-th bit.
    pub fn test(&self, n: u8) -> bool {
        let words = self.words.lock().unwrap();
        words[n as usize / 64] & (1u64 << (n % 64)) != 0
    }

    /// Number of bits that are set.
    pub fn count(&self) -> u32 {
        let words = self.words.lock().unwrap();
        words.iter().map(|w| w.count_ones()).sum()
    }

    /// Merge another mask into this one. Idempotent and commutative.
    pub fn bitwise_or(&self, other: &Bitmask256) {
        let other = other.snapshot();
        let mut words = self.words.lock().unwrap();
        for (word, merge) in words.iter_mut().zip(other) {
            *word |= merge;
        }
    }

    /// Set the first `n` bits, `n <= 256`.
    pub fn set_first_n(&self, n: usize) {
        debug_assert!(n <= 256);
        let mut words = self.words.lock().unwrap();
        for (i, word) in words.iter_mut().enumerate() {
            let lo = i * 64;
            if n >= lo + 64 {
                *word = u64::MAX;
            } else if n > lo {
                *word |= (1u64 << (n - lo)) - 1;
            }
        }
    }

    /// Copy of the four words, for embedding into an acknowledgement.
    pub fn snapshot(&self) -> [u64; 4] {
        *self.words.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::Bitmask256;

    #[test]
    pub fn test_set_test_count() {
        let mask = Bitmask256::new();
        assert_eq!(mask.count(), 0);
        for n in [0u8, 63, 64, 127, 128, 255] {
            assert!(!mask.test(n));
            mask.set(n);
            assert!(mask.test(n));
        }
        assert_eq!(mask.count(), 6);
        // setting again does not change the count
        mask.set(63);
        assert_eq!(mask.count(), 6);
    }

    #[test]
    pub fn test_set_first_n() {
        for n in [0usize, 1, 63, 64, 65, 200, 255, 256] {
            let mask = Bitmask256::new();
            mask.set_first_n(n);
            assert_eq!(mask.count() as usize, n);
            if n > 0 {
                assert!(mask.test((n - 1) as u8));
            }
            if n < 256 {
                assert!(!mask.test(n as u8));
            }
        }
    }

    #[test]
    pub fn test_bitwise_or() {
        let a = Bitmask256::new();
        a.set(3);
        a.set(70);
        let b = Bitmask256::from_words([0x10, 0, 1, 0x8000_0000_0000_0000]);

        let a_count = a.count();
        let b_count = b.count();
        a.bitwise_or(&b);
        assert!(a.count() >= a_count.max(b_count));
        for n in 0..=255u8 {
            let expected = matches!(n, 3 | 4 | 70 | 128 | 255);
            assert_eq!(a.test(n), expected, "bit {}", n);
        }

        // idempotent
        let before = a.snapshot();
        a.bitwise_or(&b);
        assert_eq!(a.snapshot(), before);
    }

    #[test]
    pub fn test_bits_never_clear() {
        // merging feedback can only grow the set
        let acked = Bitmask256::new();
        let mut previous = 0;
        for words in [[1u64, 0, 0, 0], [0, 2, 0, 0], [1, 0, 0, 0], [0, 0, 0, 0]] {
            acked.bitwise_or(&Bitmask256::from_words(words));
            assert!(acked.count() >= previous);
            previous = acked.count();
            assert!(acked.test(0));
        }
    }

    #[test]
    pub fn test_snapshot_roundtrip() {
        let mask = Bitmask256::new();
        mask.set_first_n(100);
        let copy = Bitmask256::from_words(mask.snapshot());
        assert_eq!(copy.count(), 100);
    }
}
