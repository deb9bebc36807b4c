//! Bit-vector pool of offsets `[0, capacity)`.
//!
//! Storage grows only as far as the highest allocated offset, so a pool
//! over a very large label space costs nothing until it is used.

use tracing::warn;

use super::AllocationError;

const WORD_BITS: u64 = 64;

/// A pool of offsets tracked one bit per offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationBitmap {
    descriptor: String,
    capacity: u64,
    /// Little-endian words: bit `i` lives in `words[i / 64]`.
    words: Vec<u64>,
    count: u64,
}

/// Single-bit mask for `bit` in `0..64`.
fn mask(bit: u64) -> u64 {
    u32::try_from(bit)
        .ok()
        .and_then(|b| 1_u64.checked_shl(b))
        .unwrap_or_default()
}

/// Word index and bit mask for `offset`.
fn locate(offset: u64) -> (usize, u64) {
    let word = usize::try_from(offset.checked_div(WORD_BITS).unwrap_or_default())
        .unwrap_or(usize::MAX);
    (word, mask(offset.checked_rem(WORD_BITS).unwrap_or_default()))
}

impl AllocationBitmap {
    /// An empty pool of `capacity` offsets, identified by `descriptor`.
    pub fn new(descriptor: impl Into<String>, capacity: u64) -> Self {
        Self {
            descriptor: descriptor.into(),
            capacity,
            words: Vec::new(),
            count: 0,
        }
    }

    /// The range descriptor this pool was built for.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Total number of offsets.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of allocated offsets.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Number of free offsets.
    pub fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.count)
    }

    /// Whether `offset` is allocated. Out-of-range offsets never are.
    pub fn has(&self, offset: u64) -> bool {
        if offset >= self.capacity {
            return false;
        }
        let (word, mask) = locate(offset);
        self.words.get(word).is_some_and(|w| w & mask != 0)
    }

    /// Mark `offset` as allocated.
    ///
    /// # Errors
    ///
    /// [`AllocationError::NotInRange`] past the capacity,
    /// [`AllocationError::AlreadyAllocated`] if the bit is set.
    pub fn allocate(&mut self, offset: u64) -> Result<(), AllocationError> {
        if offset >= self.capacity {
            return Err(AllocationError::NotInRange {
                offset,
                capacity: self.capacity,
            });
        }
        if self.has(offset) {
            return Err(AllocationError::AlreadyAllocated { offset });
        }
        self.set(offset);
        Ok(())
    }

    /// Allocate the lowest free offset.
    ///
    /// # Errors
    ///
    /// [`AllocationError::Full`] when every offset is taken.
    pub fn allocate_next(&mut self) -> Result<u64, AllocationError> {
        let mut candidate = None;
        for (idx, word) in self.words.iter().enumerate() {
            if *word != u64::MAX {
                let base = u64::try_from(idx).unwrap_or(u64::MAX).saturating_mul(WORD_BITS);
                candidate = Some(base.saturating_add(u64::from(word.trailing_ones())));
                break;
            }
        }
        let offset = candidate.unwrap_or_else(|| {
            u64::try_from(self.words.len())
                .unwrap_or(u64::MAX)
                .saturating_mul(WORD_BITS)
        });
        if offset >= self.capacity {
            return Err(AllocationError::Full);
        }
        self.set(offset);
        Ok(offset)
    }

    /// Return `offset` to the pool. Releasing a free or out-of-range offset
    /// does nothing.
    pub fn release(&mut self, offset: u64) {
        if !self.has(offset) {
            return;
        }
        let (word, mask) = locate(offset);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !mask;
            self.count = self.count.saturating_sub(1);
        }
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }

    /// Allocated offsets in ascending order.
    pub fn allocated(&self) -> impl Iterator<Item = u64> + '_ {
        self.words.iter().enumerate().flat_map(|(idx, &word)| {
            let base = u64::try_from(idx).unwrap_or(u64::MAX).saturating_mul(WORD_BITS);
            (0..WORD_BITS)
                .filter(move |bit| word & mask(*bit) != 0)
                .map(move |bit| base.saturating_add(bit))
        })
    }

    /// Serialise as `(descriptor, bytes)`.
    ///
    /// The bytes are the big-endian, minimal-length encoding of the integer
    /// whose bit `i` is offset `i`; an empty pool encodes to no bytes.
    pub fn snapshot(&self) -> (String, Vec<u8>) {
        let mut bytes: Vec<u8> = self
            .words
            .iter()
            .rev()
            .flat_map(|w| w.to_be_bytes())
            .skip_while(|b| *b == 0)
            .collect();
        bytes.shrink_to_fit();
        (self.descriptor.clone(), bytes)
    }

    /// Replace the pool contents with a snapshot taken from a pool with the
    /// same descriptor.
    ///
    /// Bits beyond the capacity are discarded with a warning.
    ///
    /// # Errors
    ///
    /// [`AllocationError::MismatchedRange`] if `descriptor` differs; the
    /// pool is left untouched.
    pub fn restore(&mut self, descriptor: &str, data: &[u8]) -> Result<(), AllocationError> {
        if descriptor != self.descriptor {
            return Err(AllocationError::MismatchedRange {
                expected: self.descriptor.clone(),
                found: descriptor.to_owned(),
            });
        }

        let mut words: Vec<u64> = data
            .rchunks(8)
            .map(|chunk| {
                let mut buf = [0_u8; 8];
                let pad = buf.len().saturating_sub(chunk.len());
                if let Some(dst) = buf.get_mut(pad..) {
                    dst.copy_from_slice(chunk);
                }
                u64::from_be_bytes(buf)
            })
            .collect();

        let mut dropped = 0_u64;
        let (last_word, last_mask) = locate(self.capacity);
        for (idx, word) in words.iter_mut().enumerate() {
            let keep = match idx.cmp(&last_word) {
                std::cmp::Ordering::Less => u64::MAX,
                std::cmp::Ordering::Equal => last_mask.wrapping_sub(1),
                std::cmp::Ordering::Greater => 0,
            };
            dropped = dropped.saturating_add(u64::from((*word & !keep).count_ones()));
            *word &= keep;
        }
        while words.last() == Some(&0) {
            words.pop();
        }
        if dropped > 0 {
            warn!(
                descriptor,
                dropped, "allocation snapshot marks offsets beyond the pool capacity"
            );
        }

        self.count = words.iter().map(|w| u64::from(w.count_ones())).sum();
        self.words = words;
        Ok(())
    }

    fn set(&mut self, offset: u64) {
        let (word, mask) = locate(offset);
        if self.words.len() <= word {
            self.words.resize(word.saturating_add(1), 0);
        }
        if let Some(w) = self.words.get_mut(word) {
            *w |= mask;
            self.count = self.count.saturating_add(1);
        }
    }
}
