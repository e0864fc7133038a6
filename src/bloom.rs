//! Fixed-capacity Bloom filter with a chained-seed hashing scheme and a
//! pluggable backing-store allocation strategy.
//!
//! Bits are packed into `u64` words behind atomics and set with a bounded
//! CAS-retry loop, so concurrent inserts never block a reader. Indices are
//! derived by chaining the hash forward: `h0 = len; h[i+1] = murmur(key, h[i])`.

use std::hint;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::error;

use crate::error::Error;
use crate::hash::murmur3_32;

const MAX_CAS_TRIES: usize = 64;
const YIELD_EVERY_TRIES: usize = 8;
const SLEEP_AFTER_TRIES: usize = 32;

/// Where the bit vector's backing memory comes from, chosen once at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocStrategy {
    /// Plain heap allocation.
    Heap,
    /// Anonymous memory mapping, useful for very large filters the caller
    /// wants the kernel to be able to page out.
    Mmap,
}

enum Backing {
    Heap(Vec<AtomicU64>),
    Mmap(memmap2::MmapMut, usize),
}

impl Backing {
    fn words(&self) -> &[AtomicU64] {
        match self {
            Backing::Heap(v) => v,
            Backing::Mmap(m, word_count) => {
                // AtomicU64 has the same layout as u64; the mapping is
                // zero-filled and exclusively owned by this filter.
                let ptr = m.as_ptr() as *const AtomicU64;
                unsafe { std::slice::from_raw_parts(ptr, *word_count) }
            }
        }
    }
}

/// A fixed-capacity, concurrent, set-membership approximation. Bits only
/// ever transition 0 -> 1; the filter never removes an element.
pub struct BloomFilter {
    m: u64,
    k: u32,
    buf: Backing,
    inserted: std::sync::atomic::AtomicU64,
}

impl BloomFilter {
    /// Builds a filter sized for `expected_items` at the target
    /// `fp_rate`, using `strategy` for the backing allocation.
    pub fn new(expected_items: u64, fp_rate: f32, strategy: AllocStrategy) -> Result<Self, Error> {
        assert!(fp_rate > 0.0 && fp_rate < 1.0, "fp_rate must be in (0,1)");

        // No artificial floor on k or m: for fp_rate > 0.5 this legitimately
        // yields k = 0 (zero hash functions) and then m = 0 (zero bits), a
        // degenerate filter whose `might_contain` always returns true, since
        // `indices()` below iterates zero times.
        let k = (-fp_rate.log2()).floor() as u32;
        let m = ((expected_items as f64) * (k as f64) / std::f64::consts::LN_2).ceil() as u64;

        // The backing store still needs at least one word to allocate even
        // when m == 0, since `get`/`set` are simply never called for such a
        // filter and a zero-length mmap is rejected on some platforms.
        let word_count = (((m + 63) / 64) as usize).max(1);
        let bytes = word_count * 8;

        let buf = match strategy {
            AllocStrategy::Heap => {
                Backing::Heap((0..word_count).map(|_| AtomicU64::new(0)).collect())
            }
            AllocStrategy::Mmap => {
                let map = memmap2::MmapOptions::new().len(bytes).map_anon().map_err(|_| {
                    error!(component = "bloom", event = "out_of_memory", bytes, "mmap allocation failed");
                    Error::OutOfMemory { bytes }
                })?;
                Backing::Mmap(map, word_count)
            }
        };

        Ok(Self {
            m,
            k,
            buf,
            inserted: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn num_bits(&self) -> u64 {
        self.m
    }

    pub fn num_hashes(&self) -> u32 {
        self.k
    }

    pub fn inserted(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    /// Marks `key` as present. Idempotent; never fails.
    pub fn insert(&self, key: &[u8]) {
        for idx in self.indices(key) {
            self.set(idx);
        }
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns `true` if `key` was possibly inserted (false positives
    /// allowed, false negatives forbidden).
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.indices(key).all(|idx| self.get(idx))
    }

    fn indices(&self, key: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let mut h = key.len() as u32;
        (0..self.k).map(move |_| {
            h = murmur3_32_with_prefix(key, h);
            (h as u64) % self.m
        })
    }

    fn word_bit(&self, i: u64) -> (usize, u64) {
        let w = i >> 6;
        let b = 1u64 << (i & 63);
        (w as usize, b)
    }

    fn get(&self, i: u64) -> bool {
        let (w, b) = self.word_bit(i);
        let v = self.buf.words()[w].load(Ordering::Relaxed);
        (v & b) != 0
    }

    fn set(&self, i: u64) {
        let (w, b) = self.word_bit(i);
        let ptr = &self.buf.words()[w];

        for tries in 1..=MAX_CAS_TRIES {
            let old = ptr.load(Ordering::Relaxed);
            let neu = old | b;
            if neu == old
                || ptr
                    .compare_exchange(old, neu, Ordering::SeqCst, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            if tries % YIELD_EVERY_TRIES == 0 {
                hint::spin_loop();
                if tries >= SLEEP_AFTER_TRIES {
                    std::thread::yield_now();
                }
            }
        }
    }
}

/// Hashes `key` with `seed` as the running chain value for the next round.
fn murmur3_32_with_prefix(key: &[u8], seed: u32) -> u32 {
    murmur3_32(key, seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_key_is_always_contained() {
        let bf = BloomFilter::new(1000, 0.01, AllocStrategy::Heap).unwrap();
        bf.insert(b"Arun");
        bf.insert(b"This is good!");
        assert!(bf.might_contain(b"Arun"));
        assert!(bf.might_contain(b"This is good!"));
    }

    #[test]
    fn absent_key_is_usually_not_contained() {
        let bf = BloomFilter::new(10_000_000, 0.001, AllocStrategy::Heap).unwrap();
        bf.insert(b"Arun");
        bf.insert(b"This is good!");
        assert!(!bf.might_contain(b"Bob"));
    }

    #[test]
    fn inserted_counter_is_monotonic() {
        let bf = BloomFilter::new(1000, 0.01, AllocStrategy::Heap).unwrap();
        assert_eq!(bf.inserted(), 0);
        bf.insert(b"a");
        bf.insert(b"b");
        assert_eq!(bf.inserted(), 2);
    }

    #[test]
    fn mmap_strategy_behaves_like_heap() {
        let bf = BloomFilter::new(1000, 0.01, AllocStrategy::Mmap).unwrap();
        bf.insert(b"Arun");
        assert!(bf.might_contain(b"Arun"));
    }

    #[test]
    fn false_positive_rate_is_roughly_bounded() {
        let expected = 10_000u64;
        let fp = 0.01f32;
        let bf = BloomFilter::new(expected, fp, AllocStrategy::Heap).unwrap();
        for i in 0..expected {
            bf.insert(format!("member-{i}").as_bytes());
        }
        let trials = 20_000u64;
        let mut false_positives = 0u64;
        for i in 0..trials {
            let key = format!("absent-{i}");
            if bf.might_contain(key.as_bytes()) {
                false_positives += 1;
            }
        }
        let observed_rate = false_positives as f64 / trials as f64;
        assert!(observed_rate < (fp as f64) * 2.0);
    }
}
