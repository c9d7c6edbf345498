//! The bounded entropy pool and its ledger.
//!
//! The pool is an ordered sequence of [`PoolChunk`]s, oldest first. Appends
//! fill the tail (opening fresh chunks as needed), withdrawals drain the
//! front, and whenever the configured byte cap is exceeded whole oldest
//! chunks are dropped — every chunk is already conditioned material, so
//! partial eviction buys nothing.
//!
//! The ledger (`total_bytes`, `total_bits`) is maintained incrementally and
//! cross-checked against hard bounds on every mutation; a violation is a bug
//! in the accounting and aborts the process rather than silently corrupting
//! the entropy estimate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::chunk::PoolChunk;
use crate::error::{Error, Result};

/// Point-in-time pool totals, as reported on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes currently held.
    pub total_bytes: usize,
    /// Entropy credit currently held.
    pub total_bits: u64,
    /// Configured byte cap.
    pub max_bytes: usize,
    /// Number of live chunks.
    pub chunks: usize,
}

/// The pool, shared behind a single mutex.
///
/// All operations are pure memory and finish in microseconds; callers take
/// the lock, mutate, and release without ever suspending.
pub type SharedPool = Arc<Mutex<Pool>>;

/// Wrap a [`Pool`] for sharing across tasks.
pub fn shared_pool(pool: Pool) -> SharedPool {
    Arc::new(Mutex::new(pool))
}

/// Ordered chunk sequence with byte cap and entropy ledger.
#[derive(Debug)]
pub struct Pool {
    chunks: VecDeque<PoolChunk>,
    max_bytes: usize,
    chunk_cap: usize,
    total_bytes: usize,
    total_bits: u64,
}

impl Pool {
    /// New empty pool. Both caps must be non-zero.
    pub fn new(max_bytes: usize, chunk_cap: usize) -> Self {
        assert!(max_bytes > 0, "pool byte cap must be non-zero");
        assert!(chunk_cap > 0, "chunk byte cap must be non-zero");
        Self {
            chunks: VecDeque::new(),
            max_bytes,
            chunk_cap,
            total_bytes: 0,
            total_bits: 0,
        }
    }

    /// Append conditioned bytes carrying `bits` of entropy credit.
    ///
    /// The credit is distributed across chunk-boundary slices with a
    /// sequential proportional split (`floor(rem_bits * len / rem_len)`,
    /// remainder riding on the final slice), which sums exactly to `bits`
    /// and can never overfill a chunk's `len * 8` bound. If the append
    /// pushes the pool over `max_bytes`, whole oldest chunks are evicted
    /// until it fits again.
    pub fn append(&mut self, bytes: &[u8], bits: u64) {
        assert!(
            bits <= bytes.len() as u64 * 8,
            "append credits {bits} bits for {} bytes",
            bytes.len()
        );

        let mut rem = bytes;
        let mut rem_bits = bits;
        while !rem.is_empty() {
            if self.chunks.back().is_none_or(|c| c.remaining() == 0) {
                self.chunks.push_back(PoolChunk::new(self.chunk_cap));
            }
            let tail = self.chunks.back_mut().expect("tail chunk exists");

            let take = tail.remaining().min(rem.len());
            let slice_bits = if take == rem.len() {
                rem_bits
            } else {
                (rem_bits as u128 * take as u128 / rem.len() as u128) as u64
            };
            let (accepted, credited) = tail.append(&rem[..take], slice_bits);
            assert_eq!(accepted, take, "open tail chunk refused bytes");
            assert_eq!(credited, slice_bits, "tail chunk rescaled exact slice");

            self.total_bytes += take;
            self.total_bits += slice_bits;
            rem = &rem[take..];
            rem_bits -= slice_bits;
        }

        while self.total_bytes > self.max_bytes {
            let evicted = self
                .chunks
                .pop_front()
                .expect("pool over cap but holds no chunks");
            self.total_bytes -= evicted.len_bytes();
            self.total_bits -= evicted.entropy_bits();
            log::debug!(
                "evicted oldest chunk: {} bytes, {} bits",
                evicted.len_bytes(),
                evicted.entropy_bits()
            );
        }

        self.assert_ledger();
    }

    /// Atomically remove up to `n` bytes from the front.
    ///
    /// Returns `(bytes, delivered_bits)`; the pool may deliver less than
    /// requested, and an empty pool yields `(empty, 0)` rather than an
    /// error.
    pub fn withdraw(&mut self, n: usize) -> (Vec<u8>, u64) {
        let mut out = Vec::with_capacity(n.min(self.total_bytes));
        let mut delivered_bits = 0u64;

        while out.len() < n {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let (bytes, bits) = front.withdraw(n - out.len());
            out.extend_from_slice(&bytes);
            delivered_bits += bits;
            if front.is_empty() {
                self.chunks.pop_front();
            }
        }

        self.total_bytes -= out.len();
        self.total_bits -= delivered_bits;
        self.assert_ledger();
        (out, delivered_bits)
    }

    /// Current totals.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_bytes: self.total_bytes,
            total_bits: self.total_bits,
            max_bytes: self.max_bytes,
            chunks: self.chunks.len(),
        }
    }

    /// Configured byte cap.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Configured per-chunk byte cap.
    pub fn chunk_cap(&self) -> usize {
        self.chunk_cap
    }

    pub(crate) fn chunks(&self) -> impl Iterator<Item = &PoolChunk> {
        self.chunks.iter()
    }

    /// Replace the pool contents with decoded snapshot chunks.
    ///
    /// Fails without touching the pool if any chunk violates the configured
    /// caps or carries more bits than bytes can hold.
    pub fn install_chunks(&mut self, parts: Vec<(Vec<u8>, u64)>) -> Result<()> {
        let mut total_bytes = 0usize;
        let mut total_bits = 0u64;
        for (i, (bytes, bits)) in parts.iter().enumerate() {
            if bytes.is_empty() {
                return Err(Error::Snapshot(format!("chunk {i} is empty")));
            }
            if bytes.len() > self.chunk_cap {
                return Err(Error::Snapshot(format!(
                    "chunk {i} holds {} bytes, cap is {}",
                    bytes.len(),
                    self.chunk_cap
                )));
            }
            if *bits > bytes.len() as u64 * 8 {
                return Err(Error::Snapshot(format!(
                    "chunk {i} credits {bits} bits for {} bytes",
                    bytes.len()
                )));
            }
            total_bytes += bytes.len();
            total_bits += bits;
        }
        if total_bytes > self.max_bytes {
            return Err(Error::Snapshot(format!(
                "snapshot holds {total_bytes} bytes, pool cap is {}",
                self.max_bytes
            )));
        }

        let cap = self.chunk_cap;
        self.chunks = parts
            .into_iter()
            .map(|(bytes, bits)| PoolChunk::from_parts(bytes, bits, cap))
            .collect();
        self.total_bytes = total_bytes;
        self.total_bits = total_bits;
        self.assert_ledger();
        Ok(())
    }

    /// Cheap bound checks on every mutation; a full recount under
    /// `debug_assertions`.
    fn assert_ledger(&self) {
        assert!(
            self.total_bits <= self.total_bytes as u64 * 8,
            "ledger corrupt: {} bits for {} bytes",
            self.total_bits,
            self.total_bytes
        );
        assert!(
            self.total_bytes <= self.max_bytes,
            "ledger corrupt: {} bytes over cap {}",
            self.total_bytes,
            self.max_bytes
        );
        #[cfg(debug_assertions)]
        {
            let bytes: usize = self.chunks.iter().map(PoolChunk::len_bytes).sum();
            let bits: u64 = self.chunks.iter().map(PoolChunk::entropy_bits).sum();
            assert_eq!(bytes, self.total_bytes, "byte ledger drifted");
            assert_eq!(bits, self.total_bits, "bit ledger drifted");
        }
    }
}
