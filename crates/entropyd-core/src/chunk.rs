//! A bounded segment of the entropy pool.
//!
//! Chunks are append-only until frozen, then immutable until fully drained.
//! A chunk freezes when it reaches capacity or on its first withdrawal, so a
//! partially drained chunk can never be appended to again.

/// Bounded-capacity container of conditioned bytes plus their entropy credit.
///
/// Invariant, checked on every mutation: `entropy_bits <= len * 8` and
/// `len <= cap`.
#[derive(Debug, Clone)]
pub struct PoolChunk {
    buf: Vec<u8>,
    entropy_bits: u64,
    cap: usize,
    frozen: bool,
}

impl PoolChunk {
    /// New empty chunk with the given byte capacity.
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            entropy_bits: 0,
            cap,
            frozen: false,
        }
    }

    /// Rebuild a chunk from persisted parts. The chunk is frozen: snapshot
    /// contents are historical material, never appended to again.
    pub(crate) fn from_parts(bytes: Vec<u8>, entropy_bits: u64, cap: usize) -> Self {
        let chunk = Self {
            buf: bytes,
            entropy_bits,
            cap,
            frozen: true,
        };
        chunk.assert_invariants();
        chunk
    }

    /// Append as many of `bytes` as fit, crediting a proportional share of
    /// `bits`. Returns `(accepted_bytes, accepted_bits)`; `(0, 0)` once the
    /// chunk is frozen.
    ///
    /// The accepted credit is `floor(bits * accepted / offered)`, so partial
    /// acceptance never inflates the ledger.
    pub fn append(&mut self, bytes: &[u8], bits: u64) -> (usize, u64) {
        debug_assert!(bits <= bytes.len() as u64 * 8);
        if self.frozen || bytes.is_empty() {
            return (0, 0);
        }

        let room = self.cap - self.buf.len();
        let take = room.min(bytes.len());
        let credited = if take == bytes.len() {
            bits
        } else {
            (bits as u128 * take as u128 / bytes.len() as u128) as u64
        };

        self.buf.extend_from_slice(&bytes[..take]);
        self.entropy_bits += credited;
        if self.buf.len() == self.cap {
            self.frozen = true;
        }

        self.assert_invariants();
        (take, credited)
    }

    /// Destructively remove up to `n` bytes from the front.
    ///
    /// The returned credit is the whole remaining `entropy_bits` when the
    /// chunk drains completely, otherwise `floor(bits * taken / len)`.
    /// Withdrawal freezes the chunk.
    pub fn withdraw(&mut self, n: usize) -> (Vec<u8>, u64) {
        let take = n.min(self.buf.len());
        if take == 0 {
            return (Vec::new(), 0);
        }

        let prev_len = self.buf.len();
        let delivered_bits = if take == prev_len {
            self.entropy_bits
        } else {
            (self.entropy_bits as u128 * take as u128 / prev_len as u128) as u64
        };

        let out: Vec<u8> = self.buf.drain(..take).collect();
        self.entropy_bits -= delivered_bits;
        self.frozen = true;

        self.assert_invariants();
        (out, delivered_bits)
    }

    /// Whether the chunk holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current byte count.
    pub fn len_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Current entropy credit in bits.
    pub fn entropy_bits(&self) -> u64 {
        self.entropy_bits
    }

    /// Whether the chunk still accepts appends.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Free capacity in bytes (zero once frozen).
    pub fn remaining(&self) -> usize {
        if self.frozen { 0 } else { self.cap - self.buf.len() }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn assert_invariants(&self) {
        assert!(
            self.buf.len() <= self.cap,
            "chunk holds {} bytes, cap {}",
            self.buf.len(),
            self.cap
        );
        assert!(
            self.entropy_bits <= self.buf.len() as u64 * 8,
            "chunk credits {} bits for {} bytes",
            self.entropy_bits,
            self.buf.len()
        );
    }
}
