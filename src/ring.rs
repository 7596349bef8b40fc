//! Fixed-capacity circular byte store.
//!
//! A [`RingBuffer`] is a byte region of capacity `N` with a read cursor and
//! a write cursor. One slot is permanently unused to tell "empty" from
//! "full", so the usable capacity is `N - 1` and at rest
//! `readable_size() + writable_size() == N - 1` always holds.
//!
//! The buffer has no blocking semantics of its own; the pipe buffer layers
//! those on top. Besides the copying [`write`]/[`read`]/[`peek`] operations
//! it exposes contiguous-region accessors so a caller can copy in or out
//! without an intermediate buffer, splitting a transfer that crosses the
//! wraparound boundary into two contiguous sub-copies.
//!
//! [`write`]: RingBuffer::write
//! [`read`]: RingBuffer::read
//! [`peek`]: RingBuffer::peek

use crate::KernelError;

/// A fixed-capacity circular byte buffer.
///
/// The capacity is fixed at construction; there is no resize operation.
pub struct RingBuffer {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
}

impl RingBuffer {
    /// Allocates a ring buffer with a backing region of `capacity` bytes,
    /// of which `capacity - 1` are usable.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidArgument`] for capacities below 2 (no
    /// usable slot) and [`KernelError::NoMemory`] if the backing allocation
    /// fails.
    pub fn new(capacity: usize) -> Result<RingBuffer, KernelError> {
        if capacity < 2 {
            return Err(KernelError::InvalidArgument);
        }
        let mut backing = Vec::new();
        backing
            .try_reserve_exact(capacity)
            .map_err(|_| KernelError::NoMemory)?;
        backing.resize(capacity, 0);
        Ok(RingBuffer {
            buf: backing.into_boxed_slice(),
            read: 0,
            write: 0,
        })
    }

    /// Size of the backing region. Usable capacity is one less.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of buffered bytes available to read.
    pub fn readable_size(&self) -> usize {
        let n = self.buf.len();
        (self.write + n - self.read) % n
    }

    /// Number of free bytes available to write.
    pub fn writable_size(&self) -> usize {
        self.buf.len() - 1 - self.readable_size()
    }

    /// Whether no buffered bytes remain.
    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Whether no free space remains.
    pub fn is_full(&self) -> bool {
        self.writable_size() == 0
    }

    /// Length of the readable run starting at the read cursor that does not
    /// cross the wraparound boundary.
    pub fn contiguous_readable_size(&self) -> usize {
        if self.write >= self.read {
            self.write - self.read
        } else {
            self.buf.len() - self.read
        }
    }

    /// Length of the writable run starting at the write cursor that does
    /// not cross the wraparound boundary.
    pub fn contiguous_writable_size(&self) -> usize {
        if self.read > self.write {
            self.read - self.write - 1
        } else if self.read == 0 {
            self.buf.len() - self.write - 1
        } else {
            self.buf.len() - self.write
        }
    }

    /// The readable run starting at the read cursor, up to the wraparound
    /// boundary. Pair with [`advance_read`](Self::advance_read).
    pub fn contiguous_readable(&self) -> &[u8] {
        &self.buf[self.read..self.read + self.contiguous_readable_size()]
    }

    /// The writable run starting at the write cursor, up to the wraparound
    /// boundary. Pair with [`advance_write`](Self::advance_write).
    pub fn contiguous_writable(&mut self) -> &mut [u8] {
        let len = self.contiguous_writable_size();
        &mut self.buf[self.write..self.write + len]
    }

    /// Consume `n` bytes previously copied out of the readable region.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`readable_size`](Self::readable_size).
    pub fn advance_read(&mut self, n: usize) {
        assert!(n <= self.readable_size());
        self.read = (self.read + n) % self.buf.len();
    }

    /// Commit `n` bytes previously copied into the writable region.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`writable_size`](Self::writable_size).
    pub fn advance_write(&mut self, n: usize) {
        assert!(n <= self.writable_size());
        self.write = (self.write + n) % self.buf.len();
    }

    /// Copies as much of `bytes` as fits into the buffer. Returns the number
    /// of bytes accepted, which is zero when the buffer is full.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let mut written = 0;
        while written < bytes.len() {
            let run = self.contiguous_writable();
            if run.is_empty() {
                break;
            }
            let n = run.len().min(bytes.len() - written);
            run[..n].copy_from_slice(&bytes[written..written + n]);
            self.advance_write(n);
            written += n;
        }
        written
    }

    /// Copies up to `out.len()` buffered bytes into `out`, consuming them.
    /// Returns the number of bytes copied.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let mut taken = 0;
        while taken < out.len() {
            let run = self.contiguous_readable();
            if run.is_empty() {
                break;
            }
            let n = run.len().min(out.len() - taken);
            out[taken..taken + n].copy_from_slice(&run[..n]);
            self.advance_read(n);
            taken += n;
        }
        taken
    }

    /// Copies up to `out.len()` buffered bytes into `out` without consuming
    /// them. Returns the number of bytes copied.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.readable_size());
        let first = count.min(self.contiguous_readable_size());
        out[..first].copy_from_slice(&self.buf[self.read..self.read + first]);
        if first < count {
            out[first..count].copy_from_slice(&self.buf[..count - first]);
        }
        count
    }
}
