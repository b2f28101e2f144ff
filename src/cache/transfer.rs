// SPDX-License-Identifier: MPL-2.0

//! Transfer buffers staging CPU bytes for upload to the GPU.

use std::sync::{Arc, Mutex, PoisonError};

use eyre::eyre;
use tracing::trace;

/// A buffer the GPU copies from.
pub trait TransferBuffer: Send + Sync {
    /// Size of the buffer in bytes.
    fn capacity(&self) -> usize;

    /// Map the first `len` bytes for writing, discarding their previous
    /// contents, and hand them to `write`.
    fn map_write_invalidate(&self, len: usize, write: &mut dyn FnMut(&mut [u8])) -> eyre::Result<()>;
}

/// Creates transfer buffers for a [`TransferPool`].
pub trait BufferAllocator {
    type Buffer: TransferBuffer;

    fn allocate(&self, size: usize) -> eyre::Result<Self::Buffer>;
}

/// Transfer buffer in host memory, for headless use.
#[derive(Debug)]
pub struct HostTransferBuffer {
    data: Mutex<Vec<u8>>,
}

impl HostTransferBuffer {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; size]),
        }
    }

    /// Copy of the first `len` bytes.
    #[must_use]
    pub fn read(&self, len: usize) -> Vec<u8> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data[..len.min(data.len())].to_vec()
    }
}

impl TransferBuffer for HostTransferBuffer {
    fn capacity(&self) -> usize {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn map_write_invalidate(&self, len: usize, write: &mut dyn FnMut(&mut [u8])) -> eyre::Result<()> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let size = data.len();
        let target = data
            .get_mut(..len)
            .ok_or_else(|| eyre!("write of {len} bytes exceeds buffer of {size} bytes"))?;
        write(target);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HostAllocator;

impl BufferAllocator for HostAllocator {
    type Buffer = HostTransferBuffer;

    fn allocate(&self, size: usize) -> eyre::Result<Self::Buffer> {
        Ok(HostTransferBuffer::new(size))
    }
}

/// Recycles transfer buffers.
///
/// The pool keeps one reference to every buffer it handed out. A buffer is
/// reused only once every other reference, whether held by a cache entry or
/// by an in-flight copy, is gone.
pub struct TransferPool<A: BufferAllocator> {
    allocator: A,
    buffers: Vec<Arc<A::Buffer>>,
    max_idle: usize,
}

impl<A: BufferAllocator> TransferPool<A> {
    pub fn new(allocator: A, max_idle: usize) -> Self {
        Self {
            allocator,
            buffers: Vec::new(),
            max_idle,
        }
    }

    /// A buffer of at least `size` bytes that nothing else references.
    pub fn acquire(&mut self, size: usize) -> eyre::Result<Arc<A::Buffer>> {
        let reusable = self
            .buffers
            .iter()
            .filter(|buffer| Arc::strong_count(buffer) == 1 && buffer.capacity() >= size)
            .min_by_key(|buffer| buffer.capacity())
            .cloned();

        let buffer = match reusable {
            Some(buffer) => {
                trace!(size, capacity = buffer.capacity(), "reusing transfer buffer");
                buffer
            }
            None => {
                let buffer = Arc::new(self.allocator.allocate(size)?);
                self.buffers.push(Arc::clone(&buffer));
                buffer
            }
        };

        self.trim();
        Ok(buffer)
    }

    /// Release idle buffers beyond the configured limit.
    pub fn trim(&mut self) {
        let mut idle = self.idle();
        if idle <= self.max_idle {
            return;
        }

        self.buffers.retain(|buffer| {
            if idle > self.max_idle && Arc::strong_count(buffer) == 1 {
                idle -= 1;
                false
            } else {
                true
            }
        });
    }

    /// Buffers owned by the pool, busy or idle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffers no one but the pool references.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.buffers
            .iter()
            .filter(|buffer| Arc::strong_count(buffer) == 1)
            .count()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

impl<A: BufferAllocator> std::fmt::Debug for TransferPool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPool")
            .field("buffers", &self.buffers.len())
            .field("idle", &self.idle())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_buffers_are_not_reused() {
        let mut pool = TransferPool::new(HostAllocator, 4);

        let first = pool.acquire(16).unwrap();
        let second = pool.acquire(16).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 2);

        drop(first);
        let third = pool.acquire(8).unwrap();
        assert_eq!(third.capacity(), 16);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn smallest_fitting_buffer_is_reused() {
        let mut pool = TransferPool::new(HostAllocator, 4);

        let held = [64, 128, 32].map(|size| pool.acquire(size).unwrap());
        assert_eq!(pool.len(), 3);
        drop(held);

        assert_eq!(pool.acquire(40).unwrap().capacity(), 64);
        assert_eq!(pool.acquire(200).unwrap().capacity(), 200);
    }

    #[test]
    fn idle_buffers_are_trimmed() {
        let mut pool = TransferPool::new(HostAllocator, 1);

        let held: Vec<_> = (1..=3).map(|n| pool.acquire(n * 8).unwrap()).collect();
        assert_eq!(pool.len(), 3);

        drop(held);
        pool.trim();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn host_buffer_rejects_oversized_writes() {
        let buffer = HostTransferBuffer::new(4);

        buffer
            .map_write_invalidate(3, &mut |bytes| bytes.copy_from_slice(&[1, 2, 3]))
            .unwrap();
        assert_eq!(buffer.read(3), [1, 2, 3]);

        assert!(buffer.map_write_invalidate(5, &mut |_| ()).is_err());
    }
}
