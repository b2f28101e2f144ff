// SPDX-License-Identifier: MPL-2.0

//! Bounded cache of frames resident in GPU transfer buffers.
//!
//! Frames are pulled lazily from a [`DecodedFrameSource`]; the cache never
//! triggers decoding. When full, the least recently used frame is evicted
//! before a new one is inserted.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{trace, warn};

use super::image_cache::DecodedFrameSource;
use super::transfer::{BufferAllocator, TransferBuffer, TransferPool};
use crate::frame::{FrameDescription, MediaFrameReference};

/// A frame staged in a transfer buffer.
#[derive(Debug)]
pub struct GpuFrame<B> {
    pub description: FrameDescription,
    pub buffer: Arc<B>,
}

impl<B> Clone for GpuFrame<B> {
    fn clone(&self) -> Self {
        Self {
            description: self.description,
            buffer: Arc::clone(&self.buffer),
        }
    }
}

/// Not thread-safe; owned by the rendering thread.
pub struct GpuFrameCache<A: BufferAllocator> {
    capacity: usize,
    entries: HashMap<MediaFrameReference, GpuFrame<A::Buffer>>,
    /// Keys of `entries`, most recently used first.
    recency: VecDeque<MediaFrameReference>,
    pool: TransferPool<A>,
}

impl<A: BufferAllocator> GpuFrameCache<A> {
    /// A cache holding at most `capacity` frames, never less than one.
    pub fn new(capacity: usize, pool: TransferPool<A>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            recency: VecDeque::with_capacity(capacity),
            pool,
        }
    }

    /// The GPU-resident frame for `frame`, transferring it from `upstream`
    /// on a miss.
    ///
    /// Returns `None` while `upstream` has no decoded data for the frame.
    pub fn get(
        &mut self,
        upstream: &dyn DecodedFrameSource,
        frame: MediaFrameReference,
    ) -> Option<GpuFrame<A::Buffer>> {
        if let Some(entry) = self.entries.get(&frame) {
            let entry = entry.clone();
            self.promote(frame);
            return Some(entry);
        }

        let decoded = upstream.get(&frame).filter(|data| !data.bytes.is_empty())?;

        if self.entries.len() >= self.capacity {
            self.evict();
        }

        let bytes = decoded.bytes.as_slice();
        let buffer = match self.pool.acquire(bytes.len()) {
            Ok(buffer) => buffer,
            Err(why) => {
                warn!(?frame, ?why, "unable to allocate transfer buffer");
                return None;
            }
        };

        let copy = &mut |target: &mut [u8]| target.copy_from_slice(bytes);
        if let Err(why) = buffer.map_write_invalidate(bytes.len(), copy) {
            warn!(?frame, ?why, "unable to write transfer buffer");
            return None;
        }

        let entry = GpuFrame {
            description: decoded.description,
            buffer,
        };

        self.entries.insert(frame, entry.clone());
        self.recency.push_front(frame);
        Some(entry)
    }

    fn promote(&mut self, frame: MediaFrameReference) {
        if let Some(position) = self.recency.iter().position(|key| *key == frame) {
            if let Some(key) = self.recency.remove(position) {
                self.recency.push_front(key);
            }
        }
    }

    fn evict(&mut self) {
        if let Some(oldest) = self.recency.pop_back() {
            trace!(frame = ?oldest, "evicting frame");
            self.entries.remove(&oldest);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn contains(&self, frame: &MediaFrameReference) -> bool {
        self.entries.contains_key(frame)
    }

    /// Cached keys, most recently used first.
    pub fn recency(&self) -> impl Iterator<Item = &MediaFrameReference> {
        self.recency.iter()
    }

    #[must_use]
    pub fn pool(&self) -> &TransferPool<A> {
        &self.pool
    }

    /// Drop every entry. Buffers still referenced elsewhere stay alive until released.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.pool.clear();
    }
}

impl<A: BufferAllocator> std::fmt::Debug for GpuFrameCache<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuFrameCache")
            .field("capacity", &self.capacity)
            .field("recency", &self.recency)
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::image_cache::LoadedImageCache;
    use crate::cache::transfer::{HostAllocator, HostTransferBuffer};
    use crate::frame::{Attributes, FrameBytes, FrameData, PixelFormat};

    fn frame(index: u64) -> MediaFrameReference {
        MediaFrameReference::new(1, index)
    }

    fn decoded(fill: u8) -> FrameData {
        FrameData {
            description: FrameDescription::packed(2, 2, PixelFormat::Gray8).unwrap(),
            attributes: Attributes::new(),
            bytes: FrameBytes::from_vec(vec![fill; 4]),
        }
    }

    fn cache(capacity: usize) -> GpuFrameCache<HostAllocator> {
        GpuFrameCache::new(capacity, TransferPool::new(HostAllocator, 4))
    }

    fn order(cache: &GpuFrameCache<HostAllocator>) -> Vec<u64> {
        cache.recency().map(|key| key.frame).collect()
    }

    #[test]
    fn least_recently_used_frame_is_evicted() {
        let upstream = LoadedImageCache::new();
        for index in 0..3 {
            upstream.insert(frame(index), decoded(index as u8));
        }

        let mut cache = cache(2);
        for index in 0..3 {
            assert!(cache.get(&upstream, frame(index)).is_some());
            assert!(cache.len() <= 2);
        }

        assert!(!cache.contains(&frame(0)));
        assert_eq!(order(&cache), [2, 1]);

        let hit = cache.get(&upstream, frame(1)).unwrap();
        assert_eq!(hit.buffer.read(4), [1; 4]);
        assert_eq!(order(&cache), [1, 2]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn hits_do_not_transfer_again() {
        let upstream = LoadedImageCache::new();
        upstream.insert(frame(0), decoded(5));

        let mut cache = cache(4);
        let first = cache.get(&upstream, frame(0)).unwrap();

        // Changing upstream data is invisible until the entry is evicted.
        upstream.insert(frame(0), decoded(9));
        let second = cache.get(&upstream, frame(0)).unwrap();

        assert!(Arc::ptr_eq(&first.buffer, &second.buffer));
        assert_eq!(second.buffer.read(4), [5; 4]);
    }

    #[test]
    fn missing_or_empty_upstream_data_is_a_miss() {
        let upstream = LoadedImageCache::new();
        upstream.insert(
            frame(1),
            FrameData {
                description: FrameDescription::packed(0, 0, PixelFormat::Rgba8).unwrap(),
                attributes: Attributes::new(),
                bytes: FrameBytes::default(),
            },
        );

        let mut cache = cache(2);
        assert!(cache.get(&upstream, frame(0)).is_none());
        assert!(cache.get(&upstream, frame(1)).is_none());
        assert!(cache.is_empty());
        assert!(cache.pool().is_empty());
    }

    #[test]
    fn evicted_buffers_are_recycled() {
        let upstream = LoadedImageCache::new();
        for index in 0..4 {
            upstream.insert(frame(index), decoded(index as u8));
        }

        let mut cache = cache(1);
        for index in 0..4 {
            let entry = cache.get(&upstream, frame(index)).unwrap();
            assert_eq!(entry.buffer.read(4), [index as u8; 4]);
        }

        assert_eq!(cache.pool().len(), 1);
    }

    #[test]
    fn buffers_in_use_survive_eviction() {
        let upstream = LoadedImageCache::new();
        upstream.insert(frame(0), decoded(1));
        upstream.insert(frame(1), decoded(2));

        let mut cache = cache(1);
        let in_flight: Arc<HostTransferBuffer> = cache.get(&upstream, frame(0)).unwrap().buffer;
        let next = cache.get(&upstream, frame(1)).unwrap();

        assert!(!Arc::ptr_eq(&in_flight, &next.buffer));
        assert_eq!(in_flight.read(4), [1; 4]);
        assert_eq!(cache.pool().len(), 2);
    }
}
