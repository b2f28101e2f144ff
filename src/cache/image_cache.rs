// SPDX-License-Identifier: MPL-2.0

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::frame::{FrameData, MediaFrameReference};

/// CPU-side storage of decoded frames, read by the GPU frame cache.
pub trait DecodedFrameSource {
    /// The decoded frame for `frame`, if present. Cloning a [`FrameData`]
    /// shares its pixel storage.
    fn get(&self, frame: &MediaFrameReference) -> Option<FrameData>;
}

/// Thread-safe map of decoded frames.
#[derive(Debug, Default)]
pub struct LoadedImageCache {
    frames: Mutex<HashMap<MediaFrameReference, FrameData>>,
}

impl LoadedImageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn frames(&self) -> MutexGuard<'_, HashMap<MediaFrameReference, FrameData>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `data`, returning the frame it replaces.
    pub fn insert(&self, frame: MediaFrameReference, data: FrameData) -> Option<FrameData> {
        self.frames().insert(frame, data)
    }

    pub fn remove(&self, frame: &MediaFrameReference) -> Option<FrameData> {
        self.frames().remove(frame)
    }

    #[must_use]
    pub fn contains(&self, frame: &MediaFrameReference) -> bool {
        self.frames().contains_key(frame)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DecodedFrameSource for LoadedImageCache {
    fn get(&self, frame: &MediaFrameReference) -> Option<FrameData> {
        self.frames().get(frame).cloned()
    }
}
