// SPDX-License-Identifier: MPL-2.0

//! Frame caches.
//!
//! Decoded frames land in a CPU-side [`LoadedImageCache`]. The
//! [`GpuFrameCache`] promotes them on demand into transfer buffers drawn
//! from a [`TransferPool`], keeping the most recently used frames resident.

pub mod gpu;
pub mod image_cache;
pub mod transfer;

pub use gpu::{GpuFrame, GpuFrameCache};
pub use image_cache::{DecodedFrameSource, LoadedImageCache};
pub use transfer::{BufferAllocator, HostAllocator, HostTransferBuffer, TransferBuffer, TransferPool};
