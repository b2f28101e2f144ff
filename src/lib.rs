// SPDX-License-Identifier: MPL-2.0

//! Frame acquisition for cosmic-frames.
//!
//! Decoders are resolved through an [`imageio::IoRegistry`], driven by the
//! [`imageio::FrameLoader`], and run on worker threads by the
//! [`pipeline::DecodePipeline`]. Decoded frames are promoted into GPU
//! transfer buffers by the [`cache::GpuFrameCache`].

pub mod cache;
pub mod error;
pub mod frame;
pub mod imageio;
pub mod mapped;
pub mod pipeline;

pub use cosmic_frames_config as config;
