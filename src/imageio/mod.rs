// SPDX-License-Identifier: MPL-2.0

//! Pluggable image decoding.
//!
//! Decoders are described by an [`IoDescriptor`], registered once in an
//! [`IoRegistry`] at startup, and driven through the reader lifecycle by the
//! [`FrameLoader`]:
//!
//! ```text
//! filename ─▶ extension ─▶ registry candidates ─▶ for each candidate:
//!                                                   map file (in-memory decoders)
//!                                                   create reader
//!                                                   setup ──fail──▶ next candidate
//!                                                   mapped data? ─▶ callback(mapped)
//!                                                   else read into owned buffer ─▶ callback(owned)
//! ```
//!
//! # Module Structure
//!
//! - [`descriptor`]: Reader lifecycle contract and capability flags
//! - [`registry`]: Extension to decoder resolution
//! - [`load`]: Candidate iteration and frame materialization
//! - [`plugins`]: Built-in decoders
//!
//! # Built-in Decoders (Highest to Lowest Priority)
//!
//! | Decoder | Extensions | Construction | Pixel path |
//! |---------|------------|--------------|------------|
//! | `pnm`   | `pgm`, `ppm`, `pnm` | in-memory | mapped (8-bit), owned (16-bit) |
//! | `jxl`   | `jxl`      | file         | owned |
//! | `gif`   | `gif`      | file, per-frame | owned |
//! | `image` | most raster formats | in-memory, general purpose | owned |

pub mod descriptor;
pub mod load;
pub mod plugins;
pub mod registry;

pub use descriptor::{Capability, FrameHeader, ImageReader, IoDescriptor};
pub use load::{FrameLoader, LoadResult, Pixels, extension};
pub use registry::IoRegistry;

#[cfg(test)]
mod tests;
