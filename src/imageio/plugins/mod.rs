// SPDX-License-Identifier: MPL-2.0

//! Decoders shipped with the crate.

#[cfg(feature = "animated")]
pub mod gif;
pub mod image;
pub mod jxl;
pub mod pnm;

use super::registry::IoRegistry;

/// Register every built-in decoder.
pub fn register_builtin(registry: &mut IoRegistry) {
    registry.register(image::ImageRsDescriptor);
    registry.register(pnm::PnmDescriptor);
    registry.register(jxl::JxlDescriptor);
    #[cfg(feature = "animated")]
    registry.register(gif::GifDescriptor);
}
