// SPDX-License-Identifier: MPL-2.0

//! The contract every decoder plugin implements.
//!
//! A reader goes through `setup`, then at most one pixel retrieval, and is
//! dropped once the loader returns. Failures are returned from the call that
//! caused them rather than stored on the reader.

use std::path::Path;

use crate::error::ReaderError;
use crate::frame::{Attributes, FrameDescription};

/// Capabilities a descriptor may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Readers are created over an in-memory byte range; the caller maps the file.
    ReadFromMemory,
    /// Decodes many formats. Tried after specialized decoders.
    GeneralPurpose,
    /// Instantiated for each frame of a sequence; reads may run in parallel
    /// and out of order.
    FileSequence,
}

/// Header produced by a successful setup.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub description: FrameDescription,
    pub attributes: Attributes,
}

impl FrameHeader {
    #[must_use]
    pub fn new(description: FrameDescription) -> Self {
        Self {
            description,
            attributes: Attributes::new(),
        }
    }
}

/// A reader bound to a single source.
pub trait ImageReader {
    /// Parse the header. Must be called first, and exactly once.
    fn setup(&mut self) -> Result<FrameHeader, ReaderError>;

    /// Pixels already available in memory, typically a sub-range of the mapped
    /// source. When this returns `Some`, `read_image_data_to` must not be called.
    fn mapped_image_data(&self) -> Option<&[u8]> {
        None
    }

    /// Decode pixels into `dest`, sized exactly to the description's `data_size`.
    fn read_image_data_to(&mut self, _dest: &mut [u8]) -> Result<(), ReaderError> {
        Err(ReaderError::Unsupported("read_image_data_to"))
    }
}

/// A registered decoder: capability flags plus reader factories.
pub trait IoDescriptor: Send + Sync {
    fn name(&self) -> &str;

    /// Lower case extensions, without the leading dot.
    fn extensions(&self) -> &[&'static str];

    fn supports(&self, capability: Capability) -> bool;

    fn reader_from_file<'a>(
        &'a self,
        _options: &Attributes,
        _path: &Path,
    ) -> Result<Box<dyn ImageReader + 'a>, ReaderError> {
        Err(ReaderError::Unsupported("reader from file"))
    }

    fn reader_from_memory<'a>(
        &'a self,
        _options: &Attributes,
        _data: &'a [u8],
    ) -> Result<Box<dyn ImageReader + 'a>, ReaderError> {
        Err(ReaderError::Unsupported("reader from memory"))
    }
}

impl std::fmt::Debug for dyn IoDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoDescriptor")
            .field("name", &self.name())
            .field("extensions", &self.extensions())
            .finish()
    }
}
