// SPDX-License-Identifier: MPL-2.0

//! Frame load orchestration.

use std::{ffi::OsStr, path::Path, sync::Arc};

use cosmic_frames_config::ReadStrategy;
use tracing::{debug, warn};

use super::descriptor::{Capability, FrameHeader, ImageReader, IoDescriptor};
use super::registry::IoRegistry;
use crate::error::{CandidateError, LoadError};
use crate::frame::{Attributes, FrameBytes, FrameData, FrameDescription, keys};
use crate::mapped::FileBytes;

/// Extension of `path`, if it has a non-empty UTF-8 one.
#[must_use]
pub fn extension(path: &Path) -> Option<&str> {
    path.extension()
        .and_then(OsStr::to_str)
        .filter(|ext| !ext.is_empty())
}

/// Pixels handed to a load callback.
#[derive(Debug, Clone, Copy)]
pub enum Pixels<'a> {
    /// Owned by the source. Only valid for the duration of the callback.
    Mapped(&'a [u8]),
    /// The buffer kept by the [`LoadResult`].
    Owned(&'a [u8]),
}

impl<'a> Pixels<'a> {
    #[must_use]
    pub fn as_slice(&self) -> &'a [u8] {
        match *self {
            Self::Mapped(data) | Self::Owned(data) => data,
        }
    }
}

/// Outcome of a successful load.
#[derive(Debug)]
pub struct LoadResult {
    /// Name of the decoder that produced the frame.
    pub decoder: String,
    pub description: FrameDescription,
    pub attributes: Attributes,
    owned: Option<Vec<u8>>,
}

impl LoadResult {
    /// Whether the pixels were mapped by the reader rather than copied into
    /// a buffer held by this result.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.owned.is_none()
    }

    #[must_use]
    pub fn owned_data(&self) -> Option<&[u8]> {
        self.owned.as_deref()
    }

    #[must_use]
    pub fn into_owned_data(self) -> Option<Vec<u8>> {
        self.owned
    }
}

/// Resolves decoders for a file and drives them until one succeeds.
#[derive(Debug, Clone)]
pub struct FrameLoader {
    registry: Arc<IoRegistry>,
    strategy: ReadStrategy,
}

impl FrameLoader {
    #[must_use]
    pub fn new(registry: Arc<IoRegistry>) -> Self {
        Self {
            registry,
            strategy: ReadStrategy::default(),
        }
    }

    /// How files are brought into memory for in-memory decoders.
    #[must_use]
    pub fn with_strategy(mut self, strategy: ReadStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<IoRegistry> {
        &self.registry
    }

    /// Load the frame stored at `path`.
    ///
    /// `callback` receives the decoded pixels once, on success. When the
    /// reader exposed mapped data, the slice is only valid during the call and
    /// the result holds no buffer; otherwise the result keeps the buffer the
    /// callback saw.
    pub fn load(
        &self,
        path: &Path,
        options: &Attributes,
        mut callback: impl FnMut(&FrameDescription, &[u8]),
    ) -> Result<LoadResult, LoadError> {
        self.load_with(path, None, options, |description, pixels| {
            callback(description, pixels.as_slice());
        })
        .map(|(result, ())| result)
    }

    /// Load `path` into a self-contained [`FrameData`], copying mapped pixels.
    pub fn load_to_bytes(&self, path: &Path, options: &Attributes) -> Result<FrameData, LoadError> {
        let (result, copied) = self.load_with(path, None, options, |_, pixels| match pixels {
            Pixels::Mapped(data) => Some(data.to_vec()),
            Pixels::Owned(_) => None,
        })?;

        let LoadResult {
            description,
            attributes,
            owned,
            ..
        } = result;

        Ok(FrameData {
            description,
            attributes,
            bytes: FrameBytes::from_vec(owned.or(copied).unwrap_or_default()),
        })
    }

    /// Load `path`, decoding from `preloaded` bytes when the caller already
    /// holds the file contents.
    pub(crate) fn load_with<T>(
        &self,
        path: &Path,
        preloaded: Option<&[u8]>,
        options: &Attributes,
        mut sink: impl FnMut(&FrameDescription, Pixels<'_>) -> T,
    ) -> Result<(LoadResult, T), LoadError> {
        let Some(ext) = extension(path) else {
            return Err(LoadError::NoExtension {
                path: path.to_path_buf(),
            });
        };

        let candidates = self.registry.find_candidates(ext);
        if candidates.is_empty() {
            return Err(LoadError::NoDecoderAvailable {
                extension: ext.to_owned(),
            });
        }

        // Shared between in-memory candidates so the file is read at most once.
        let mut source: Option<FileBytes> = None;
        let mut last_error = None;

        for descriptor in candidates {
            match self.try_candidate(descriptor.as_ref(), path, preloaded, &mut source, options, &mut sink) {
                Ok((mut result, value)) => {
                    result
                        .attributes
                        .set(keys::FILE, path.to_string_lossy().into_owned());
                    return Ok((result, value));
                }
                Err(why) => {
                    debug!(path = %path.display(), decoder = descriptor.name(), %why, "decoder failed");
                    last_error = Some(why);
                }
            }
        }

        let last_error = last_error.map(|why| why.to_string()).unwrap_or_default();
        warn!(path = %path.display(), attempts = candidates.len(), last_error, "no reader succeeded");

        Err(LoadError::NoReaderSucceeded {
            attempts: candidates.len(),
            last_error,
        })
    }

    fn try_candidate<T>(
        &self,
        descriptor: &dyn IoDescriptor,
        path: &Path,
        preloaded: Option<&[u8]>,
        source: &mut Option<FileBytes>,
        options: &Attributes,
        sink: &mut impl FnMut(&FrameDescription, Pixels<'_>) -> T,
    ) -> Result<(LoadResult, T), CandidateError> {
        let name = descriptor.name();

        let reader = if descriptor.supports(Capability::ReadFromMemory) {
            let data = match preloaded {
                Some(data) => data,
                None => {
                    let bytes = match source.take() {
                        Some(bytes) => bytes,
                        None => FileBytes::read(path, self.strategy).map_err(|source| {
                            CandidateError::MappingFailed {
                                decoder: name.to_owned(),
                                source,
                            }
                        })?,
                    };
                    let bytes: &FileBytes = source.insert(bytes);
                    bytes.as_ref()
                }
            };
            descriptor.reader_from_memory(options, data)
        } else {
            descriptor.reader_from_file(options, path)
        };

        let reader = reader.map_err(|why| CandidateError::setup(name, why))?;
        drive(name, reader, sink)
    }
}

/// Run one reader through its lifecycle and hand its pixels to `sink`.
fn drive<T>(
    decoder: &str,
    mut reader: Box<dyn ImageReader + '_>,
    sink: &mut impl FnMut(&FrameDescription, Pixels<'_>) -> T,
) -> Result<(LoadResult, T), CandidateError> {
    let FrameHeader {
        description,
        mut attributes,
    } = reader
        .setup()
        .map_err(|why| CandidateError::setup(decoder, why))?;

    attributes.set(keys::DECODER, decoder);

    if let Some(data) = reader.mapped_image_data() {
        let Some(data) = data.get(..description.data_size) else {
            return Err(CandidateError::ReadFailed {
                decoder: decoder.to_owned(),
                message: format!(
                    "mapped data holds {} bytes, {} expected",
                    data.len(),
                    description.data_size
                ),
            });
        };

        let value = sink(&description, Pixels::Mapped(data));
        let result = LoadResult {
            decoder: decoder.to_owned(),
            description,
            attributes,
            owned: None,
        };
        return Ok((result, value));
    }

    let mut buffer = vec![0; description.data_size];
    reader
        .read_image_data_to(&mut buffer)
        .map_err(|why| CandidateError::read(decoder, why))?;

    let value = sink(&description, Pixels::Owned(&buffer));
    let result = LoadResult {
        decoder: decoder.to_owned(),
        description,
        attributes,
        owned: Some(buffer),
    };
    Ok((result, value))
}
