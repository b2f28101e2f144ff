// SPDX-License-Identifier: MPL-2.0

//! Frame descriptions, metadata, and shared pixel storage.

use std::{collections::BTreeMap, fmt, ops::Range, sync::Arc};

use drm_fourcc::DrmFourcc;

/// Well-known attribute keys.
pub mod keys {
    /// Source file of a frame.
    pub const FILE: &str = "file";
    /// Frame index to read from a multi-frame source.
    pub const FRAME: &str = "frame";
    /// Name of the container format, as reported by the decoder.
    pub const FORMAT: &str = "format";
    /// Name of the decoder that produced a frame.
    pub const DECODER: &str = "decoder";
    pub const COLOR_SPACE: &str = "color_space";
    /// Display duration of a frame in milliseconds.
    pub const DELAY_MS: &str = "delay_ms";
}

/// Sample layout of decoded pixels. Samples are tightly packed, in native byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Gray8,
    GrayAlpha8,
    Rgb8,
    Rgba8,
    Gray16,
    GrayAlpha16,
    Rgb16,
    Rgba16,
    Rgb32F,
    Rgba32F,
}

impl PixelFormat {
    #[must_use]
    pub fn channels(self) -> usize {
        match self {
            Self::Gray8 | Self::Gray16 => 1,
            Self::GrayAlpha8 | Self::GrayAlpha16 => 2,
            Self::Rgb8 | Self::Rgb16 | Self::Rgb32F => 3,
            Self::Rgba8 | Self::Rgba16 | Self::Rgba32F => 4,
        }
    }

    #[must_use]
    pub fn bytes_per_channel(self) -> usize {
        match self {
            Self::Gray8 | Self::GrayAlpha8 | Self::Rgb8 | Self::Rgba8 => 1,
            Self::Gray16 | Self::GrayAlpha16 | Self::Rgb16 | Self::Rgba16 => 2,
            Self::Rgb32F | Self::Rgba32F => 4,
        }
    }

    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        self.channels() * self.bytes_per_channel()
    }

    #[must_use]
    pub fn has_alpha(self) -> bool {
        matches!(self.channels(), 2 | 4)
    }

    /// DRM format matching the in-memory byte order, for formats a GPU can sample directly.
    #[must_use]
    pub fn fourcc(self) -> Option<DrmFourcc> {
        // DRM codes describe little-endian packed words, so R,G,B bytes in
        // memory are BGR888 and R,G,B,A bytes are ABGR8888.
        match self {
            Self::Gray8 => Some(DrmFourcc::R8),
            Self::GrayAlpha8 => Some(DrmFourcc::Gr88),
            Self::Rgb8 => Some(DrmFourcc::Bgr888),
            Self::Rgba8 => Some(DrmFourcc::Abgr8888),
            _ => None,
        }
    }
}

/// Header of a decoded frame. Immutable once produced by a reader's setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameDescription {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Size in bytes of the pixel data.
    pub data_size: usize,
}

impl FrameDescription {
    /// Describe a frame whose rows carry no padding. `None` when the pixel
    /// data would not fit in memory.
    #[must_use]
    pub fn packed(width: u32, height: u32, format: PixelFormat) -> Option<Self> {
        let data_size = usize::try_from(width)
            .ok()?
            .checked_mul(usize::try_from(height).ok()?)?
            .checked_mul(format.bytes_per_pixel())?;

        Some(Self {
            width,
            height,
            format,
            data_size,
        })
    }

    #[must_use]
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }
}

/// A single metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Open-ended string-keyed metadata, such as color space or timecode.
///
/// Also used for the read-only options handed to readers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            AttributeValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Copy every entry of `other` into `self`, overwriting existing keys.
    pub fn extend(&mut self, other: Attributes) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cheaply clonable view into pixel bytes.
///
/// The backing storage is either a buffer owned by the frame, or a larger
/// allocation such as a mapped file whose sub-range already holds the
/// uncompressed pixels.
#[derive(Clone)]
pub struct FrameBytes {
    backing: Arc<dyn AsRef<[u8]> + Send + Sync>,
    range: Range<usize>,
}

impl FrameBytes {
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        let range = 0..data.len();
        Self {
            backing: Arc::new(data),
            range,
        }
    }

    /// View `range` of `backing` without copying.
    ///
    /// Returns `None` if the range does not fit in the backing storage.
    pub fn slice_of(backing: Arc<dyn AsRef<[u8]> + Send + Sync>, range: Range<usize>) -> Option<Self> {
        let len = (*backing).as_ref().len();
        if range.start > range.end || range.end > len {
            return None;
        }
        Some(Self { backing, range })
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &(*self.backing).as_ref()[self.range.clone()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Whether these bytes share storage with a larger allocation.
    #[must_use]
    pub fn is_borrowed_view(&self) -> bool {
        (*self.backing).as_ref().len() != self.range.len()
    }
}

impl Default for FrameBytes {
    fn default() -> Self {
        Self::from_vec(Vec::new())
    }
}

impl fmt::Debug for FrameBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameBytes({} bytes @ {:?})", self.len(), self.range)
    }
}

/// A decoded frame held in CPU memory.
#[derive(Debug, Clone)]
pub struct FrameData {
    pub description: FrameDescription,
    pub attributes: Attributes,
    pub bytes: FrameBytes,
}

/// Identifies a frame of a media for the lifetime of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaFrameReference {
    pub media: u64,
    pub frame: u64,
}

impl MediaFrameReference {
    #[must_use]
    pub const fn new(media: u64, frame: u64) -> Self {
        Self { media, frame }
    }
}
