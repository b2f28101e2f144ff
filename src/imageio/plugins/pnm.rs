// SPDX-License-Identifier: MPL-2.0

//! Binary PGM and PPM (`P5`, `P6`).
//!
//! 8-bit samples are stored uncompressed in the file, so the reader exposes
//! them in place. 16-bit samples are big-endian on disk and are swapped into
//! the caller's buffer.

use crate::error::ReaderError;
use crate::frame::{Attributes, FrameDescription, PixelFormat, keys};
use crate::imageio::descriptor::{Capability, FrameHeader, ImageReader, IoDescriptor};

#[derive(Debug, Default)]
pub struct PnmDescriptor;

impl IoDescriptor for PnmDescriptor {
    fn name(&self) -> &str {
        "pnm"
    }

    fn extensions(&self) -> &[&'static str] {
        &["pgm", "ppm", "pnm"]
    }

    fn supports(&self, capability: Capability) -> bool {
        capability == Capability::ReadFromMemory
    }

    fn reader_from_memory<'a>(
        &'a self,
        _options: &Attributes,
        data: &'a [u8],
    ) -> Result<Box<dyn ImageReader + 'a>, ReaderError> {
        Ok(Box::new(PnmReader { data, pixels: None }))
    }
}

struct PnmReader<'a> {
    data: &'a [u8],
    /// Raster bytes, as found in the file.
    pixels: Option<Raster<'a>>,
}

struct Raster<'a> {
    bytes: &'a [u8],
    wide: bool,
}

impl ImageReader for PnmReader<'_> {
    fn setup(&mut self) -> Result<FrameHeader, ReaderError> {
        let mut header = Header::new(self.data);

        let (channels, magic) = match header.magic()? {
            b"P5" => (1, "P5"),
            b"P6" => (3, "P6"),
            other => {
                return Err(ReaderError::failed(format_args!(
                    "unsupported PNM variant {}",
                    String::from_utf8_lossy(other)
                )));
            }
        };

        let width = header.number()?;
        let height = header.number()?;
        let max_value = header.number()?;
        let offset = header.raster_start()?;

        let (format, wide) = match (channels, max_value) {
            (1, 255) => (PixelFormat::Gray8, false),
            (3, 255) => (PixelFormat::Rgb8, false),
            (1, 65535) => (PixelFormat::Gray16, true),
            (3, 65535) => (PixelFormat::Rgb16, true),
            _ => {
                return Err(ReaderError::failed(format_args!(
                    "unsupported maximum sample value {max_value}"
                )));
            }
        };

        if width == 0 || height == 0 {
            return Err(ReaderError::failed("image has no pixels"));
        }

        let description = FrameDescription::packed(width, height, format).ok_or_else(|| {
            ReaderError::failed(format_args!("{width}x{height} image is too large"))
        })?;
        let bytes = self
            .data
            .get(offset..)
            .and_then(|raster| raster.get(..description.data_size))
            .ok_or_else(|| {
                ReaderError::failed(format_args!(
                    "truncated raster, {} bytes expected",
                    description.data_size
                ))
            })?;

        self.pixels = Some(Raster { bytes, wide });

        let mut header = FrameHeader::new(description);
        header.attributes.set(keys::FORMAT, magic);
        Ok(header)
    }

    fn mapped_image_data(&self) -> Option<&[u8]> {
        self.pixels
            .as_ref()
            .filter(|raster| !raster.wide)
            .map(|raster| raster.bytes)
    }

    fn read_image_data_to(&mut self, dest: &mut [u8]) -> Result<(), ReaderError> {
        let raster = self
            .pixels
            .as_ref()
            .ok_or(ReaderError::Unsupported("read before setup"))?;

        if dest.len() != raster.bytes.len() {
            return Err(ReaderError::failed(format_args!(
                "destination holds {} bytes, {} expected",
                dest.len(),
                raster.bytes.len()
            )));
        }

        if !raster.wide {
            dest.copy_from_slice(raster.bytes);
            return Ok(());
        }

        for (out, sample) in dest.chunks_exact_mut(2).zip(raster.bytes.chunks_exact(2)) {
            let value = u16::from_be_bytes([sample[0], sample[1]]);
            out.copy_from_slice(&value.to_ne_bytes());
        }

        Ok(())
    }
}

/// Cursor over the ASCII header.
struct Header<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Header<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn magic(&mut self) -> Result<&'a [u8], ReaderError> {
        let magic = self
            .data
            .get(..2)
            .ok_or_else(|| ReaderError::failed("missing PNM signature"))?;
        self.pos = 2;
        Ok(magic)
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(&byte) = self.data.get(self.pos) {
            if byte == b'#' {
                while self.data.get(self.pos).is_some_and(|&b| b != b'\n') {
                    self.pos += 1;
                }
            } else if byte.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn number(&mut self) -> Result<u32, ReaderError> {
        self.skip_whitespace_and_comments();

        let start = self.pos;
        while self.data.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }

        std::str::from_utf8(&self.data[start..self.pos])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| ReaderError::failed(format_args!("malformed header at byte {start}")))
    }

    /// A single whitespace byte separates the header from the raster.
    fn raster_start(&self) -> Result<usize, ReaderError> {
        match self.data.get(self.pos) {
            Some(byte) if byte.is_ascii_whitespace() => Ok(self.pos + 1),
            _ => Err(ReaderError::failed("missing raster separator")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(data: &[u8]) -> Result<(FrameHeader, PnmReader<'_>), ReaderError> {
        let mut reader = PnmReader { data, pixels: None };
        reader.setup().map(|header| (header, reader))
    }

    #[test]
    fn gray8_is_mapped_in_place() {
        let data = b"P5\n# comment\n2 2\n255\n\x01\x02\x03\x04";
        let (header, reader) = setup(data).unwrap();

        assert_eq!(header.description.format, PixelFormat::Gray8);
        assert_eq!(header.description.data_size, 4);
        let mapped = reader.mapped_image_data().unwrap();
        assert_eq!(mapped, b"\x01\x02\x03\x04");
        assert_eq!(mapped.as_ptr(), data[data.len() - 4..].as_ptr());
    }

    #[test]
    fn rgb16_is_swapped_to_native() {
        let data = b"P6 1 1 65535\n\x01\x02\x03\x04\x05\x06";
        let (header, mut reader) = setup(data).unwrap();

        assert_eq!(header.description.format, PixelFormat::Rgb16);
        assert!(reader.mapped_image_data().is_none());

        let mut dest = vec![0; header.description.data_size];
        reader.read_image_data_to(&mut dest).unwrap();

        let samples: Vec<u16> = dest
            .chunks_exact(2)
            .map(|c| u16::from_ne_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, [0x0102, 0x0304, 0x0506]);
    }

    #[test]
    fn rejects_ascii_and_truncated_files() {
        assert!(setup(b"P2\n1 1\n255\n7\n").is_err());
        assert!(setup(b"P5\n4 4\n255\n\x00").is_err());
        assert!(setup(b"P5\n1 1\n15\n\x00").is_err());
        assert!(setup(b"P").is_err());
    }

    #[test]
    fn oversized_dimensions_fail_setup() {
        let Err(ReaderError::Failed(message)) = setup(b"P6 4294967295 4294967295 65535\n\x00\x00") else {
            panic!("oversized header was accepted");
        };
        assert_eq!(message, "4294967295x4294967295 image is too large");

        let Err(ReaderError::Failed(message)) = setup(b"P5 65535 65535 255\n\x00") else {
            panic!("truncated raster was accepted");
        };
        assert!(message.starts_with("truncated raster"), "{message}");
    }
}
