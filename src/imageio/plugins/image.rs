// SPDX-License-Identifier: MPL-2.0

//! General purpose decoder backed by the `image` crate.

use std::io::Cursor;

use ::image::{ColorType, ImageDecoder};

use crate::error::ReaderError;
use crate::frame::{Attributes, FrameDescription, PixelFormat, keys};
use crate::imageio::descriptor::{Capability, FrameHeader, ImageReader, IoDescriptor};

#[derive(Debug, Default)]
pub struct ImageRsDescriptor;

impl IoDescriptor for ImageRsDescriptor {
    fn name(&self) -> &str {
        "image"
    }

    fn extensions(&self) -> &[&'static str] {
        &[
            "bmp", "hdr", "jpeg", "jpg", "pbm", "pam", "pgm", "png", "pnm", "ppm", "tga",
            "tif", "tiff", "webp",
        ]
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::ReadFromMemory | Capability::GeneralPurpose
        )
    }

    fn reader_from_memory<'a>(
        &'a self,
        _options: &Attributes,
        data: &'a [u8],
    ) -> Result<Box<dyn ImageReader + 'a>, ReaderError> {
        Ok(Box::new(ImageRsReader {
            data,
            decoder: None,
        }))
    }
}

struct ImageRsReader<'a> {
    data: &'a [u8],
    decoder: Option<Box<dyn ImageDecoder + 'a>>,
}

impl ImageReader for ImageRsReader<'_> {
    fn setup(&mut self) -> Result<FrameHeader, ReaderError> {
        let reader = ::image::ImageReader::new(Cursor::new(self.data))
            .with_guessed_format()
            .map_err(ReaderError::from)?;

        let format = reader
            .format()
            .ok_or_else(|| ReaderError::failed("unrecognized image format"))?;

        let decoder = reader.into_decoder().map_err(ReaderError::failed)?;

        let (width, height) = decoder.dimensions();
        let pixel_format = pixel_format(decoder.color_type())?;
        let description = FrameDescription::packed(width, height, pixel_format).ok_or_else(|| {
            ReaderError::failed(format_args!("{width}x{height} image is too large"))
        })?;

        if description.data_size as u64 != decoder.total_bytes() {
            return Err(ReaderError::failed(format_args!(
                "decoder reports {} bytes for a {width}x{height} {pixel_format:?} image",
                decoder.total_bytes()
            )));
        }

        self.decoder = Some(Box::new(decoder));

        let mut header = FrameHeader::new(description);
        if let Some(name) = format.extensions_str().first() {
            header.attributes.set(keys::FORMAT, *name);
        }
        Ok(header)
    }

    fn read_image_data_to(&mut self, dest: &mut [u8]) -> Result<(), ReaderError> {
        let decoder = self
            .decoder
            .take()
            .ok_or(ReaderError::Unsupported("read before setup"))?;

        decoder.read_image_boxed(dest).map_err(ReaderError::failed)
    }
}

fn pixel_format(color: ColorType) -> Result<PixelFormat, ReaderError> {
    Ok(match color {
        ColorType::L8 => PixelFormat::Gray8,
        ColorType::La8 => PixelFormat::GrayAlpha8,
        ColorType::Rgb8 => PixelFormat::Rgb8,
        ColorType::Rgba8 => PixelFormat::Rgba8,
        ColorType::L16 => PixelFormat::Gray16,
        ColorType::La16 => PixelFormat::GrayAlpha16,
        ColorType::Rgb16 => PixelFormat::Rgb16,
        ColorType::Rgba16 => PixelFormat::Rgba16,
        ColorType::Rgb32F => PixelFormat::Rgb32F,
        ColorType::Rgba32F => PixelFormat::Rgba32F,
        other => {
            return Err(ReaderError::failed(format_args!(
                "unsupported color type {other:?}"
            )));
        }
    })
}
