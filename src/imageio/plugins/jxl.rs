// SPDX-License-Identifier: MPL-2.0

//! JPEG XL, rendered to 8-bit sRGB through `jxl-oxide`.

use std::path::Path;

use eyre::eyre;
use jxl_oxide::{EnumColourEncoding, JxlImage, PixelFormat as JxlPixelFormat, RenderingIntent};
use rayon::prelude::*;

use crate::error::ReaderError;
use crate::frame::{Attributes, FrameDescription, PixelFormat, keys};
use crate::imageio::descriptor::{Capability, FrameHeader, ImageReader, IoDescriptor};

#[derive(Debug, Default)]
pub struct JxlDescriptor;

impl IoDescriptor for JxlDescriptor {
    fn name(&self) -> &str {
        "jxl"
    }

    fn extensions(&self) -> &[&'static str] {
        &["jxl"]
    }

    fn supports(&self, _capability: Capability) -> bool {
        false
    }

    fn reader_from_file<'a>(
        &'a self,
        _options: &Attributes,
        path: &Path,
    ) -> Result<Box<dyn ImageReader + 'a>, ReaderError> {
        let image = JxlImage::builder()
            .open(path)
            .map_err(|why| eyre!("failed to read image header: {why}"))?;

        Ok(Box::new(JxlReader { image }))
    }
}

struct JxlReader {
    image: JxlImage,
}

impl ImageReader for JxlReader {
    fn setup(&mut self) -> Result<FrameHeader, ReaderError> {
        self.image
            .request_color_encoding(EnumColourEncoding::srgb(RenderingIntent::Relative));

        let format = match self.image.pixel_format() {
            JxlPixelFormat::Gray => PixelFormat::Gray8,
            JxlPixelFormat::Graya => PixelFormat::GrayAlpha8,
            JxlPixelFormat::Rgb => PixelFormat::Rgb8,
            JxlPixelFormat::Rgba => PixelFormat::Rgba8,
            //TODO: convert CMYK to RGB.
            JxlPixelFormat::Cmyk => return Err(eyre!("unsupported pixel format: CMYK").into()),
            JxlPixelFormat::Cmyka => return Err(eyre!("unsupported pixel format: CMYKA").into()),
        };

        let (width, height) = (self.image.width(), self.image.height());
        let description = FrameDescription::packed(width, height, format)
            .ok_or_else(|| eyre!("{width}x{height} image is too large"))?;

        let mut header = FrameHeader::new(description);
        header.attributes.set(keys::FORMAT, "jxl");
        header.attributes.set(keys::COLOR_SPACE, "srgb");
        Ok(header)
    }

    fn read_image_data_to(&mut self, dest: &mut [u8]) -> Result<(), ReaderError> {
        let render = self
            .image
            .render_frame(0)
            .map_err(|why| eyre!("failed to render image frame: {why}"))?;

        let framebuffer = render.image_all_channels();
        let samples = framebuffer.buf();

        if samples.len() != dest.len() {
            return Err(eyre!(
                "rendered {} samples, {} expected",
                samples.len(),
                dest.len()
            )
            .into());
        }

        dest.par_iter_mut()
            .zip(samples.par_iter())
            .for_each(|(out, sample)| *out = (sample * 255. + 0.5) as u8);

        Ok(())
    }
}
