// SPDX-License-Identifier: MPL-2.0

//! Animated GIF, one reader per frame.
//!
//! The `frame` option selects the frame to decode. Frames are composited onto
//! the logical screen, honouring each frame's disposal method.

use std::{fs::File, io::BufReader, path::Path};

use ::gif::{ColorOutput, DecodeOptions, DisposalMethod};
use eyre::{OptionExt, eyre};

use crate::error::ReaderError;
use crate::frame::{Attributes, FrameDescription, PixelFormat, keys};
use crate::imageio::descriptor::{Capability, FrameHeader, ImageReader, IoDescriptor};

/// Largest logical screen we composite onto, matching the default memory
/// limit of the `gif` decoder.
const MAX_CANVAS_BYTES: usize = 50_000_000;

#[derive(Debug, Default)]
pub struct GifDescriptor;

impl IoDescriptor for GifDescriptor {
    fn name(&self) -> &str {
        "gif"
    }

    fn extensions(&self) -> &[&'static str] {
        &["gif"]
    }

    fn supports(&self, capability: Capability) -> bool {
        capability == Capability::FileSequence
    }

    fn reader_from_file<'a>(
        &'a self,
        options: &Attributes,
        path: &Path,
    ) -> Result<Box<dyn ImageReader + 'a>, ReaderError> {
        let index = match options.get_int(keys::FRAME) {
            Some(index) => usize::try_from(index).map_err(|_| eyre!("negative frame index {index}"))?,
            None => 0,
        };

        Ok(Box::new(GifReader {
            file: Some(BufReader::new(File::open(path)?)),
            index,
            canvas: Vec::new(),
        }))
    }
}

struct GifReader {
    file: Option<BufReader<File>>,
    index: usize,
    canvas: Vec<u8>,
}

impl ImageReader for GifReader {
    fn setup(&mut self) -> Result<FrameHeader, ReaderError> {
        let file = self.file.take().ok_or_eyre("reader already set up")?;

        let mut options = DecodeOptions::new();
        options.set_color_output(ColorOutput::RGBA);
        let mut decoder = options
            .read_info(file)
            .map_err(|why| eyre!("failed to read GIF header: {why}"))?;

        let description = FrameDescription::packed(
            u32::from(decoder.width()),
            u32::from(decoder.height()),
            PixelFormat::Rgba8,
        )
        .filter(|description| description.data_size <= MAX_CANVAS_BYTES)
        .ok_or_else(|| {
            eyre!(
                "logical screen {}x{} exceeds the {MAX_CANVAS_BYTES} byte limit",
                decoder.width(),
                decoder.height()
            )
        })?;

        let width = usize::from(decoder.width());
        let mut canvas = vec![0u8; description.data_size];
        let mut delay_ms = 0;

        for current in 0..=self.index {
            let frame = decoder
                .read_next_frame()
                .map_err(|why| eyre!("failed to decode frame {current}: {why}"))?
                .ok_or_else(|| eyre!("frame {} out of range, {current} frames", self.index))?;

            let area = Area {
                left: usize::from(frame.left),
                top: usize::from(frame.top),
                width: usize::from(frame.width),
                height: usize::from(frame.height),
            };

            let previous = (frame.dispose == DisposalMethod::Previous).then(|| canvas.clone());
            paint(&mut canvas, width, &area, &frame.buffer);
            delay_ms = u32::from(frame.delay) * 10;

            if current == self.index {
                break;
            }

            match frame.dispose {
                DisposalMethod::Background => clear(&mut canvas, width, &area),
                DisposalMethod::Previous => {
                    if let Some(previous) = previous {
                        canvas = previous;
                    }
                }
                DisposalMethod::Any | DisposalMethod::Keep => (),
            }
        }

        self.canvas = canvas;

        let mut header = FrameHeader::new(description);
        header.attributes.set(keys::FORMAT, "gif");
        header.attributes.set(keys::FRAME, self.index as i64);
        header.attributes.set(keys::DELAY_MS, delay_ms);
        Ok(header)
    }

    fn read_image_data_to(&mut self, dest: &mut [u8]) -> Result<(), ReaderError> {
        if dest.len() != self.canvas.len() {
            return Err(eyre!(
                "destination holds {} bytes, {} expected",
                dest.len(),
                self.canvas.len()
            )
            .into());
        }

        dest.copy_from_slice(&self.canvas);
        Ok(())
    }
}

/// Frame rectangle on the logical screen.
struct Area {
    left: usize,
    top: usize,
    width: usize,
    height: usize,
}

impl Area {
    /// Rows of the area clipped to a screen of `screen_width` columns, as
    /// (row, first column, column count). Areas entirely off screen yield
    /// no rows.
    fn rows(&self, screen_width: usize, screen_height: usize) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        let columns = self.width.min(screen_width.saturating_sub(self.left));
        let rows = if columns == 0 {
            0..0
        } else {
            self.top..(self.top + self.height).min(screen_height)
        };

        rows.map(move |row| (row, self.left, columns))
    }
}

/// Paint RGBA `pixels` over the canvas, leaving transparent pixels untouched.
fn paint(canvas: &mut [u8], screen_width: usize, area: &Area, pixels: &[u8]) {
    let screen_height = canvas.len() / (screen_width * 4).max(1);

    for (row, left, columns) in area.rows(screen_width, screen_height) {
        let source_row = (row - area.top) * area.width * 4;
        let target_row = (row * screen_width + left) * 4;

        for column in 0..columns {
            let Some(pixel) = pixels.get(source_row + column * 4..source_row + column * 4 + 4) else {
                return;
            };

            if pixel[3] != 0 {
                let at = target_row + column * 4;
                canvas[at..at + 4].copy_from_slice(pixel);
            }
        }
    }
}

fn clear(canvas: &mut [u8], screen_width: usize, area: &Area) {
    let screen_height = canvas.len() / (screen_width * 4).max(1);

    for (row, left, columns) in area.rows(screen_width, screen_height) {
        let start = (row * screen_width + left) * 4;
        canvas[start..start + columns * 4].fill(0);
    }
}
