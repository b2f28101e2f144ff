// SPDX-License-Identifier: MPL-2.0

//! Tests for decoder resolution and frame loading.

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::{Path, PathBuf},
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use super::super::{
        Capability, FrameHeader, FrameLoader, ImageReader, IoDescriptor, IoRegistry, Pixels,
        extension,
    };
    use crate::error::{LoadError, ReaderError};
    use crate::frame::{Attributes, FrameDescription, PixelFormat, keys};

    enum Behaviour {
        FailSetup(&'static str),
        Mapped(Vec<u8>),
        Owned(Vec<u8>),
        /// Reports more bytes than it maps.
        ShortMapping,
        /// Parses a header but cannot produce pixels.
        HeaderOnly,
    }

    struct Mock {
        name: &'static str,
        extensions: &'static [&'static str],
        general: bool,
        in_memory: bool,
        behaviour: Behaviour,
        attempts: Arc<AtomicUsize>,
    }

    impl Mock {
        fn new(name: &'static str, behaviour: Behaviour) -> Self {
            Self {
                name,
                extensions: &["img"],
                general: false,
                in_memory: false,
                behaviour,
                attempts: Arc::default(),
            }
        }

        fn general(mut self) -> Self {
            self.general = true;
            self
        }

        fn in_memory(mut self) -> Self {
            self.in_memory = true;
            self
        }

        fn counted(mut self, attempts: &Arc<AtomicUsize>) -> Self {
            self.attempts = Arc::clone(attempts);
            self
        }
    }

    impl IoDescriptor for Mock {
        fn name(&self) -> &str {
            self.name
        }

        fn extensions(&self) -> &[&'static str] {
            self.extensions
        }

        fn supports(&self, capability: Capability) -> bool {
            match capability {
                Capability::GeneralPurpose => self.general,
                Capability::ReadFromMemory => self.in_memory,
                Capability::FileSequence => false,
            }
        }

        fn reader_from_file<'a>(
            &'a self,
            _options: &Attributes,
            _path: &Path,
        ) -> Result<Box<dyn ImageReader + 'a>, ReaderError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockReader(&self.behaviour)))
        }

        fn reader_from_memory<'a>(
            &'a self,
            _options: &Attributes,
            _data: &'a [u8],
        ) -> Result<Box<dyn ImageReader + 'a>, ReaderError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockReader(&self.behaviour)))
        }
    }

    struct MockReader<'a>(&'a Behaviour);

    impl ImageReader for MockReader<'_> {
        fn setup(&mut self) -> Result<FrameHeader, ReaderError> {
            let len = match self.0 {
                Behaviour::FailSetup(message) => return Err(ReaderError::failed(message)),
                Behaviour::Mapped(data) | Behaviour::Owned(data) => data.len(),
                Behaviour::ShortMapping | Behaviour::HeaderOnly => 16,
            };
            Ok(FrameHeader::new(
                FrameDescription::packed(len as u32, 1, PixelFormat::Gray8).unwrap(),
            ))
        }

        fn mapped_image_data(&self) -> Option<&[u8]> {
            match self.0 {
                Behaviour::Mapped(data) => Some(data),
                Behaviour::ShortMapping => Some(&[0; 4]),
                _ => None,
            }
        }

        fn read_image_data_to(&mut self, dest: &mut [u8]) -> Result<(), ReaderError> {
            match self.0 {
                Behaviour::Owned(data) => {
                    dest.copy_from_slice(data);
                    Ok(())
                }
                _ => Err(ReaderError::Unsupported("read_image_data_to")),
            }
        }
    }

    fn loader(descriptors: impl IntoIterator<Item = Mock>) -> FrameLoader {
        let mut registry = IoRegistry::new();
        for descriptor in descriptors {
            registry.register(descriptor);
        }
        FrameLoader::new(Arc::new(registry))
    }

    fn builtin() -> FrameLoader {
        FrameLoader::new(Arc::new(IoRegistry::with_builtin()))
    }

    fn write(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension(Path::new("a/b.PNG")), Some("PNG"));
        assert_eq!(extension(Path::new("archive.tar.gz")), Some("gz"));
        assert_eq!(extension(Path::new("README")), None);
        assert_eq!(extension(Path::new(".hidden")), None);
        assert_eq!(extension(Path::new("trailing.")), None);
    }

    #[test]
    fn test_builtin_priority() {
        let registry = IoRegistry::with_builtin();

        let names = |ext: &str| {
            registry
                .find_candidates(ext)
                .iter()
                .map(|d| d.name().to_owned())
                .collect::<Vec<_>>()
        };

        assert_eq!(names("pgm"), ["pnm", "image"]);
        assert_eq!(names("png"), ["image"]);
        assert_eq!(names("jxl"), ["jxl"]);
        #[cfg(feature = "animated")]
        assert_eq!(names("GIF"), ["gif"]);
    }

    #[test]
    fn test_specialized_strictly_before_general_for_every_extension() {
        let registry = IoRegistry::with_builtin();

        for ext in registry.extensions() {
            let candidates = registry.find_candidates(ext);
            let first_general = candidates
                .iter()
                .position(|d| d.supports(Capability::GeneralPurpose))
                .unwrap_or(candidates.len());

            assert!(
                candidates[first_general..]
                    .iter()
                    .all(|d| d.supports(Capability::GeneralPurpose)),
                "specialized decoder after a general purpose one for {ext}"
            );
        }
    }

    #[test]
    fn test_is_supported_matches_candidates_for_any_case() {
        let registry = IoRegistry::with_builtin();
        let extensions: Vec<String> = registry.extensions().map(str::to_owned).collect();

        for ext in extensions.iter().map(String::as_str).chain(["xyz", "", "P N G"]) {
            for variant in [ext.to_owned(), ext.to_uppercase(), capitalize(ext)] {
                assert_eq!(
                    registry.is_supported(&variant),
                    !registry.find_candidates(&variant).is_empty(),
                    "{variant}"
                );
            }
        }

        assert!(registry.is_supported("Png"));
        assert!(!registry.is_supported("xyz"));
    }

    fn capitalize(s: &str) -> String {
        let mut chars = s.chars();
        chars
            .next()
            .map(|first| first.to_uppercase().chain(chars).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_no_extension() {
        let err = builtin()
            .load(Path::new("/tmp/noext"), &Attributes::new(), |_, _| ())
            .unwrap_err();
        assert!(matches!(err, LoadError::NoExtension { .. }));
    }

    #[test]
    fn test_no_decoder_available() {
        let err = builtin()
            .load(Path::new("clip.xyz"), &Attributes::new(), |_, _| ())
            .unwrap_err();
        assert!(matches!(err, LoadError::NoDecoderAvailable { extension } if extension == "xyz"));
    }

    #[test]
    fn test_every_candidate_tried_before_giving_up() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let loader = loader([
            Mock::new("a", Behaviour::FailSetup("first failure")).counted(&attempts),
            Mock::new("b", Behaviour::FailSetup("second failure"))
                .general()
                .counted(&attempts),
            Mock::new("c", Behaviour::FailSetup("third failure")).counted(&attempts),
        ]);

        let mut called = false;
        let err = loader
            .load(Path::new("frame.img"), &Attributes::new(), |_, _| called = true)
            .unwrap_err();

        assert!(!called);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        // "b" is general purpose, so it is attempted last.
        match err {
            LoadError::NoReaderSucceeded {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "b: second failure");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_failed_setup_falls_back_to_next_candidate() {
        let loader = loader([
            Mock::new("fallback", Behaviour::Owned(vec![7; 3])).general(),
            Mock::new("broken", Behaviour::FailSetup("bad header")),
        ]);

        let result = loader
            .load(Path::new("frame.img"), &Attributes::new(), |_, _| ())
            .unwrap();

        assert_eq!(result.decoder, "fallback");
        assert_eq!(result.attributes.get_text(keys::DECODER), Some("fallback"));
    }

    #[test]
    fn test_mapped_data_is_not_copied() {
        let loader = loader([Mock::new("mapped", Behaviour::Mapped(vec![1, 2, 3, 4]))]);

        let mut seen = Vec::new();
        let result = loader
            .load(Path::new("frame.img"), &Attributes::new(), |description, data| {
                assert_eq!(description.data_size, 4);
                seen.extend_from_slice(data);
            })
            .unwrap();

        assert_eq!(seen, [1, 2, 3, 4]);
        assert!(result.is_mapped());
        assert!(result.owned_data().is_none());
    }

    #[test]
    fn test_owned_buffer_matches_description() {
        let loader = loader([Mock::new("owned", Behaviour::Owned(vec![5; 10]))]);

        let (result, kind) = loader
            .load_with(Path::new("frame.img"), None, &Attributes::new(), |_, pixels| {
                matches!(pixels, Pixels::Owned(_))
            })
            .unwrap();

        assert!(kind);
        assert!(!result.is_mapped());
        assert_eq!(result.owned_data().map(<[u8]>::len), Some(result.description.data_size));
        assert_eq!(result.into_owned_data(), Some(vec![5; 10]));
    }

    #[test]
    fn test_short_mapping_is_rejected() {
        let loader = loader([Mock::new("short", Behaviour::ShortMapping)]);

        let err = loader
            .load(Path::new("frame.img"), &Attributes::new(), |_, _| ())
            .unwrap_err();

        assert!(matches!(err, LoadError::NoReaderSucceeded { attempts: 1, .. }));
    }

    #[test]
    fn test_mapping_failure_moves_to_next_candidate() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let loader = loader([
            Mock::new("memory", Behaviour::Owned(vec![1]))
                .in_memory()
                .counted(&attempts),
            Mock::new("file", Behaviour::Owned(vec![2])).general(),
        ]);

        let result = loader
            .load(Path::new("/nonexistent/frame.img"), &Attributes::new(), |_, _| ())
            .unwrap();

        assert_eq!(result.decoder, "file");
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_in_memory_decoder_reads_existing_file() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let loader = loader([
            Mock::new("first", Behaviour::FailSetup("nope"))
                .in_memory()
                .counted(&attempts),
            Mock::new("second", Behaviour::Owned(vec![1]))
                .in_memory()
                .counted(&attempts),
        ]);

        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "frame.img", b"x");

        let result = loader.load(&path, &Attributes::new(), |_, _| ()).unwrap();
        assert_eq!(result.decoder, "second");
        assert_eq!(result.owned_data(), Some(&[1][..]));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsupported_operation_is_reported() {
        let loader = loader([Mock::new("headers-only", Behaviour::HeaderOnly)]);

        let err = loader
            .load(Path::new("frame.img"), &Attributes::new(), |_, _| ())
            .unwrap_err();

        match err {
            LoadError::NoReaderSucceeded { last_error, .. } => {
                assert_eq!(last_error, "headers-only: unsupported read_image_data_to");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_pnm_8bit_is_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "gray.PGM", b"P5\n3 1\n255\n\x0a\x0b\x0c");

        let mut seen = Vec::new();
        let result = builtin()
            .load(&path, &Attributes::new(), |description, data| {
                assert_eq!(description.format, PixelFormat::Gray8);
                seen.extend_from_slice(data);
            })
            .unwrap();

        assert_eq!(result.decoder, "pnm");
        assert!(result.is_mapped());
        assert_eq!(result.attributes.get_text(keys::FILE), path.to_str());
        assert_eq!(seen, [0x0a, 0x0b, 0x0c]);
    }

    #[test]
    fn test_pnm_16bit_is_owned() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "deep.pgm", b"P5 2 1 65535\n\x12\x34\xab\xcd");

        let frame = builtin().load_to_bytes(&path, &Attributes::new()).unwrap();

        assert_eq!(frame.description.format, PixelFormat::Gray16);
        assert_eq!(frame.attributes.get_text(keys::DECODER), Some("pnm"));
        let samples: Vec<u16> = frame
            .bytes
            .as_slice()
            .chunks_exact(2)
            .map(|c| u16::from_ne_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, [0x1234, 0xabcd]);
    }

    #[test]
    fn test_ascii_pnm_falls_back_to_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "ascii.pgm", b"P2\n2 1\n255\n7 9\n");

        let frame = builtin().load_to_bytes(&path, &Attributes::new()).unwrap();

        assert_eq!(frame.attributes.get_text(keys::DECODER), Some("image"));
        assert_eq!(frame.bytes.as_slice(), &[7, 9]);
    }

    #[test]
    fn test_png_through_image_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        image::RgbaImage::from_pixel(2, 3, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let frame = builtin().load_to_bytes(&path, &Attributes::new()).unwrap();

        assert_eq!(frame.description.width, 2);
        assert_eq!(frame.description.height, 3);
        assert_eq!(frame.description.format, PixelFormat::Rgba8);
        assert_eq!(frame.attributes.get_text(keys::FORMAT), Some("png"));
        assert_eq!(frame.bytes.len(), 2 * 3 * 4);
        assert_eq!(&frame.bytes.as_slice()[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_corrupt_png_reports_last_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "broken.png", b"not a png at all");

        let err = builtin().load(&path, &Attributes::new(), |_, _| ()).unwrap_err();

        match err {
            LoadError::NoReaderSucceeded { last_error, .. } => {
                assert!(last_error.starts_with("image:"), "{last_error}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[cfg(feature = "animated")]
    #[test]
    fn test_gif_frame_option() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two.gif");

        {
            let mut file = fs::File::create(&path).unwrap();
            let mut encoder = gif::Encoder::new(&mut file, 2, 2, &[]).unwrap();
            for index in [0u8, 1] {
                let mut frame = gif::Frame::from_palette_pixels(
                    2,
                    2,
                    vec![index; 4],
                    vec![255, 0, 0, 0, 0, 255],
                    None,
                );
                frame.delay = 5;
                encoder.write_frame(&frame).unwrap();
            }
        }

        let loader = builtin();

        let first = loader.load_to_bytes(&path, &Attributes::new()).unwrap();
        assert_eq!(&first.bytes.as_slice()[..4], &[255, 0, 0, 255]);

        let second = loader
            .load_to_bytes(&path, &Attributes::new().with(keys::FRAME, 1i64))
            .unwrap();
        assert_eq!(&second.bytes.as_slice()[..4], &[0, 0, 255, 255]);
        assert_eq!(second.attributes.get_int(keys::FRAME), Some(1));
        assert_eq!(second.attributes.get_int(keys::DELAY_MS), Some(50));

        let err = loader
            .load_to_bytes(&path, &Attributes::new().with(keys::FRAME, 5i64))
            .unwrap_err();
        assert!(matches!(err, LoadError::NoReaderSucceeded { .. }));
    }

    #[test]
    fn test_oversized_pnm_header_tries_every_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "huge.ppm",
            b"P6 4294967295 4294967295 65535\n\x00\x00\x00\x00\x00\x00",
        );

        let err = builtin().load(&path, &Attributes::new(), |_, _| ()).unwrap_err();

        match err {
            LoadError::NoReaderSucceeded { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.starts_with("image:"), "{last_error}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[cfg(feature = "animated")]
    fn write_gif(path: &Path, width: u16, height: u16, frames: &[gif::Frame<'_>]) {
        let mut file = fs::File::create(path).unwrap();
        let mut encoder = gif::Encoder::new(&mut file, width, height, &[]).unwrap();
        for frame in frames {
            encoder.write_frame(frame).unwrap();
        }
    }

    #[cfg(feature = "animated")]
    #[test]
    fn test_gif_frame_off_screen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift.gif");

        let mut stray = gif::Frame::from_palette_pixels(1, 1, vec![0], vec![255, 0, 0], None);
        stray.left = 10;
        stray.top = 1;
        stray.dispose = gif::DisposalMethod::Background;

        let full = gif::Frame::from_palette_pixels(2, 2, vec![0; 4], vec![0, 255, 0], None);
        write_gif(&path, 2, 2, &[stray, full]);

        let loader = builtin();

        let first = loader.load_to_bytes(&path, &Attributes::new()).unwrap();
        assert_eq!(first.bytes.as_slice(), &[0; 16]);

        let second = loader
            .load_to_bytes(&path, &Attributes::new().with(keys::FRAME, 1i64))
            .unwrap();
        assert_eq!(&second.bytes.as_slice()[12..], &[0, 255, 0, 255]);
    }

    #[cfg(feature = "animated")]
    #[test]
    fn test_gif_screen_over_limit_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vast.gif");

        let frame = gif::Frame::from_palette_pixels(1, 1, vec![0], vec![0, 0, 255], None);
        write_gif(&path, u16::MAX, u16::MAX, &[frame]);

        let err = builtin().load(&path, &Attributes::new(), |_, _| ()).unwrap_err();

        match err {
            LoadError::NoReaderSucceeded { attempts, last_error } => {
                assert_eq!(attempts, 1);
                assert!(last_error.contains("byte limit"), "{last_error}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
