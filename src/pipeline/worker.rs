// SPDX-License-Identifier: MPL-2.0

//! Load and decode workers.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cosmic_frames_config::{Pipeline, ReadStrategy, Worker};
use tracing::{debug, warn};

use super::affinity;
use super::chain::{Chain, ContentHash, DecodedSlot, LoadedSlot};
use crate::error::LoadError;
use crate::frame::{Attributes, FrameBytes, FrameData};
use crate::imageio::{Capability, FrameLoader, IoRegistry, Pixels, extension};
use crate::mapped::FileBytes;

/// Maps a content hash to the file holding it.
///
/// Called concurrently from every load worker.
pub trait ContentResolver: Send + Sync {
    fn resolve(&self, hash: ContentHash) -> Option<PathBuf>;
}

impl<F> ContentResolver for F
where
    F: Fn(ContentHash) -> Option<PathBuf> + Send + Sync,
{
    fn resolve(&self, hash: ContentHash) -> Option<PathBuf> {
        self(hash)
    }
}

/// Worker threads feeding a [`Chain`].
#[derive(Debug)]
pub struct DecodePipeline {
    chain: Arc<Chain>,
    workers: Vec<JoinHandle<()>>,
}

impl DecodePipeline {
    /// Start the workers described by `config`.
    ///
    /// `options` are passed to every reader.
    pub fn spawn(
        config: &Pipeline,
        registry: Arc<IoRegistry>,
        resolver: Arc<dyn ContentResolver>,
        options: Attributes,
    ) -> io::Result<Self> {
        let chain = Arc::new(Chain::new(config.capacity()));
        let loader = FrameLoader::new(registry).with_strategy(config.read_strategy);
        let options = Arc::new(options);

        let mut pipeline = Self {
            chain,
            workers: Vec::new(),
        };

        for (index, worker) in config.load_workers.iter().copied().enumerate() {
            let context = LoadContext {
                chain: Arc::clone(&pipeline.chain),
                registry: Arc::clone(loader.registry()),
                resolver: Arc::clone(&resolver),
                strategy: config.read_strategy,
            };

            pipeline.start(format!("frames-load-{index}"), worker, move || {
                context.run();
            })?;
        }

        for (index, worker) in config.decode_workers.iter().copied().enumerate() {
            let context = DecodeContext {
                chain: Arc::clone(&pipeline.chain),
                loader: loader.clone(),
                options: Arc::clone(&options),
            };

            pipeline.start(format!("frames-decode-{index}"), worker, move || {
                context.run();
            })?;
        }

        Ok(pipeline)
    }

    fn start(
        &mut self,
        name: String,
        worker: Worker,
        body: impl FnOnce() + Send + 'static,
    ) -> io::Result<()> {
        let handle = thread::Builder::new().name(name).spawn(move || {
            let name = thread::current().name().unwrap_or_default().to_owned();
            affinity::apply(&name, &worker);
            debug!(worker = %name, "worker started");
            body();
            debug!(worker = %name, "worker stopped");
        })?;

        self.workers.push(handle);
        Ok(())
    }

    #[must_use]
    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    /// Terminate the chain and wait for every worker to exit.
    pub fn shutdown(&mut self) {
        self.chain.terminate();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("pipeline worker panicked outside of slot processing");
            }
        }
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct LoadContext {
    chain: Arc<Chain>,
    registry: Arc<IoRegistry>,
    resolver: Arc<dyn ContentResolver>,
    strategy: ReadStrategy,
}

impl LoadContext {
    fn run(&self) {
        while let Ok(hash) = self.chain.next_load() {
            let resolved = panic::catch_unwind(AssertUnwindSafe(|| self.resolve(hash)));

            let Ok(Some(path)) = resolved else {
                warn!(hash, "unable to resolve content hash, dropping request");
                self.chain.drop_unresolved(hash);
                continue;
            };

            let loaded = panic::catch_unwind(AssertUnwindSafe(|| {
                load_one(&self.registry, hash, path.clone(), self.strategy)
            }))
            .unwrap_or_else(|panic| Err(LoadError::Panicked(panic_message(&*panic))));

            match loaded {
                Ok(slot) => {
                    if self.chain.publish_loaded(slot).is_err() {
                        break;
                    }
                }
                Err(why) => {
                    warn!(hash, path = %path.display(), %why, "failed to load");
                    self.chain
                        .publish_decoded(DecodedSlot::failed(hash, Some(path), why));
                }
            }
        }
    }

    fn resolve(&self, hash: ContentHash) -> Option<PathBuf> {
        if hash == 0 {
            return None;
        }
        self.resolver.resolve(hash)
    }
}

/// Read the raw bytes of `path` if its preferred decoder wants them.
fn load_one(
    registry: &IoRegistry,
    hash: ContentHash,
    path: PathBuf,
    strategy: ReadStrategy,
) -> Result<LoadedSlot, LoadError> {
    let wants_bytes = extension(&path)
        .and_then(|ext| registry.find_candidates(ext).first())
        .is_some_and(|descriptor| descriptor.supports(Capability::ReadFromMemory));

    let raw = if wants_bytes {
        let bytes = FileBytes::read(&path, strategy).map_err(|source| LoadError::MappingFailed {
            path: path.clone(),
            source,
        })?;
        Some(Arc::new(bytes))
    } else {
        None
    };

    Ok(LoadedSlot { hash, path, raw })
}

struct DecodeContext {
    chain: Arc<Chain>,
    loader: FrameLoader,
    options: Arc<Attributes>,
}

impl DecodeContext {
    fn run(&self) {
        while let Ok(slot) = self.chain.next_decode() {
            let hash = slot.hash;
            let path = slot.path.clone();

            let frame = panic::catch_unwind(AssertUnwindSafe(|| {
                decode_one(&self.loader, &self.options, &slot)
            }))
            .unwrap_or_else(|panic| Err(LoadError::Panicked(panic_message(&*panic))));

            if let Err(why) = &frame {
                warn!(hash, path = %path.display(), %why, "failed to decode");
            }

            self.chain.publish_decoded(DecodedSlot {
                hash,
                path: Some(path),
                frame,
            });
        }
    }
}

fn decode_one(
    loader: &FrameLoader,
    options: &Attributes,
    slot: &LoadedSlot,
) -> Result<FrameData, LoadError> {
    let Some(ext) = extension(&slot.path) else {
        return Err(LoadError::NoExtension {
            path: slot.path.clone(),
        });
    };

    if !loader.registry().is_supported(ext) {
        return Err(LoadError::NoDecoderForExtension {
            extension: ext.to_owned(),
        });
    }

    let raw = slot.raw.as_ref();
    let (mut result, shared) = loader.load_with(
        &slot.path,
        raw.map(|bytes| (**bytes).as_ref()),
        options,
        |_, pixels| share_or_copy(raw, pixels),
    )?;

    let description = result.description;
    let attributes = std::mem::take(&mut result.attributes);
    let bytes = match shared {
        Some(bytes) => bytes,
        None => FrameBytes::from_vec(result.into_owned_data().unwrap_or_default()),
    };

    Ok(FrameData {
        description,
        attributes,
        bytes,
    })
}

/// Keep mapped pixels as a view into the raw file bytes when they lie
/// inside them, copy them otherwise. Owned pixels are taken from the result.
fn share_or_copy(raw: Option<&Arc<FileBytes>>, pixels: Pixels<'_>) -> Option<FrameBytes> {
    let Pixels::Mapped(data) = pixels else {
        return None;
    };

    let view = raw.and_then(|raw| {
        let start = offset_within((**raw).as_ref(), data)?;
        let backing: Arc<dyn AsRef<[u8]> + Send + Sync> = raw.clone();
        FrameBytes::slice_of(backing, start..start + data.len())
    });

    Some(view.unwrap_or_else(|| FrameBytes::from_vec(data.to_vec())))
}

/// Offset of `inner` in `outer`, if `inner` is a sub-slice of it.
fn offset_within(outer: &[u8], inner: &[u8]) -> Option<usize> {
    let outer_start = outer.as_ptr() as usize;
    let inner_start = inner.as_ptr() as usize;

    let offset = inner_start.checked_sub(outer_start)?;
    (offset + inner.len() <= outer.len()).then_some(offset)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReaderError;
    use crate::frame::{FrameDescription, PixelFormat};
    use crate::imageio::{FrameHeader, ImageReader, IoDescriptor};
    use std::collections::HashMap;
    use std::path::Path;

    struct Panicking;

    impl IoDescriptor for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn extensions(&self) -> &[&'static str] {
            &["boom"]
        }

        fn supports(&self, _capability: Capability) -> bool {
            false
        }

        fn reader_from_file<'a>(
            &'a self,
            _options: &Attributes,
            _path: &Path,
        ) -> Result<Box<dyn ImageReader + 'a>, ReaderError> {
            Ok(Box::new(PanickingReader))
        }
    }

    struct PanickingReader;

    impl ImageReader for PanickingReader {
        fn setup(&mut self) -> Result<FrameHeader, ReaderError> {
            Ok(FrameHeader::new(
                FrameDescription::packed(1, 1, PixelFormat::Gray8).unwrap(),
            ))
        }

        fn read_image_data_to(&mut self, _dest: &mut [u8]) -> Result<(), ReaderError> {
            panic!("decoder bug");
        }
    }

    fn config(load: usize, decode: usize) -> Pipeline {
        Pipeline {
            load_workers: vec![Worker::default(); load],
            decode_workers: vec![Worker::default(); decode],
            stage_capacity: 8,
            read_strategy: ReadStrategy::Mapped,
        }
    }

    fn spawn(files: HashMap<ContentHash, PathBuf>) -> DecodePipeline {
        let mut registry = IoRegistry::with_builtin();
        registry.register(Panicking);

        DecodePipeline::spawn(
            &config(2, 2),
            Arc::new(registry),
            Arc::new(move |hash: ContentHash| files.get(&hash).cloned()),
            Attributes::new(),
        )
        .unwrap()
    }

    #[test]
    fn decodes_pnm_as_a_view_into_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.pgm");
        std::fs::write(&path, b"P5\n2 2\n255\n\x01\x02\x03\x04").unwrap();

        let pipeline = spawn(HashMap::from([(42, path.clone())]));
        assert_eq!(pipeline.chain().request(42), Ok(true));

        let slot = pipeline.chain().wait_decoded(42).unwrap();
        assert_eq!(slot.path.as_deref(), Some(path.as_path()));

        let frame = slot.frame.unwrap();
        assert_eq!(frame.description.format, PixelFormat::Gray8);
        assert_eq!(frame.bytes.as_slice(), &[1, 2, 3, 4]);
        assert!(frame.bytes.is_borrowed_view());
    }

    #[test]
    fn unknown_extension_publishes_failed_slot() {
        let pipeline = spawn(HashMap::from([(1, PathBuf::from("/tmp/clip.unknown"))]));
        pipeline.chain().request(1).unwrap();

        let slot = pipeline.chain().wait_decoded(1).unwrap();
        assert!(matches!(
            slot.frame,
            Err(LoadError::NoDecoderForExtension { ref extension }) if extension == "unknown"
        ));
    }

    #[test]
    fn unreadable_file_publishes_failed_slot() {
        let pipeline = spawn(HashMap::from([(3, PathBuf::from("/nonexistent/frame.png"))]));
        pipeline.chain().request(3).unwrap();

        let slot = pipeline.chain().wait_decoded(3).unwrap();
        assert!(matches!(slot.frame, Err(LoadError::MappingFailed { .. })));
    }

    #[test]
    fn decoder_panic_does_not_stop_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let boom = dir.path().join("frame.boom");
        let good = dir.path().join("frame.pgm");
        std::fs::write(&boom, b"").unwrap();
        std::fs::write(&good, b"P5 1 1 255\n\x07").unwrap();

        let pipeline = spawn(HashMap::from([(1, boom), (2, good)]));
        pipeline.chain().request(1).unwrap();

        let slot = pipeline.chain().wait_decoded(1).unwrap();
        assert!(matches!(slot.frame, Err(LoadError::Panicked(ref m)) if m == "decoder bug"));

        pipeline.chain().request(2).unwrap();
        let slot = pipeline.chain().wait_decoded(2).unwrap();
        assert_eq!(slot.frame.unwrap().bytes.as_slice(), &[7]);
    }

    #[test]
    fn unresolved_hash_is_dropped() {
        let pipeline = spawn(HashMap::new());
        pipeline.chain().request(99).unwrap();

        while pipeline.chain().stats().dropped == 0 {
            thread::yield_now();
        }

        assert_eq!(pipeline.chain().in_flight(), 0);
        assert!(pipeline.chain().try_take_decoded(99).is_none());
    }

    #[test]
    fn shutdown_joins_idle_workers() {
        let mut pipeline = spawn(HashMap::new());
        pipeline.shutdown();

        assert!(pipeline.chain().is_terminated());
        assert!(pipeline.workers.is_empty());
    }

    #[test]
    fn offsets_only_for_sub_slices() {
        let outer = [0u8; 8];
        assert_eq!(offset_within(&outer, &outer[3..5]), Some(3));
        assert_eq!(offset_within(&outer, &outer[8..]), Some(8));
        assert_eq!(offset_within(&outer[..4], &outer[2..6]), None);
        assert_eq!(offset_within(&outer[4..], &outer[..2]), None);
    }
}
