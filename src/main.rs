// SPDX-License-Identifier: MPL-2.0-only

//! Prefetch daemon: decodes every frame of the configured source directory
//! and stages it in transfer buffers.

use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use calloop::{
    EventLoop,
    channel::{self, Channel},
    signals::{Signal, Signals},
};
use cosmic_frames::{
    cache::{GpuFrameCache, HostAllocator, LoadedImageCache, TransferPool},
    config::Config,
    frame::{Attributes, MediaFrameReference},
    imageio::{IoRegistry, extension},
    pipeline::{Chain, ContentHash, DecodePipeline, DecodedSlot, content_hash},
};
use eyre::{WrapErr, eyre};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use walkdir::WalkDir;

/// Interval at which pending requests are topped up.
const FEED_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    init_logger();

    let config = Config::load_or_fallback();

    let Some(source) = config.source.clone() else {
        info!("no source directory configured, nothing to prefetch");
        return Ok(());
    };

    let registry = Arc::new(IoRegistry::with_builtin());
    let files = collect_frames(&registry, &source);
    info!(source = %source.display(), frames = files.len(), "prefetching");

    let lookup: Arc<HashMap<ContentHash, PathBuf>> =
        Arc::new(files.iter().map(|(hash, path)| (*hash, path.clone())).collect());

    let resolver = {
        let lookup = Arc::clone(&lookup);
        Arc::new(move |hash: ContentHash| lookup.get(&hash).cloned())
    };

    let mut pipeline =
        DecodePipeline::spawn(&config.pipeline, registry, resolver, Attributes::new())
            .wrap_err("failed to start decode pipeline")?;

    let mut event_loop: EventLoop<Prefetch> = EventLoop::try_new()?;
    let handle = event_loop.handle();

    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])?;
    handle
        .insert_source(signals, |event, _, state: &mut Prefetch| {
            info!(signal = ?event.signal(), "shutting down");
            state.chain.terminate();
            state.running = false;
        })
        .map_err(|why| eyre!("failed to watch signals: {}", why.error))?;

    let (tx, rx): (channel::Sender<DecodedSlot>, Channel<DecodedSlot>) = channel::channel();
    handle
        .insert_source(rx, |event, _, state: &mut Prefetch| match event {
            channel::Event::Msg(slot) => state.receive(slot),
            channel::Event::Closed => state.running = false,
        })
        .map_err(|why| eyre!("failed to watch decoded frames: {}", why.error))?;

    let collector = {
        let chain = Arc::clone(pipeline.chain());
        thread::Builder::new()
            .name("frames-collect".into())
            .spawn(move || {
                while let Ok(slot) = chain.next_decoded() {
                    if tx.send(slot).is_err() {
                        break;
                    }
                }
            })?
    };

    let mut state = Prefetch {
        chain: Arc::clone(pipeline.chain()),
        pending: files.iter().map(|(hash, _)| *hash).collect(),
        total: files.len(),
        frames: files
            .iter()
            .enumerate()
            .map(|(index, (hash, _))| (*hash, MediaFrameReference::new(0, index as u64)))
            .collect(),
        decoded: LoadedImageCache::new(),
        gpu: GpuFrameCache::new(
            config.cache.max_frames,
            TransferPool::new(HostAllocator, config.cache.max_idle_buffers),
        ),
        succeeded: 0,
        failed: 0,
        promoted: 0,
        running: true,
    };

    let started = Instant::now();
    while state.running && !state.is_done() {
        state.feed();
        event_loop.dispatch(Some(FEED_INTERVAL), &mut state)?;
    }

    pipeline.shutdown();
    if collector.join().is_err() {
        warn!("frame collector panicked");
    }

    info!(
        elapsed = ?started.elapsed(),
        decoded = state.succeeded,
        failed = state.failed,
        resident = state.gpu.len(),
        promoted = state.promoted,
        stats = ?pipeline.chain().stats(),
        "prefetch finished"
    );

    Ok(())
}

fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Supported, non-hidden files below `source`, sorted by path, with their
/// content hashes.
fn collect_frames(registry: &IoRegistry, source: &Path) -> Vec<(ContentHash, PathBuf)> {
    let mut paths: Vec<PathBuf> = WalkDir::new(source)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| extension(path).is_some_and(|ext| registry.is_supported(ext)))
        .collect();

    paths.sort();

    paths
        .into_iter()
        .filter_map(|path| match content_hash(&path) {
            Some(hash) => Some((hash, path)),
            None => {
                warn!(path = %path.display(), "unable to hash file, skipping");
                None
            }
        })
        .collect()
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}

struct Prefetch {
    chain: Arc<Chain>,
    /// Hashes not yet accepted by the pipeline.
    pending: VecDeque<ContentHash>,
    total: usize,
    frames: HashMap<ContentHash, MediaFrameReference>,
    decoded: LoadedImageCache,
    gpu: GpuFrameCache<HostAllocator>,
    succeeded: usize,
    failed: usize,
    promoted: usize,
    running: bool,
}

impl Prefetch {
    /// Request pending hashes until the pipeline stops accepting them.
    fn feed(&mut self) {
        while let Some(&hash) = self.pending.front() {
            match self.chain.request(hash) {
                Ok(true) => {
                    self.pending.pop_front();
                }
                Ok(false) => break,
                Err(_) => {
                    self.running = false;
                    break;
                }
            }
        }
    }

    fn receive(&mut self, slot: DecodedSlot) {
        let Some(&frame) = self.frames.get(&slot.hash) else {
            debug!(hash = slot.hash, "decoded slot for unknown hash");
            return;
        };

        match slot.frame {
            Ok(data) => {
                self.succeeded += 1;
                self.decoded.insert(frame, data);

                if self.gpu.get(&self.decoded, frame).is_some() {
                    self.promoted += 1;
                }

                // The CPU copy only stages the transfer.
                self.decoded.remove(&frame);
            }
            Err(why) => {
                self.failed += 1;
                debug!(hash = slot.hash, %why, "frame unavailable");
            }
        }

        self.feed();
    }

    /// Every frame was either received or dropped by the pipeline.
    fn is_done(&self) -> bool {
        let dropped = self.chain.stats().dropped as usize;
        self.pending.is_empty() && self.succeeded + self.failed + dropped >= self.total
    }
}
