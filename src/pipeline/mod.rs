// SPDX-License-Identifier: MPL-2.0

//! Content-keyed decode pipeline.
//!
//! Load workers resolve a content hash to a file and read its raw bytes when
//! the preferred decoder wants them. Decode workers run the frame loader over
//! those bytes. Per-slot failures become failed slots; only termination stops
//! a worker.

pub mod affinity;
pub mod chain;
pub mod worker;

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::time::UNIX_EPOCH;

pub use chain::{Chain, ChainStats, ContentHash, DecodedSlot, LoadedSlot};
pub use worker::{ContentResolver, DecodePipeline};

/// Content identity of a file, from its path and modification time.
///
/// Never zero. Returns `None` if the file's metadata is unavailable.
#[must_use]
pub fn content_hash(path: &Path) -> Option<ContentHash> {
    let modified = path
        .metadata()
        .ok()?
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_nanos();

    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    modified.hash(&mut hasher);

    Some(hasher.finish().max(1))
}
