// SPDX-License-Identifier: MPL-2.0

//! Raw file access: byte views of files on disk.
//!
//! Files are either mapped read-only into the address space or streamed
//! into a heap buffer. Both expose the same `&[u8]` view, so decoders do not
//! care which strategy the caller picked.

use std::{
    ffi::c_void,
    fs::File,
    io::{self, Read},
    num::NonZeroUsize,
    path::Path,
    ptr::NonNull,
};

use cosmic_frames_config::ReadStrategy;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};

/// A read-only private mapping of a whole file.
pub struct MappedFile {
    ptr: NonNull<c_void>,
    len: usize,
}

impl MappedFile {
    /// Map `path` into memory.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "file too large to map"))?;

        // Zero-length mappings are rejected by the kernel.
        let Some(length) = NonZeroUsize::new(len) else {
            return Ok(Self {
                ptr: NonNull::dangling(),
                len: 0,
            });
        };

        // SAFETY: the mapping is private and read-only; the file handle may be
        // closed once the mapping exists.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ,
                MapFlags::MAP_PRIVATE,
                &file,
                0,
            )
        }
        .map_err(io::Error::from)?;

        tracing::trace!(path = %path.display(), len, "mapped file");

        Ok(Self { ptr, len })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for MappedFile {
    fn as_ref(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: `ptr` points to `len` readable bytes for as long as `self` lives.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast::<u8>(), self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        // SAFETY: the region was returned by `mmap` with this length and is unmapped once.
        if let Err(why) = unsafe { munmap(self.ptr, self.len) } {
            tracing::warn!(?why, "failed to unmap file");
        }
    }
}

// The mapping is immutable and owned by this value.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MappedFile({} bytes)", self.len)
    }
}

/// Raw bytes of a file, mapped or streamed.
#[derive(Debug)]
pub enum FileBytes {
    Mapped(MappedFile),
    Streamed(Vec<u8>),
}

impl FileBytes {
    /// Read `path` with the given strategy.
    pub fn read(path: &Path, strategy: ReadStrategy) -> io::Result<Self> {
        match strategy {
            ReadStrategy::Mapped => MappedFile::open(path).map(Self::Mapped),
            ReadStrategy::Streamed => {
                let mut file = File::open(path)?;
                let mut data = Vec::with_capacity(usize::try_from(file_size(path)?).unwrap_or(0));
                file.read_to_end(&mut data)?;
                Ok(Self::Streamed(data))
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AsRef<[u8]> for FileBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Mapped(file) => file.as_ref(),
            Self::Streamed(data) => data,
        }
    }
}

/// Size of a file in bytes, without reading it.
pub fn file_size(path: &Path) -> io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn mapped_and_streamed_views_match() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"P5 2 1 255\n\x01\x02").unwrap();

        let mapped = FileBytes::read(file.path(), ReadStrategy::Mapped).unwrap();
        let streamed = FileBytes::read(file.path(), ReadStrategy::Streamed).unwrap();

        assert!(matches!(mapped, FileBytes::Mapped(_)));
        assert_eq!(mapped.as_ref(), streamed.as_ref());
        assert_eq!(mapped.len() as u64, file_size(file.path()).unwrap());
    }

    #[test]
    fn empty_file_maps_to_empty_slice() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mapped = MappedFile::open(file.path()).unwrap();
        assert!(mapped.is_empty());
        assert_eq!(mapped.as_ref(), &[] as &[u8]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(MappedFile::open(Path::new("/nonexistent/frame.ppm")).is_err());
    }
}
