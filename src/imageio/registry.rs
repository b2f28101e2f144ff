// SPDX-License-Identifier: MPL-2.0

//! Resolution of file extensions to candidate decoders.
//!
//! Extensions are matched case-insensitively. For each extension, specialized
//! decoders come before general-purpose ones, and decoders keep their
//! registration order within each of those two bands.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::descriptor::{Capability, IoDescriptor};

/// Registry of decoder descriptors.
///
/// Populated once at startup, then shared read-only between the loader and
/// the pipeline workers.
#[derive(Debug, Default)]
pub struct IoRegistry {
    descriptors: Vec<Arc<dyn IoDescriptor>>,
    by_extension: BTreeMap<String, Vec<Arc<dyn IoDescriptor>>>,
}

impl IoRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every decoder shipped with this crate.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        super::plugins::register_builtin(&mut registry);
        registry
    }

    /// Take ownership of a descriptor and index it by its extensions.
    pub fn register(&mut self, descriptor: impl IoDescriptor + 'static) {
        self.register_shared(Arc::new(descriptor));
    }

    pub fn register_shared(&mut self, descriptor: Arc<dyn IoDescriptor>) {
        let general_purpose = descriptor.supports(Capability::GeneralPurpose);

        debug!(
            decoder = descriptor.name(),
            general_purpose,
            extensions = ?descriptor.extensions(),
            "registering decoder"
        );

        for extension in descriptor.extensions() {
            let candidates = self
                .by_extension
                .entry(extension.to_ascii_lowercase())
                .or_default();

            // A descriptor listing the same extension twice is indexed once.
            if candidates.iter().any(|c| Arc::ptr_eq(c, &descriptor)) {
                continue;
            }

            if general_purpose {
                candidates.push(Arc::clone(&descriptor));
            } else {
                let specialized = candidates
                    .iter()
                    .take_while(|c| !c.supports(Capability::GeneralPurpose))
                    .count();
                candidates.insert(specialized, Arc::clone(&descriptor));
            }
        }

        self.descriptors.push(descriptor);
    }

    /// Candidates for `extension`, in the order they should be tried.
    ///
    /// Unknown extensions yield an empty slice.
    #[must_use]
    pub fn find_candidates(&self, extension: &str) -> &[Arc<dyn IoDescriptor>] {
        self.by_extension
            .get(&extension.to_ascii_lowercase())
            .map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn is_supported(&self, extension: &str) -> bool {
        !self.find_candidates(extension).is_empty()
    }

    /// Every registered descriptor, in registration order.
    #[must_use]
    pub fn descriptors(&self) -> &[Arc<dyn IoDescriptor>] {
        &self.descriptors
    }

    /// Every extension with at least one candidate.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.by_extension.keys().map(String::as_str)
    }
}
