// SPDX-License-Identifier: MPL-2.0

//! Errors raised while resolving, decoding, and staging frames.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Failure reported by a reader for one lifecycle call.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("{0}")]
    Failed(String),
    /// The reader does not implement this lifecycle step.
    #[error("unsupported {0}")]
    Unsupported(&'static str),
}

impl ReaderError {
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<eyre::Report> for ReaderError {
    fn from(report: eyre::Report) -> Self {
        Self::Failed(format!("{report:#}"))
    }
}

impl From<io::Error> for ReaderError {
    fn from(why: io::Error) -> Self {
        Self::Failed(why.to_string())
    }
}

/// Failure of a single decoder candidate. The orchestrator recovers from
/// these by moving on to the next candidate.
#[derive(Debug, Error)]
pub enum CandidateError {
    #[error("{decoder}: unable to map file to memory: {source}")]
    MappingFailed {
        decoder: String,
        #[source]
        source: io::Error,
    },
    #[error("{decoder}: {message}")]
    DecoderSetupFailed { decoder: String, message: String },
    #[error("{decoder}: unable to read image data: {message}")]
    ReadFailed { decoder: String, message: String },
    #[error("{decoder}: unsupported {operation}")]
    UnsupportedOperation {
        decoder: String,
        operation: &'static str,
    },
}

impl CandidateError {
    pub(crate) fn setup(decoder: &str, why: ReaderError) -> Self {
        match why {
            ReaderError::Failed(message) => Self::DecoderSetupFailed {
                decoder: decoder.to_owned(),
                message,
            },
            ReaderError::Unsupported(operation) => Self::UnsupportedOperation {
                decoder: decoder.to_owned(),
                operation,
            },
        }
    }

    pub(crate) fn read(decoder: &str, why: ReaderError) -> Self {
        match why {
            ReaderError::Failed(message) => Self::ReadFailed {
                decoder: decoder.to_owned(),
                message,
            },
            ReaderError::Unsupported(operation) => Self::UnsupportedOperation {
                decoder: decoder.to_owned(),
                operation,
            },
        }
    }
}

/// Terminal failure to produce a frame.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{} has no extension", path.display())]
    NoExtension { path: PathBuf },
    #[error("no reader available for extension \"{extension}\"")]
    NoDecoderAvailable { extension: String },
    #[error("no decoder for extension \"{extension}\"")]
    NoDecoderForExtension { extension: String },
    #[error("unable to read {}: {source}", path.display())]
    MappingFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no reader succeeded, last message was: '{last_error}'")]
    NoReaderSucceeded { attempts: usize, last_error: String },
    #[error("decoder panicked: {0}")]
    Panicked(String),
}

/// The pipeline was shut down. Not a failure, only a signal to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("pipeline terminated")]
pub struct PipelineTerminated;
