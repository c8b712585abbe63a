//! Error type for pipeline generation.
//!
//! Every variant is fatal: the generator either emits a complete document
//! or nothing at all.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort pipeline generation.
#[derive(Debug, Error)]
pub enum Error {
    /// The registry could not be reached or answered with a non-2xx status.
    #[error("failed to fetch tags from {url}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The registry answered, but not with a JSON list of tags.
    #[error("unexpected tag list from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// A tag looked like `MAJOR.MINOR` but could not be parsed as one.
    #[error("invalid runtime version `{value}`")]
    InvalidVersion { value: String },

    /// Nothing survived the minimum-version filter.
    #[error("no runtime versions available at or above {min}")]
    NoRuntimeVersions { min: String },

    /// A workspace file could not be read.
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The pipeline could not be rendered as YAML.
    #[error("failed to render pipeline")]
    Emit(#[from] serde_yml::Error),

    /// The rendered pipeline could not be written out.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
