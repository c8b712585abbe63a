//! Workspace interface - what the generator is allowed to know about the
//! checked-out repository.
//!
//! Two questions, nothing more: does a path exist, and what is in a file.
//!
//! ```rust,ignore
//! use kite_matrix::workspace::{FsWorkspace, Workspace};
//!
//! let ws = FsWorkspace::new("..");
//! if ws.exists("activerecord") {
//!     let rakefile = ws.read_to_string("activerecord/Rakefile")?;
//! }
//! ```
//!
//! # Optional Capabilities
//!
//! [`ParallelProbe`] answers whether a target can split its test run
//! across parallel jobs. Any [`Workspace`] gets an implementation for free.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Marker a target's Rakefile carries when it can shard across jobs.
pub const PARALLEL_MARKER: &str = "BUILDKITE_PARALLEL";

// =============================================================================
// THE CORE TRAIT
// =============================================================================

/// Read-only view of the repository under test.
///
/// Paths are relative to the workspace root.
pub trait Workspace {
    /// Whether `path` exists.
    fn exists(&self, path: &str) -> bool;

    /// Reads `path` into a string.
    fn read_to_string(&self, path: &str) -> Result<String>;
}

/// Filesystem-backed workspace rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Workspace for FsWorkspace {
    fn exists(&self, path: &str) -> bool {
        self.root.join(path).exists()
    }

    fn read_to_string(&self, path: &str) -> Result<String> {
        let full = self.root.join(path);
        fs::read_to_string(&full).map_err(|source| Error::Read { path: full, source })
    }
}

// =============================================================================
// OPTIONAL CAPABILITIES
// =============================================================================

/// Optional capability: can a target run its suite as parallel shards?
pub trait ParallelProbe {
    /// Whether `directory` signals support for parallel test runs.
    fn supports_parallel(&self, directory: &str) -> Result<bool>;
}

impl<W: Workspace + ?Sized> ParallelProbe for W {
    fn supports_parallel(&self, directory: &str) -> Result<bool> {
        let rakefile = self.read_to_string(&format!("{}/Rakefile", directory))?;
        Ok(rakefile.contains(PARALLEL_MARKER))
    }
}
