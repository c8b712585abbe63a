//! Runtime versions and the catalog of versions a build tests against.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::registry::TagSource;

/// Upstream image whose tags define the released runtimes.
pub const BASE_IMAGE: &str = "ruby";

/// Image for the trunk build of the runtime.
pub const NIGHTLY_IMAGE: &str = "rubylang/ruby:master-nightly-bionic";

static RELEASE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A[0-9]+\.[0-9]+\z").expect("valid regex"));

// =============================================================================
// VERSION
// =============================================================================

/// A `MAJOR.MINOR` pair, ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidVersion {
            value: s.to_string(),
        };
        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

// =============================================================================
// RUNTIME VERSION
// =============================================================================

/// A runtime image a step can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeVersion {
    Release(Version),
    Nightly,
}

impl RuntimeVersion {
    /// Full image reference, e.g. `ruby:3.2`.
    pub fn image(&self) -> String {
        match self {
            RuntimeVersion::Release(v) => format!("{}:{}", BASE_IMAGE, v),
            RuntimeVersion::Nightly => NIGHTLY_IMAGE.to_string(),
        }
    }

    /// Form used in step labels: `3.2`, or `trunk` for nightly.
    pub fn short_name(&self) -> String {
        match self {
            RuntimeVersion::Release(v) => v.to_string(),
            RuntimeVersion::Nightly => "trunk".to_string(),
        }
    }

    pub fn is_nightly(&self) -> bool {
        matches!(self, RuntimeVersion::Nightly)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.image())
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// Released runtimes at or above a floor, ascending, plus nightly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCatalog {
    releases: Vec<Version>,
}

impl VersionCatalog {
    /// Fetches the base image's tags once and keeps the usable releases.
    pub fn discover(source: &dyn TagSource, min: Version) -> Result<Self> {
        let tags = source.tags(BASE_IMAGE)?;
        Self::from_tags(&tags, min)
    }

    /// Builds a catalog from raw tag names.
    ///
    /// Only exact `MAJOR.MINOR` tags count; suffixed tags such as
    /// `3.2-slim` or `3.2rc1` are ignored.
    pub fn from_tags<S: AsRef<str>>(tags: &[S], min: Version) -> Result<Self> {
        let mut releases = Vec::new();
        for tag in tags.iter().map(AsRef::as_ref) {
            if !RELEASE_TAG.is_match(tag) {
                continue;
            }
            let version: Version = tag.parse()?;
            if version >= min {
                releases.push(version);
            }
        }
        releases.sort();
        releases.dedup();

        if releases.is_empty() {
            return Err(Error::NoRuntimeVersions {
                min: min.to_string(),
            });
        }

        debug!(?releases, %min, "filtered runtime versions");
        info!(count = releases.len() + 1, "runtime catalog ready");
        Ok(Self { releases })
    }

    /// Every runtime to test, nightly last.
    pub fn runtimes(&self) -> Vec<RuntimeVersion> {
        self.releases
            .iter()
            .copied()
            .map(RuntimeVersion::Release)
            .chain(std::iter::once(RuntimeVersion::Nightly))
            .collect()
    }

    /// Released versions only, ascending.
    pub fn releases(&self) -> &[Version] {
        &self.releases
    }

    /// Newest release; used wherever a single runtime is enough.
    pub fn default_runtime(&self) -> RuntimeVersion {
        // from_tags never builds an empty catalog
        RuntimeVersion::Release(self.releases[self.releases.len() - 1])
    }
}
