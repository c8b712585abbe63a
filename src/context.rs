//! Build context - everything about the current build that shapes the
//! pipeline, captured once at startup.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::version::Version;
use crate::workspace::Workspace;

/// Manifest that declares the minimum supported runtime.
pub const MANIFEST: &str = "rails.gemspec";

/// Floor used when the manifest does not declare one.
pub const DEFAULT_MIN_VERSION: Version = Version::new(2, 0);

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_BUILD_ID: &str = "local";
pub const DEFAULT_IMAGE_REPOSITORY: &str = "buildkite-config-base";

static STABLE_BRANCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A[0-9-]+(?:-stable)?\z").expect("valid regex"));

static MIN_RUBY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"required_ruby_version[^0-9]+([0-9]+\.[0-9]+)").expect("valid regex")
});

/// Immutable description of the build being generated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub queue: String,
    pub base_branch: String,
    pub local_branch: String,
    pub pull_request: Option<String>,
    pub build_id: String,
    pub rebuild_from: Option<String>,
    pub image_repository: String,
    pub min_version: Version,
}

impl BuildContext {
    /// Reads the context from the process environment.
    pub fn from_env(workspace: &dyn Workspace) -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), workspace)
    }

    /// Reads the context through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F, workspace: &dyn Workspace) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let local_branch = var("BUILDKITE_BRANCH");
        let base_branch = var("BUILDKITE_PULL_REQUEST_BASE_BRANCH").or_else(|| local_branch.clone());

        let manifest = workspace.read_to_string(MANIFEST)?;
        let min_version = parse_min_version(&manifest).unwrap_or_else(|| {
            warn!(manifest = MANIFEST, fallback = %DEFAULT_MIN_VERSION, "no minimum runtime declared");
            DEFAULT_MIN_VERSION
        });

        let ctx = Self {
            queue: var("BUILDKITE_AGENT_META_DATA_QUEUE").unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
            base_branch: base_branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            local_branch: local_branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            pull_request: var("BUILDKITE_PULL_REQUEST").filter(|v| v != "false"),
            build_id: var("BUILDKITE_BUILD_ID").unwrap_or_else(|| DEFAULT_BUILD_ID.to_string()),
            rebuild_from: var("BUILDKITE_REBUILT_FROM_BUILD_ID"),
            image_repository: var("DOCKER_IMAGE")
                .unwrap_or_else(|| DEFAULT_IMAGE_REPOSITORY.to_string()),
            min_version,
        };
        debug!(?ctx, mainline = ctx.is_mainline(), "build context");
        Ok(ctx)
    }

    /// True for `master` and numbered stable branches such as `7-1-stable`.
    pub fn is_mainline(&self) -> bool {
        is_mainline_branch(&self.local_branch)
    }

    /// Branches named `owner:branch` come from forks.
    pub fn is_fork(&self) -> bool {
        self.local_branch.contains(':')
    }
}

pub fn is_mainline_branch(branch: &str) -> bool {
    branch == DEFAULT_BRANCH || STABLE_BRANCH.is_match(branch)
}

/// Pulls the `MAJOR.MINOR` floor out of a gemspec.
pub fn parse_min_version(manifest: &str) -> Option<Version> {
    let caps = MIN_RUBY.captures(manifest)?;
    caps[1].parse().ok()
}
