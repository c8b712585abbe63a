//! kite-matrix - the Rails test matrix as a generated CI pipeline
//!
//! Discovers the runtime versions to test against, crosses them with the
//! catalog of framework suites, and emits an ordered, grouped pipeline
//! preceded by an image build stage.
//!
//! # Simple usage
//!
//! ```rust,no_run
//! use kite_matrix::{BuildContext, FsWorkspace, RegistryClient, VersionCatalog};
//!
//! fn main() -> kite_matrix::Result<()> {
//!     let ws = FsWorkspace::new("..");
//!     let ctx = BuildContext::from_env(&ws)?;
//!     let catalog = VersionCatalog::discover(&RegistryClient::default(), ctx.min_version)?;
//!
//!     let steps = kite_matrix::matrix::generate(&ctx, &catalog, &ws)?;
//!     kite_matrix::pipeline::assemble(&ctx, &catalog, steps).emit()
//! }
//! ```
//!
//! # Without the network or a checkout
//!
//! Every collaborator sits behind a trait, so a canned tag list and an
//! in-memory workspace are enough:
//!
//! ```rust
//! use kite_matrix::{Version, VersionCatalog};
//!
//! let tags = vec!["2.7".to_string(), "3.1".to_string(), "3.2-slim".to_string()];
//! let catalog = VersionCatalog::discover(&tags, Version::new(3, 0)).unwrap();
//! assert_eq!(catalog.releases(), &[Version::new(3, 1)]);
//! ```

pub mod context;
pub mod error;
pub mod image;
pub mod logging;
pub mod matrix;
pub mod pipeline;
pub mod registry;
pub mod step;
pub mod version;
pub mod workspace;

pub use context::BuildContext;
pub use error::{Error, Result};
pub use image::ImageTagResolver;
pub use matrix::MatrixGenerator;
pub use pipeline::{Pipeline, Stage};
pub use registry::{RegistryClient, TagSource};
pub use step::{StepBuilder, StepOverride, StepSpec, TargetSpec};
pub use version::{RuntimeVersion, Version, VersionCatalog};
pub use workspace::{FsWorkspace, ParallelProbe, Workspace};

/// Runs the whole generation: context, runtime discovery, matrix, assembly.
pub fn generate(workspace: &dyn Workspace, ctx: &BuildContext, tags: &dyn TagSource) -> Result<Pipeline> {
    let catalog = VersionCatalog::discover(tags, ctx.min_version)?;
    let steps = matrix::generate(ctx, &catalog, workspace)?;
    Ok(pipeline::assemble(ctx, &catalog, steps))
}
