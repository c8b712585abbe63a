//! The test matrix: which targets run, on which runtimes, with which
//! special cases.

use tracing::{debug, info};

use crate::context::BuildContext;
use crate::error::Result;
use crate::step::{StepBuilder, StepOverride, StepSpec, TargetSpec};
use crate::version::{RuntimeVersion, VersionCatalog};
use crate::workspace::{ParallelProbe, Workspace};

/// Shards for isolated Active Record runs when its Rakefile supports them.
pub const ACTIVERECORD_PARALLELISM: u32 = 5;

/// Shards for Railties runs when its Rakefile supports them.
pub const RAILTIES_PARALLELISM: u32 = 12;

// =============================================================================
// CATALOG
// =============================================================================

/// Whether a target also gets an isolated run on mainline builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Every runtime, plus one isolated step on mainline.
    WithIsolated,
    /// Every runtime, never isolated.
    Standard,
}

/// A catalog entry with its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub target: TargetSpec,
    pub kind: TargetKind,
}

const fn with_isolated(directory: &'static str, task: &'static str, service: &'static str) -> CatalogEntry {
    CatalogEntry {
        target: TargetSpec::new(directory, task, service),
        kind: TargetKind::WithIsolated,
    }
}

const fn standard(directory: &'static str, task: &'static str, service: &'static str) -> CatalogEntry {
    CatalogEntry {
        target: TargetSpec::new(directory, task, service),
        kind: TargetKind::Standard,
    }
}

/// The Rails frameworks and their suites, in generation order.
pub const CATALOG: &[CatalogEntry] = &[
    with_isolated("actionpack", "test", "default"),
    with_isolated("actionmailer", "test", "default"),
    with_isolated("activemodel", "test", "default"),
    with_isolated("activesupport", "test", "default"),
    with_isolated("actionview", "test", "default"),
    with_isolated("activejob", "test", "default"),
    with_isolated("activerecord", "mysql2:test", "mysqldb"),
    with_isolated("activerecord", "postgresql:test", "postgresdb"),
    with_isolated("activerecord", "sqlite3:test", "default"),
    // These take long enough that running them twice is not worth it.
    standard("actioncable", "test", "default"),
    standard("actiontext", "test", "default"),
    standard("activestorage", "test", "default"),
    standard("actionmailbox", "test", "default"),
    standard("guides", "test", "default"),
];

// =============================================================================
// GENERATOR
// =============================================================================

/// Drives the step builder across the catalog and the runtime catalog.
pub struct MatrixGenerator<'a> {
    ctx: &'a BuildContext,
    workspace: &'a dyn Workspace,
    probe: Option<&'a dyn ParallelProbe>,
    runtimes: Vec<RuntimeVersion>,
    builder: StepBuilder<'a>,
    steps: Vec<StepSpec>,
}

impl<'a> MatrixGenerator<'a> {
    /// A generator whose parallelism probe reads the workspace itself.
    pub fn new(ctx: &'a BuildContext, catalog: &VersionCatalog, workspace: &'a dyn Workspace) -> Self {
        Self {
            ctx,
            workspace,
            probe: None,
            runtimes: catalog.runtimes(),
            builder: StepBuilder::new(ctx, workspace, catalog.default_runtime()),
            steps: Vec::new(),
        }
    }

    /// Answers parallel-support questions with `probe` instead of the workspace.
    pub fn with_probe(
        ctx: &'a BuildContext,
        catalog: &VersionCatalog,
        workspace: &'a dyn Workspace,
        probe: &'a dyn ParallelProbe,
    ) -> Self {
        Self {
            probe: Some(probe),
            ..Self::new(ctx, catalog, workspace)
        }
    }

    /// Produces every test step in insertion order.
    pub fn generate(mut self) -> Result<Vec<StepSpec>> {
        for entry in CATALOG {
            self.every_runtime(&entry.target, entry.target.task, &[]);

            if entry.kind == TargetKind::WithIsolated && self.ctx.is_mainline() {
                let overrides = if entry.target.directory == "activerecord" {
                    self.parallel_override("activerecord", ACTIVERECORD_PARALLELISM)?
                } else {
                    Vec::new()
                };
                self.once(&entry.target, &entry.target.isolated_task(), &overrides);
            }
        }

        self.special_cases()?;

        info!(count = self.steps.len(), "generated test steps");
        Ok(self.steps)
    }

    fn special_cases(&mut self) -> Result<()> {
        let sqlite_mem = TargetSpec::new("activerecord", "sqlite3_mem:test", "default");
        self.once(&sqlite_mem, sqlite_mem.task, &[]);

        let mariadb = TargetSpec::new("activerecord", "mysql2:test", "mysqldb");
        self.once(
            &mariadb,
            mariadb.task,
            &[
                StepOverride::label_suffix(" [mariadb]"),
                StepOverride::env("MYSQL_IMAGE", "mariadb:latest"),
            ],
        );

        let cable = TargetSpec::new("actioncable", "test:integration", "default");
        self.every_runtime(&cable, cable.task, &[StepOverride::Retry { limit: 3 }]);

        let ujs = TargetSpec::new("actionview", "test:ujs", "default");
        self.once(&ujs, ujs.task, &[StepOverride::service("actionview")]);

        let job = TargetSpec::new("activejob", "test:integration", "activejob");
        self.every_runtime(&job, job.task, &[]);

        let railties = TargetSpec::new("railties", "test", "railties");
        let overrides = self.parallel_override(railties.directory, RAILTIES_PARALLELISM)?;
        self.every_runtime(&railties, railties.task, &overrides);

        Ok(())
    }

    /// One step per runtime.
    fn every_runtime(&mut self, target: &TargetSpec, task: &str, overrides: &[StepOverride]) {
        for runtime in &self.runtimes {
            if let Some(step) = self.builder.build(target, task, Some(runtime), overrides) {
                self.steps.push(step);
            }
        }
    }

    /// A single step on the default runtime.
    fn once(&mut self, target: &TargetSpec, task: &str, overrides: &[StepOverride]) {
        if let Some(step) = self.builder.build(target, task, None, overrides) {
            self.steps.push(step);
        }
    }

    /// `Parallelism(count)` when `directory` exists and supports sharding.
    fn parallel_override(&self, directory: &str, count: u32) -> Result<Vec<StepOverride>> {
        if !self.workspace.exists(directory) {
            return Ok(Vec::new());
        }
        let supported = match self.probe {
            Some(probe) => probe.supports_parallel(directory)?,
            None => self.workspace.supports_parallel(directory)?,
        };
        if !supported {
            return Ok(Vec::new());
        }
        debug!(directory, count, "parallel runs supported");
        Ok(vec![StepOverride::Parallelism(count)])
    }
}

/// Convenience wrapper: generate the full step list for a context.
pub fn generate(
    ctx: &BuildContext,
    catalog: &VersionCatalog,
    workspace: &dyn Workspace,
) -> Result<Vec<StepSpec>> {
    MatrixGenerator::new(ctx, catalog, workspace).generate()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::step::ISOLATED_GROUP;
    use crate::version::Version;

    struct Dirs(Vec<&'static str>);

    impl Workspace for Dirs {
        fn exists(&self, path: &str) -> bool {
            self.0.contains(&path)
        }

        fn read_to_string(&self, _path: &str) -> Result<String> {
            Ok("ENV[\"BUILDKITE_PARALLEL_JOB_COUNT\"]".to_string())
        }
    }

    struct CountingProbe {
        answer: bool,
        calls: Cell<usize>,
    }

    impl ParallelProbe for CountingProbe {
        fn supports_parallel(&self, _directory: &str) -> Result<bool> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.answer)
        }
    }

    fn ctx(branch: &str) -> BuildContext {
        BuildContext {
            queue: "default".to_string(),
            base_branch: "master".to_string(),
            local_branch: branch.to_string(),
            pull_request: None,
            build_id: "b1".to_string(),
            rebuild_from: None,
            image_repository: "builds".to_string(),
            min_version: Version::new(3, 0),
        }
    }

    fn catalog() -> VersionCatalog {
        VersionCatalog::from_tags(&["2.7", "3.0", "3.1", "bogus", "3.2rc1"], Version::new(3, 0))
            .unwrap()
    }

    fn labels(steps: &[StepSpec]) -> Vec<&str> {
        steps.iter().map(|s| s.label.as_str()).collect()
    }

    #[test]
    fn test_single_target_mainline() {
        let ctx = ctx("master");
        let ws = Dirs(vec!["actionpack"]);

        let steps = generate(&ctx, &catalog(), &ws).unwrap();
        assert_eq!(
            labels(&steps),
            vec![
                "actionpack (3.0)",
                "actionpack (3.1)",
                "actionpack (trunk)",
                "actionpack isolated",
            ]
        );
        assert_eq!(steps.iter().filter(|s| s.is_isolated()).count(), 1);
        assert!(steps[2].soft_fail);
        assert_eq!(steps[3].group, ISOLATED_GROUP);
        assert_eq!(steps[3].parallelism, None);
    }

    #[test]
    fn test_no_isolated_steps_off_mainline() {
        let ctx = ctx("feature");
        let ws = Dirs(vec!["actionpack", "activerecord"]);

        let steps = generate(&ctx, &catalog(), &ws).unwrap();
        assert!(steps.iter().all(|s| !s.is_isolated()));
    }

    #[test]
    fn test_standard_targets_never_isolated() {
        let ctx = ctx("master");
        let ws = Dirs(vec!["actiontext", "guides"]);

        let steps = generate(&ctx, &catalog(), &ws).unwrap();
        assert_eq!(steps.len(), 6);
        assert!(steps.iter().all(|s| !s.is_isolated()));
    }

    #[test]
    fn test_activerecord_isolated_parallelism() {
        let ctx = ctx("7-1-stable");
        let ws = Dirs(vec!["activerecord"]);
        let probe = CountingProbe {
            answer: true,
            calls: Cell::new(0),
        };

        let steps = MatrixGenerator::with_probe(&ctx, &catalog(), &ws, &probe)
            .generate()
            .unwrap();

        let isolated: Vec<_> = steps.iter().filter(|s| s.is_isolated()).collect();
        assert_eq!(isolated.len(), 3);
        assert!(isolated
            .iter()
            .all(|s| s.parallelism == Some(ACTIVERECORD_PARALLELISM)));
        assert_eq!(
            isolated.iter().map(|s| s.label.as_str()).collect::<Vec<_>>(),
            vec![
                "activerecord mysql2:isolated",
                "activerecord postgresql:isolated",
                "activerecord sqlite3:isolated",
            ]
        );
        // railties is absent, so only the three activerecord entries ask
        assert_eq!(probe.calls.get(), 3);
    }

    #[test]
    fn test_activerecord_special_cases() {
        let ctx = ctx("feature");
        let ws = Dirs(vec!["activerecord"]);

        let steps = generate(&ctx, &catalog(), &ws).unwrap();
        let tail = &steps[steps.len() - 2..];
        assert_eq!(labels(tail), vec!["activerecord sqlite3_mem", "activerecord mysql2 [mariadb]"]);
        assert_eq!(tail[1].group, "ruby:3.1");
        assert_eq!(tail[1].env["MYSQL_IMAGE"], "mariadb:latest");
    }

    #[test]
    fn test_special_case_sweeps() {
        let ctx = ctx("feature");
        let ws = Dirs(vec!["actioncable", "actionview", "activejob", "railties"]);

        let steps = generate(&ctx, &catalog(), &ws).unwrap();

        let cable: Vec<_> = steps
            .iter()
            .filter(|s| s.label.starts_with("actioncable integration"))
            .collect();
        assert_eq!(cable.len(), 3);
        assert!(cable.iter().all(|s| s.retry.map(|r| r.automatic.limit) == Some(3)));

        let ujs: Vec<_> = steps.iter().filter(|s| s.label == "actionview ujs").collect();
        assert_eq!(ujs.len(), 1);

        let jobs = steps
            .iter()
            .filter(|s| s.label.starts_with("activejob integration"))
            .count();
        assert_eq!(jobs, 3);

        let railties: Vec<_> = steps
            .iter()
            .filter(|s| s.label.starts_with("railties"))
            .collect();
        assert_eq!(railties.len(), 3);
        assert!(railties
            .iter()
            .all(|s| s.parallelism == Some(RAILTIES_PARALLELISM)));
    }

    #[test]
    fn test_probe_skipped_for_missing_directories() {
        let ctx = ctx("master");
        let ws = Dirs(vec!["actionpack"]);
        let probe = CountingProbe {
            answer: true,
            calls: Cell::new(0),
        };

        MatrixGenerator::with_probe(&ctx, &catalog(), &ws, &probe)
            .generate()
            .unwrap();
        assert_eq!(probe.calls.get(), 0);
    }
}
