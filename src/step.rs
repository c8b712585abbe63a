//! Test steps: the step record, its plugin blocks, and the builder that
//! turns a catalog target into a step.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use tracing::debug;

use crate::context::BuildContext;
use crate::image::ImageTagResolver;
use crate::version::RuntimeVersion;
use crate::workspace::Workspace;

pub const ARTIFACTS_PLUGIN: &str = "artifacts#v1.2.0";
pub const DOCKER_COMPOSE_PLUGIN: &str = "docker-compose#v3.0.0";
pub const COMPOSE_CONFIG: &str = ".buildkite/docker-compose.yml";

/// Group for steps that run outside the shared per-runtime batch.
pub const ISOLATED_GROUP: &str = "isolated";

pub const STEP_TIMEOUT_MINUTES: u32 = 30;

const STEP_ARTIFACTS: &[&str] = &[".buildkite/*", ".buildkite/**/*"];
const COMPOSE_ENV: &[&str] = &["PRE_STEPS", "RACK"];

static TEST_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[:_]test|test:").expect("valid regex"));

// =============================================================================
// TARGET
// =============================================================================

/// A catalog entry: run `task` in `directory` on compose service `service`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSpec {
    pub directory: &'static str,
    pub task: &'static str,
    pub service: &'static str,
}

impl TargetSpec {
    pub const fn new(directory: &'static str, task: &'static str, service: &'static str) -> Self {
        Self {
            directory,
            task,
            service,
        }
    }

    /// Name of the isolated flavour of this target's task.
    ///
    /// `test` becomes `test:isolated`, `mysql2:test` becomes `mysql2:isolated_test`.
    pub fn isolated_task(&self) -> String {
        match self.task.strip_suffix("test") {
            Some("") => "test:isolated".to_string(),
            Some(prefix) => format!("{}isolated_test", prefix),
            None => format!("{}:isolated", self.task),
        }
    }
}

// =============================================================================
// PLUGINS
// =============================================================================

/// Config block for the artifacts plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactsConfig {
    pub download: Vec<String>,
}

/// Config block for the docker-compose plugin, used both to run tests and
/// to build runtime images.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ComposeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    pub config: String,
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cache_from: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub push: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_repository: Option<String>,
}

/// One entry of a step's `plugins` list. Serializes as `{<plugin-ref>: <config>}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plugin {
    Artifacts(ArtifactsConfig),
    DockerCompose(ComposeConfig),
}

impl Plugin {
    pub fn artifacts(globs: &[&str]) -> Self {
        Plugin::Artifacts(ArtifactsConfig {
            download: globs.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Compose block that runs a step inside `service`.
    pub fn compose_run(service: &str) -> Self {
        Plugin::DockerCompose(ComposeConfig {
            run: Some(service.to_string()),
            pull: Some(service.to_string()),
            config: COMPOSE_CONFIG.to_string(),
            env: COMPOSE_ENV.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    pub fn reference(&self) -> &'static str {
        match self {
            Plugin::Artifacts(_) => ARTIFACTS_PLUGIN,
            Plugin::DockerCompose(_) => DOCKER_COMPOSE_PLUGIN,
        }
    }
}

impl Serialize for Plugin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Plugin::Artifacts(config) => map.serialize_entry(self.reference(), config)?,
            Plugin::DockerCompose(config) => map.serialize_entry(self.reference(), config)?,
        }
        map.end()
    }
}

// =============================================================================
// STEP
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Agents {
    pub queue: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutomaticRetry {
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub automatic: AutomaticRetry,
}

/// A test step in the generated pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepSpec {
    pub label: String,
    pub command: String,
    /// Bucket the step is grouped under; never emitted.
    #[serde(skip)]
    pub group: String,
    pub plugins: Vec<Plugin>,
    pub env: IndexMap<String, String>,
    pub timeout_in_minutes: u32,
    pub soft_fail: bool,
    pub agents: Agents,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,
}

impl StepSpec {
    pub fn is_isolated(&self) -> bool {
        self.group == ISOLATED_GROUP
    }

    fn compose_mut(&mut self) -> Option<&mut ComposeConfig> {
        self.plugins.iter_mut().find_map(|plugin| match plugin {
            Plugin::DockerCompose(config) => Some(config),
            Plugin::Artifacts(_) => None,
        })
    }
}

// =============================================================================
// OVERRIDES
// =============================================================================

/// Adjustment applied to a step after all defaults are set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOverride {
    /// Sets `retry.automatic.limit`.
    Retry { limit: u32 },
    /// Sets `parallelism`.
    Parallelism(u32),
    /// Appends to `label` verbatim.
    LabelSuffix(String),
    /// Runs the step in another compose service.
    Service(String),
    /// Sets a step env var and passes it through to the compose service.
    Env { key: String, value: String },
}

impl StepOverride {
    pub fn label_suffix(suffix: &str) -> Self {
        StepOverride::LabelSuffix(suffix.to_string())
    }

    pub fn service(service: &str) -> Self {
        StepOverride::Service(service.to_string())
    }

    pub fn env(key: &str, value: &str) -> Self {
        StepOverride::Env {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn apply(&self, step: &mut StepSpec) {
        match self {
            StepOverride::Retry { limit } => {
                step.retry = Some(RetryPolicy {
                    automatic: AutomaticRetry { limit: *limit },
                });
            }
            StepOverride::Parallelism(n) => step.parallelism = Some(*n),
            StepOverride::LabelSuffix(suffix) => step.label.push_str(suffix),
            StepOverride::Service(service) => {
                if let Some(compose) = step.compose_mut() {
                    compose.run = Some(service.clone());
                    compose.pull = Some(service.clone());
                }
            }
            StepOverride::Env { key, value } => {
                step.env.insert(key.clone(), value.clone());
                if let Some(compose) = step.compose_mut() {
                    if !compose.env.contains(key) {
                        compose.env.push(key.clone());
                    }
                }
            }
        }
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Synthesizes test steps for catalog targets.
pub struct StepBuilder<'a> {
    ctx: &'a BuildContext,
    workspace: &'a dyn Workspace,
    default_runtime: RuntimeVersion,
}

impl<'a> StepBuilder<'a> {
    pub fn new(
        ctx: &'a BuildContext,
        workspace: &'a dyn Workspace,
        default_runtime: RuntimeVersion,
    ) -> Self {
        Self {
            ctx,
            workspace,
            default_runtime,
        }
    }

    /// Builds the step for `target` running `task`, or `None` when the
    /// target directory is not in the workspace.
    ///
    /// Without a runtime the step runs on the default runtime. `overrides`
    /// are applied in order once every default is in place.
    pub fn build(
        &self,
        target: &TargetSpec,
        task: &str,
        runtime: Option<&RuntimeVersion>,
        overrides: &[StepOverride],
    ) -> Option<StepSpec> {
        if !self.workspace.exists(target.directory) {
            debug!(directory = target.directory, task, "skipping missing target");
            return None;
        }

        let runtime_or_default = runtime.copied().unwrap_or(self.default_runtime);
        let resolver = ImageTagResolver::new(self.ctx);

        let group = if task.contains(ISOLATED_GROUP) {
            ISOLATED_GROUP.to_string()
        } else {
            runtime_or_default.image()
        };

        let mut env = IndexMap::new();
        env.insert(
            "IMAGE_NAME".to_string(),
            resolver.run_image(&runtime_or_default),
        );

        let mut step = StepSpec {
            label: label_for(target.directory, task, runtime),
            command: command_for(target.directory, task),
            group,
            plugins: vec![
                Plugin::artifacts(STEP_ARTIFACTS),
                Plugin::compose_run(target.service),
            ],
            env,
            timeout_in_minutes: STEP_TIMEOUT_MINUTES,
            soft_fail: runtime.is_some_and(RuntimeVersion::is_nightly),
            agents: Agents {
                queue: self.ctx.queue.clone(),
            },
            retry: None,
            parallelism: None,
        };

        for adjustment in overrides {
            adjustment.apply(&mut step);
        }
        Some(step)
    }
}

/// `<directory> <task>` with the test token dropped, plus the runtime.
///
/// `activerecord mysql2:test` on 3.2 reads `activerecord mysql2 (3.2)`.
pub fn label_for(directory: &str, task: &str, runtime: Option<&RuntimeVersion>) -> String {
    let mut label = format!("{} {}", directory, TEST_TOKEN.replacen(task, 1, ""));
    label = label.replacen(" test", "", 1);
    if let Some(runtime) = runtime {
        label.push_str(&format!(" ({})", runtime.short_name()));
    }
    label
}

/// Fuses the schema rebuild into database-backed tasks.
pub fn rewrite_task(task: &str) -> String {
    if task.starts_with("mysql2:") {
        format!("db:mysql:rebuild {}", task)
    } else if task.starts_with("postgresql:") {
        format!("db:postgresql:rebuild {}", task)
    } else {
        task.to_string()
    }
}

pub fn command_for(directory: &str, task: &str) -> String {
    let task = rewrite_task(task);
    format!(
        "echo \"+++ :rake: {dir} {task}\" && cd {dir} && bundle exec rake {task}",
        dir = directory,
        task = task
    )
}
