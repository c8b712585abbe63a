//! Pipeline assembly: ordering, grouping, the image build stage, and YAML
//! emission.

use std::cmp::Reverse;
use std::io::{self, Write};

use indexmap::IndexMap;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use tracing::info;

use crate::context::BuildContext;
use crate::error::Result;
use crate::image::ImageTagResolver;
use crate::step::{Agents, ComposeConfig, Plugin, StepSpec, COMPOSE_CONFIG};
use crate::version::{RuntimeVersion, VersionCatalog};

pub const BUILD_GROUP: &str = "build";
pub const BUILD_TIMEOUT_MINUTES: u32 = 15;

/// Compose service that builds runtime images.
const BUILD_SERVICE: &str = "base";

const BUILD_ARTIFACTS: &[&str] = &[
    ".dockerignore",
    ".buildkite/*",
    ".buildkite/**/*",
    "*.gemspec",
    "**/*.gemspec",
    "Gemfile",
    "Gemfile.lock",
    "package.json",
    "**/package.json",
    "yarn.lock",
];
const BUILD_ENV: &[&str] = &["PRE_STEPS", "RACK"];

// =============================================================================
// DOCUMENT
// =============================================================================

/// Builds one runtime image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStep {
    pub label: String,
    pub plugins: Vec<Plugin>,
    pub env: IndexMap<String, String>,
    pub timeout_in_minutes: u32,
    pub soft_fail: bool,
    pub agents: Agents,
}

/// One entry of the top-level `steps` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Waits for everything before it to finish.
    Wait,
    /// The image build stage.
    Build(Vec<BuildStep>),
    /// Test steps sharing a group.
    Group { name: String, steps: Vec<StepSpec> },
}

#[derive(Serialize)]
struct GroupDoc<'a, T> {
    group: &'a str,
    steps: &'a [T],
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Stage::Wait => serializer.serialize_str("wait"),
            Stage::Build(steps) => GroupDoc {
                group: BUILD_GROUP,
                steps: steps.as_slice(),
            }
            .serialize(serializer),
            Stage::Group { name, steps } => GroupDoc {
                group: name.as_str(),
                steps: steps.as_slice(),
            }
            .serialize(serializer),
        }
    }
}

/// The generated pipeline document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

impl Serialize for Pipeline {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("steps", &self.stages)?;
        map.end()
    }
}

impl Pipeline {
    /// Renders the pipeline as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yml::to_string(self)?)
    }

    /// Writes the pipeline YAML to the given writer.
    pub fn emit_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(self.to_yaml()?.as_bytes())?;
        w.flush()?;
        Ok(())
    }

    /// Writes the pipeline YAML to stdout.
    pub fn emit(&self) -> Result<()> {
        self.emit_to(&mut io::stdout().lock())
    }
}

// =============================================================================
// ASSEMBLY
// =============================================================================

/// Orders steps so long and general work is scheduled first.
///
/// Keys, in order: longer timeout first, isolated group last, `test:` tasks
/// last, then label. The sort is stable.
pub fn sort_steps(steps: &mut [StepSpec]) {
    steps.sort_by_cached_key(|step| {
        (
            Reverse(step.timeout_in_minutes),
            step.is_isolated(),
            step.command.contains("test:"),
            step.label.clone(),
        )
    });
}

/// Buckets steps by group, keeping first-seen group order.
pub fn group_steps(steps: Vec<StepSpec>) -> Vec<Stage> {
    let mut groups: IndexMap<String, Vec<StepSpec>> = IndexMap::new();
    for step in steps {
        groups.entry(step.group.clone()).or_default().push(step);
    }
    groups
        .into_iter()
        .map(|(name, steps)| Stage::Group { name, steps })
        .collect()
}

/// The image build step for one runtime.
pub fn build_step(ctx: &BuildContext, runtime: &RuntimeVersion) -> BuildStep {
    let resolver = ImageTagResolver::new(ctx);
    let service_ref = |image: String| format!("{}:{}", BUILD_SERVICE, image);

    let compose = ComposeConfig {
        build: Some(BUILD_SERVICE.to_string()),
        config: COMPOSE_CONFIG.to_string(),
        env: BUILD_ENV.iter().map(|s| s.to_string()).collect(),
        image_name: Some(resolver.build_tag(runtime)),
        cache_from: resolver
            .cache_chain(runtime)
            .into_iter()
            .map(service_ref)
            .collect(),
        push: vec![service_ref(resolver.push_target(runtime))],
        image_repository: Some(ctx.image_repository.clone()),
        ..Default::default()
    };

    let mut env = IndexMap::new();
    env.insert("RUBY_IMAGE".to_string(), runtime.image());

    BuildStep {
        label: format!(":docker: {}", runtime.image()),
        plugins: vec![
            Plugin::artifacts(BUILD_ARTIFACTS),
            Plugin::DockerCompose(compose),
        ],
        env,
        timeout_in_minutes: BUILD_TIMEOUT_MINUTES,
        soft_fail: runtime.is_nightly(),
        agents: Agents {
            queue: ctx.queue.clone(),
        },
    }
}

/// Wraps the generated test steps with the image build stage.
pub fn assemble(ctx: &BuildContext, catalog: &VersionCatalog, mut steps: Vec<StepSpec>) -> Pipeline {
    sort_steps(&mut steps);

    let builds = catalog
        .runtimes()
        .iter()
        .map(|runtime| build_step(ctx, runtime))
        .collect();

    let mut stages = vec![Stage::Wait, Stage::Build(builds), Stage::Wait];
    stages.extend(group_steps(steps));

    info!(stages = stages.len(), "assembled pipeline");
    Pipeline { stages }
}
