//! Image tag naming and the cache-fallback chain for runtime images.

use crate::context::{BuildContext, DEFAULT_BRANCH};
use crate::version::RuntimeVersion;

/// Replaces every character outside `[A-Za-z0-9]` with `-`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Tag for `runtime` keyed by `discriminator`, e.g. `ruby-3-2-br-master`.
pub fn tag(runtime: &RuntimeVersion, discriminator: &str) -> String {
    format!("{}-{}", sanitize(&runtime.image()), discriminator)
}

/// Derives every image reference a build needs from its context.
#[derive(Debug, Clone, Copy)]
pub struct ImageTagResolver<'a> {
    ctx: &'a BuildContext,
}

impl<'a> ImageTagResolver<'a> {
    pub fn new(ctx: &'a BuildContext) -> Self {
        Self { ctx }
    }

    /// `<repository>:<tag>` for `runtime` keyed by `discriminator`.
    pub fn image_ref(&self, runtime: &RuntimeVersion, discriminator: &str) -> String {
        format!("{}:{}", self.ctx.image_repository, tag(runtime, discriminator))
    }

    /// Tag the build stage produces for this build.
    pub fn build_tag(&self, runtime: &RuntimeVersion) -> String {
        tag(runtime, &self.ctx.build_id)
    }

    /// Image the test steps of this build run on.
    pub fn run_image(&self, runtime: &RuntimeVersion) -> String {
        self.image_ref(runtime, &self.ctx.build_id)
    }

    /// Images to seed the build cache from, most specific first.
    ///
    /// Fork branches (`owner:branch`) never contribute a branch entry;
    /// `master` is always the last resort.
    pub fn cache_chain(&self, runtime: &RuntimeVersion) -> Vec<String> {
        let ctx = self.ctx;
        let candidates = [
            ctx.rebuild_from.clone(),
            ctx.pull_request.as_ref().map(|pr| format!("pr-{}", pr)),
            Some(&ctx.local_branch)
                .filter(|_| !ctx.is_fork())
                .map(|branch| format!("br-{}", branch)),
            Some(format!("br-{}", ctx.base_branch)),
            Some(format!("br-{}", DEFAULT_BRANCH)),
        ];

        let mut chain: Vec<String> = Vec::with_capacity(candidates.len());
        for discriminator in candidates.into_iter().flatten() {
            if discriminator.is_empty() {
                continue;
            }
            let image = self.image_ref(runtime, &discriminator);
            if !chain.contains(&image) {
                chain.push(image);
            }
        }
        chain
    }

    /// Where the built image is pushed: the PR tag for forks, else the branch tag.
    pub fn push_target(&self, runtime: &RuntimeVersion) -> String {
        match (&self.ctx.pull_request, self.ctx.is_fork()) {
            (Some(pr), true) => self.image_ref(runtime, &format!("pr-{}", pr)),
            _ => self.image_ref(runtime, &format!("br-{}", self.ctx.local_branch)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    fn ctx() -> BuildContext {
        BuildContext {
            queue: "default".to_string(),
            base_branch: "master".to_string(),
            local_branch: "feature".to_string(),
            pull_request: None,
            build_id: "b1".to_string(),
            rebuild_from: Some("R".to_string()),
            image_repository: "registry.example/builds".to_string(),
            min_version: Version::new(3, 0),
        }
    }

    const RUBY_32: RuntimeVersion = RuntimeVersion::Release(Version::new(3, 2));

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("ruby:3.2"), "ruby-3-2");
        assert_eq!(
            sanitize("rubylang/ruby:master-nightly-bionic"),
            "rubylang-ruby-master-nightly-bionic"
        );
        for name in ["ruby:3.2", "a b/c_d", "plain", ""] {
            assert_eq!(sanitize(&sanitize(name)), sanitize(name));
        }
    }

    #[test]
    fn test_tag() {
        assert_eq!(tag(&RUBY_32, "br-master"), "ruby-3-2-br-master");
        assert_eq!(
            tag(&RuntimeVersion::Nightly, "pr-7"),
            "rubylang-ruby-master-nightly-bionic-pr-7"
        );
    }

    #[test]
    fn test_run_image_and_build_tag() {
        let ctx = ctx();
        let resolver = ImageTagResolver::new(&ctx);
        assert_eq!(resolver.build_tag(&RUBY_32), "ruby-3-2-b1");
        assert_eq!(resolver.run_image(&RUBY_32), "registry.example/builds:ruby-3-2-b1");
    }

    #[test]
    fn test_cache_chain_collapses_master() {
        let ctx = ctx();
        let resolver = ImageTagResolver::new(&ctx);

        assert_eq!(
            resolver.cache_chain(&RUBY_32),
            vec![
                resolver.image_ref(&RUBY_32, "R"),
                resolver.image_ref(&RUBY_32, "br-feature"),
                resolver.image_ref(&RUBY_32, "br-master"),
            ]
        );
    }

    #[test]
    fn test_cache_chain_full() {
        let ctx = BuildContext {
            pull_request: Some("42".to_string()),
            base_branch: "7-1-stable".to_string(),
            ..ctx()
        };
        let resolver = ImageTagResolver::new(&ctx);

        let chain = resolver.cache_chain(&RUBY_32);
        assert_eq!(
            chain,
            vec![
                resolver.image_ref(&RUBY_32, "R"),
                resolver.image_ref(&RUBY_32, "pr-42"),
                resolver.image_ref(&RUBY_32, "br-feature"),
                resolver.image_ref(&RUBY_32, "br-7-1-stable"),
                resolver.image_ref(&RUBY_32, "br-master"),
            ]
        );
    }

    #[test]
    fn test_cache_chain_skips_fork_branch() {
        let ctx = BuildContext {
            local_branch: "someone:master".to_string(),
            pull_request: Some("42".to_string()),
            rebuild_from: None,
            ..ctx()
        };
        let resolver = ImageTagResolver::new(&ctx);

        let chain = resolver.cache_chain(&RUBY_32);
        assert_eq!(
            chain,
            vec![
                resolver.image_ref(&RUBY_32, "pr-42"),
                resolver.image_ref(&RUBY_32, "br-master"),
            ]
        );
        assert!(chain.iter().all(|image| !image.contains("someone")));
    }

    #[test]
    fn test_push_target() {
        let ctx = ctx();
        let resolver = ImageTagResolver::new(&ctx);
        assert_eq!(
            resolver.push_target(&RUBY_32),
            resolver.image_ref(&RUBY_32, "br-feature")
        );

        let fork = BuildContext {
            local_branch: "someone:feature".to_string(),
            pull_request: Some("42".to_string()),
            ..ctx
        };
        let resolver = ImageTagResolver::new(&fork);
        assert_eq!(
            resolver.push_target(&RUBY_32),
            resolver.image_ref(&RUBY_32, "pr-42")
        );
    }
}
