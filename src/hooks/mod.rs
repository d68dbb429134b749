// src/hooks/mod.rs

//! Build hook registry
//!
//! Hooks observe the pipeline between phases and may mutate the
//! recipe before sources are fetched. Extension modules implement
//! [`BuildHook`], overriding only the events they care about, and are
//! registered by name before any pipeline runs; the registry is
//! read-only afterwards. Events fire in registration order, and a
//! failing handler aborts the pipeline.
//!
//! How hook code gets into the process (static registration, dynamic
//! load by path) is the entry point's concern; the registry only
//! dispatches.

use crate::error::{Error, Result};
use crate::recipe::Recipe;
use std::path::Path;

/// Phase-independent context handed to every hook.
///
/// This is the narrow capability surface hooks get besides the recipe
/// itself: where the build is happening and which package is being
/// processed, when one is in scope.
#[derive(Clone, Copy)]
pub struct HookContext<'a> {
    /// Architecture whose pipeline is running
    pub arch: &'a str,

    /// Per-architecture work directory
    pub work_dir: &'a Path,

    /// Directory archives are emitted into
    pub dist_dir: &'a Path,

    /// Package in scope for per-package events
    pub package: Option<&'a str>,
}

/// An extension module observing or mutating pipeline state.
///
/// Every handler defaults to a no-op. Handlers returning an error
/// abort the pipeline with [`Error::Hook`].
#[allow(unused_variables)]
pub trait BuildHook {
    /// After the recipe is parsed; the recipe may be mutated here
    fn post_parse(&self, ctx: &HookContext, recipe: &mut Recipe) -> anyhow::Result<()> {
        Ok(())
    }

    /// After all sources are fetched, verified, and extracted
    fn post_fetch_sources(
        &self,
        ctx: &HookContext,
        recipe: &Recipe,
        src_dir: &Path,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// After the prepare() script ran
    fn post_prepare(&self, ctx: &HookContext, recipe: &Recipe, src_dir: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    /// After the build() script ran
    fn post_build(&self, ctx: &HookContext, recipe: &Recipe, src_dir: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    /// After one package's package() script populated its staging tree
    fn post_package(
        &self,
        ctx: &HookContext,
        recipe: &Recipe,
        src_dir: &Path,
        pkg_dir: &Path,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// After one package's archive was written
    fn post_archive(&self, ctx: &HookContext, recipe: &Recipe, ar_path: &Path) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered collection of registered hooks.
#[derive(Default)]
pub struct HookRegistry {
    entries: Vec<(String, Box<dyn BuildHook>)>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook under a module name. Hooks fire in
    /// registration order.
    pub fn register(&mut self, name: impl Into<String>, hook: Box<dyn BuildHook>) {
        self.entries.push((name.into(), hook));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn dispatch<F>(&self, event: &'static str, mut call: F) -> Result<()>
    where
        F: FnMut(&dyn BuildHook) -> anyhow::Result<()>,
    {
        for (name, hook) in &self.entries {
            call(hook.as_ref()).map_err(|e| Error::Hook {
                event,
                module: name.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn fire_post_parse(&self, ctx: &HookContext, recipe: &mut Recipe) -> Result<()> {
        self.dispatch("post_parse", |hook| hook.post_parse(ctx, recipe))
    }

    pub fn fire_post_fetch_sources(
        &self,
        ctx: &HookContext,
        recipe: &Recipe,
        src_dir: &Path,
    ) -> Result<()> {
        self.dispatch("post_fetch_sources", |hook| {
            hook.post_fetch_sources(ctx, recipe, src_dir)
        })
    }

    pub fn fire_post_prepare(&self, ctx: &HookContext, recipe: &Recipe, src_dir: &Path) -> Result<()> {
        self.dispatch("post_prepare", |hook| hook.post_prepare(ctx, recipe, src_dir))
    }

    pub fn fire_post_build(&self, ctx: &HookContext, recipe: &Recipe, src_dir: &Path) -> Result<()> {
        self.dispatch("post_build", |hook| hook.post_build(ctx, recipe, src_dir))
    }

    pub fn fire_post_package(
        &self,
        ctx: &HookContext,
        recipe: &Recipe,
        src_dir: &Path,
        pkg_dir: &Path,
    ) -> Result<()> {
        self.dispatch("post_package", |hook| {
            hook.post_package(ctx, recipe, src_dir, pkg_dir)
        })
    }

    pub fn fire_post_archive(&self, ctx: &HookContext, recipe: &Recipe, ar_path: &Path) -> Result<()> {
        self.dispatch("post_archive", |hook| hook.post_archive(ctx, recipe, ar_path))
    }
}
