// src/builder/mod.rs

//! Build pipeline
//!
//! Drives one recipe through the ordered build phases, per
//! architecture:
//!
//! ```text
//! START → PARSED → FETCHED → PREPARED → BUILT
//!               ↓         ↓          ↓       ↓ (for each package)
//!               hook      hook       hook    → PACKAGED → ARCHIVED → DONE
//! ```
//!
//! Hooks fire between phases in registration order; any phase failure
//! aborts the pipeline for the current architecture and leaves partial
//! outputs on disk for postmortem. Cancellation is honoured at every
//! phase boundary and while a script runs.
//!
//! Directory layout:
//!
//! ```text
//! <workdir>/<recipe>/<arch>/src/        $srcdir
//! <workdir>/<recipe>/<arch>/pkg/<name>  $pkgdir per package
//! <distdir>/<arch>/<name>_<ver>_<arch>.ipk
//! ```

use crate::error::{Error, Result};
use crate::executor::{BindMount, CancelToken, ExecRequest, Executor, OciExecutor};
use crate::hooks::{HookContext, HookRegistry};
use crate::recipe::{BuildRecipe, DEFAULT_ARCH, Package, Recipe};
use crate::source::{CurlFetcher, Fetcher};
use crate::version::DependencyKind;
use crate::ipk;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Mount point of `srcdir` inside the build environment
const MOUNT_SRC: &str = "/src";

/// Mount point of `pkgdir` inside the build environment
const MOUNT_PKG: &str = "/pkg";

/// Mount point of the dist directory, used as a local package feed
/// when installing target-host build dependencies
const MOUNT_DIST: &str = "/dist";

/// Toolchain triplet of the target device
const HOST_TRIPLET: &str = "armv7l-linux-gnueabihf";

/// Builds recipes and emits their package archives.
pub struct Builder {
    work_dir: PathBuf,
    dist_dir: PathBuf,
    fetcher: Box<dyn Fetcher>,
    executor: Box<dyn Executor>,
    hooks: HookRegistry,
    cancel: CancelToken,
}

impl Builder {
    /// Create a builder emitting archives into `dist_dir`, with the
    /// default curl fetcher and OCI executor.
    pub fn new(work_dir: impl Into<PathBuf>, dist_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            dist_dir: dist_dir.into(),
            fetcher: Box::new(CurlFetcher),
            executor: Box::new(OciExecutor::default()),
            hooks: HookRegistry::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Replace the fetch capability.
    pub fn with_fetcher(mut self, fetcher: Box<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replace the execution capability.
    pub fn with_executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Replace the hook registry.
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Token that cancels this builder's running pipelines.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Build every architecture of a recipe, in declaration order.
    ///
    /// Returns the paths of all emitted archives.
    pub fn make(&self, recipe: &mut Recipe) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.work_dir)?;
        fs::create_dir_all(&self.dist_dir)?;

        let mut outputs = Vec::new();
        for arch in recipe.archs.clone() {
            outputs.extend(self.make_arch(recipe, &arch)?);
        }
        Ok(outputs)
    }

    /// Build one architecture variant of a recipe.
    pub fn make_arch(&self, recipe: &mut Recipe, arch: &str) -> Result<Vec<PathBuf>> {
        let build_dir = self.work_dir.join(recipe.name()).join(arch);
        info!("building {} for {}", recipe.name(), arch);

        let ctx = HookContext {
            arch,
            work_dir: &build_dir,
            dist_dir: &self.dist_dir,
            package: None,
        };

        // PARSED: the recipe may still be mutated here
        self.check_cancel()?;
        self.hooks.fire_post_parse(&ctx, recipe)?;

        let variant = recipe
            .variant(arch)
            .ok_or_else(|| {
                Error::recipe(
                    &recipe.recipe_dir,
                    format!("no variant for architecture '{}'", arch),
                )
            })?
            .clone();

        let src_dir = build_dir.join("src");
        fs::create_dir_all(&src_dir)?;

        // FETCHED
        self.check_cancel()?;
        crate::source::acquire(
            &recipe.recipe_dir,
            &variant.sources,
            &src_dir,
            self.fetcher.as_ref(),
        )?;
        self.hooks.fire_post_fetch_sources(&ctx, recipe, &src_dir)?;

        // PREPARED
        self.check_cancel()?;
        if let Some(prepare) = &variant.prepare {
            info!("preparing source files");
            self.run_script(
                "prepare",
                &variant,
                prepare.clone(),
                MOUNT_SRC,
                script_env(recipe, &variant, None),
                vec![BindMount::writable(&src_dir, MOUNT_SRC)],
            )?;
        } else {
            debug!("skipping prepare (nothing to do)");
        }
        self.hooks.fire_post_prepare(&ctx, recipe, &src_dir)?;

        // BUILT
        self.check_cancel()?;
        if let Some(build) = &variant.build {
            info!("building artifacts");

            // Pin source timestamps so build outputs embedding them
            // stay reproducible
            let epoch = recipe.timestamp.timestamp();
            pin_mtimes(&src_dir, epoch)?;

            let mut script = makedepends_script(&variant);
            script.push("cd \"$srcdir\"".to_string());
            script.push(build.clone());
            script.push(owner_reset_command(&src_dir)?);

            self.run_script(
                "build",
                &variant,
                script.join("\n"),
                MOUNT_SRC,
                script_env(recipe, &variant, None),
                vec![
                    BindMount::writable(&src_dir, MOUNT_SRC),
                    BindMount::writable(&self.dist_dir, MOUNT_DIST),
                ],
            )?;
        } else {
            debug!("skipping build (nothing to do)");
        }
        self.hooks.fire_post_build(&ctx, recipe, &src_dir)?;

        // PACKAGED → ARCHIVED, per package in declaration order
        let base_pkg_dir = build_dir.join("pkg");
        let mut outputs = Vec::with_capacity(variant.packages.len());

        for package in &variant.packages {
            self.check_cancel()?;
            let pkg_ctx = HookContext {
                package: Some(&package.name),
                ..ctx
            };

            let pkg_dir = base_pkg_dir.join(&package.name);
            if pkg_dir.exists() {
                fs::remove_dir_all(&pkg_dir)?;
            }
            fs::create_dir_all(&pkg_dir)?;

            info!("packaging build artifacts for {}", package.name);
            self.run_script(
                "package",
                &variant,
                package.package.clone(),
                MOUNT_PKG,
                script_env(recipe, &variant, Some(package)),
                vec![
                    BindMount::writable(&src_dir, MOUNT_SRC),
                    BindMount::writable(&pkg_dir, MOUNT_PKG),
                ],
            )?;
            self.hooks
                .fire_post_package(&pkg_ctx, recipe, &src_dir, &pkg_dir)?;

            // ARCHIVED
            self.check_cancel()?;
            let ar_path = self.dist_dir.join(package.filename(arch));
            if let Some(parent) = ar_path.parent() {
                fs::create_dir_all(parent)?;
            }

            info!("creating archive {}", ar_path.display());
            ipk::write_path(
                &ar_path,
                recipe.timestamp.timestamp() as u64,
                &package.control_fields(recipe, arch),
                &ipk::maintainer_scripts(package),
                &package.conffiles,
                Some(&pkg_dir),
            )?;
            self.hooks.fire_post_archive(&pkg_ctx, recipe, &ar_path)?;

            outputs.push(ar_path);
        }

        Ok(outputs)
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }

    /// Run one recipe script through the executor, mapping a non-zero
    /// exit status to a build failure.
    fn run_script(
        &self,
        name: &str,
        variant: &BuildRecipe,
        script: String,
        workdir: &str,
        env: Vec<(String, String)>,
        mounts: Vec<BindMount>,
    ) -> Result<()> {
        let request = ExecRequest {
            image: variant.image.clone(),
            script: format!("set -euo pipefail\n{}", script),
            env,
            workdir: PathBuf::from(workdir),
            mounts,
        };

        let status = self.executor.run(&request, &self.cancel)?;
        if status != 0 {
            return Err(Error::BuildScript {
                script: name.to_string(),
                status,
            });
        }
        Ok(())
    }
}

/// Environment handed to every executed recipe script.
fn script_env(
    recipe: &Recipe,
    variant: &BuildRecipe,
    package: Option<&Package>,
) -> Vec<(String, String)> {
    let mut env = vec![
        ("srcdir".to_string(), MOUNT_SRC.to_string()),
        ("pkgdir".to_string(), MOUNT_PKG.to_string()),
        ("recipe".to_string(), recipe.name().to_string()),
        ("arch".to_string(), variant.arch.clone()),
        ("HOST".to_string(), HOST_TRIPLET.to_string()),
    ];

    if let Some(package) = package {
        env.push(("pkgname".to_string(), package.name.clone()));
        env.push(("pkgver".to_string(), package.version.to_string()));
    }

    // Flags become shell variables; bare flags are set to 1
    for flag in &variant.flags {
        match flag.split_once('=') {
            Some((key, value)) => env.push((key.to_string(), value.to_string())),
            None => env.push((flag.clone(), "1".to_string())),
        }
    }

    env
}

/// Shell prelude installing build dependencies inside the container.
///
/// Build-host packages come from the image's own package manager;
/// target-host packages are installed into the sysroot through opkg,
/// using the dist directory as a local feed next to the standard
/// device feeds.
fn makedepends_script(variant: &BuildRecipe) -> Vec<String> {
    let mut script = Vec::new();

    let build_deps: Vec<&str> = variant
        .makedepends
        .iter()
        .filter(|dep| dep.kind == DependencyKind::Build)
        .map(|dep| dep.package.as_str())
        .collect();
    let host_deps: Vec<&str> = variant
        .makedepends
        .iter()
        .filter(|dep| dep.kind == DependencyKind::Host)
        .map(|dep| dep.package.as_str())
        .collect();

    if !build_deps.is_empty() {
        script.push("export DEBIAN_FRONTEND=noninteractive".to_string());
        script.push("apt-get update -qq".to_string());
        script.push(format!(
            "apt-get install -qq --no-install-recommends \
             -o Dpkg::Options::=\"--force-confdef\" \
             -o Dpkg::Options::=\"--force-confold\" -- {}",
            build_deps.join(" ")
        ));
    }

    if !host_deps.is_empty() {
        let conf_path = "$SYSROOT/etc/opkg/opkg.conf";
        script.push(format!(
            "echo -n \"dest root /\n\
             arch all 100\n\
             arch armv7-3.2 160\n\
             src/gz entware https://bin.entware.net/armv7sf-k3.2\n\
             arch {default} 200\n\
             src/gz galley-{default} file://{dist}/{default}\n\
             \" > \"{conf}\"",
            default = DEFAULT_ARCH,
            dist = MOUNT_DIST,
            conf = conf_path,
        ));

        if variant.arch != DEFAULT_ARCH {
            script.push(format!(
                "echo -n \"arch {arch} 250\n\
                 src/gz galley-{arch} file://{dist}/{arch}\n\
                 \" >> \"{conf}\"",
                arch = variant.arch,
                dist = MOUNT_DIST,
                conf = conf_path,
            ));
        }

        script.push("opkg update --verbosity=0".to_string());
        script.push(format!(
            "opkg install --verbosity=0 --no-install-recommends -- {}",
            host_deps.join(" ")
        ));
    }

    script
}

/// Command restoring `srcdir` ownership to the invoking user after a
/// container build ran as root.
fn owner_reset_command(src_dir: &Path) -> Result<String> {
    use std::os::unix::fs::MetadataExt;

    let metadata = fs::metadata(src_dir)?;
    Ok(format!(
        "chown -R {}:{} \"$srcdir\"",
        metadata.uid(),
        metadata.gid(),
    ))
}

/// Set every access and modification time under `dir` (inclusive) to
/// the given epoch.
fn pin_mtimes(dir: &Path, epoch: i64) -> Result<()> {
    let pinned = filetime::FileTime::from_unix_time(epoch, 0);

    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| std::io::Error::other(e))?;
        filetime::set_symlink_file_times(entry.path(), pinned, pinned)?;
    }

    Ok(())
}
