// src/recipe/mod.rs

//! Recipe model
//!
//! A recipe is a shell-language declaration file describing how to
//! build one or more installable packages. Parsing yields a [`Recipe`]
//! holding one architecture-specialized [`BuildRecipe`] per declared
//! architecture; each variant owns the [`Package`] descriptors it
//! produces.
//!
//! The model is created once during parse, may be mutated by the
//! post-parse hook, and is read-only for the rest of a build run.
//! Parent links are deliberately absent: operations that need both a
//! package and its recipe's shared metadata take the parents as
//! explicit arguments, which keeps the object graph acyclic.

pub mod parser;

pub use parser::parse;

use crate::version::{Dependency, Version};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Checksum sentinel disabling verification for one source
pub const SKIP_CHECKSUM: &str = "SKIP";

/// Architecture tag assumed when a recipe declares none; also the
/// device-generic feed every build can install from
pub const DEFAULT_ARCH: &str = "rmall";

/// One source item needed to build a recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// URL, or path relative to the recipe directory
    pub url: String,

    /// Lowercase hex SHA-256 digest, or [`SKIP_CHECKSUM`]
    pub checksum: String,

    /// If true, never auto-extract this item after fetching
    pub noextract: bool,
}

impl Source {
    /// Basename under which the item lands in `srcdir`
    pub fn filename(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }
}

/// The parsed, pre-specialization form of a recipe
#[derive(Debug, Clone)]
pub struct Recipe {
    /// Directory the recipe was loaded from
    pub recipe_dir: PathBuf,

    /// Pinned modification time used throughout the produced archives
    pub timestamp: DateTime<Utc>,

    /// Full name and email address of the maintainer
    pub maintainer: String,

    /// Homepage URL
    pub url: String,

    /// License identifier
    pub license: String,

    /// Declared sources, before architecture specialization
    pub sources: Vec<String>,

    /// Checksums aligned by index with `sources`
    pub checksums: Vec<String>,

    /// Source basenames that must not be auto-extracted
    pub noextract: Vec<String>,

    /// Architecture tags, in declaration order
    pub archs: Vec<String>,

    /// One specialized variant per architecture tag
    pub variants: BTreeMap<String, BuildRecipe>,
}

impl Recipe {
    /// Recipe name, taken from the recipe directory basename
    pub fn name(&self) -> &str {
        self.recipe_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("recipe")
    }

    /// Look up the variant for an architecture tag
    pub fn variant(&self, arch: &str) -> Option<&BuildRecipe> {
        self.variants.get(arch)
    }
}

/// Per-architecture specialization of a recipe
#[derive(Debug, Clone)]
pub struct BuildRecipe {
    /// Architecture tag this variant targets
    pub arch: String,

    /// Container image used for the prepare and build phases;
    /// empty when the recipe has no build step
    pub image: String,

    /// Free-form flags exported into the build environment
    pub flags: Vec<String>,

    /// Packages needed to build this variant
    pub makedepends: Vec<Dependency>,

    /// Specialized sources for this architecture
    pub sources: Vec<Source>,

    /// Body of the prepare() function, if declared
    pub prepare: Option<String>,

    /// Body of the build() function, if declared
    pub build: Option<String>,

    /// Packages produced by this variant, in declaration order
    pub packages: Vec<Package>,
}

impl BuildRecipe {
    /// Look up a package by name
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }
}

/// One installable output of a recipe
#[derive(Debug, Clone)]
pub struct Package {
    /// Package name, unique within the repository
    pub name: String,

    /// Package version
    pub version: Version,

    /// Short description
    pub description: String,

    /// Repository section
    pub section: String,

    /// Packages that must be installed for this one to work
    pub installdepends: Vec<Dependency>,

    /// Incompatible packages
    pub conflicts: Vec<Dependency>,

    /// Packages replaced by this one
    pub replaces: Vec<Dependency>,

    /// Paths to record as configuration files in the archive
    pub conffiles: Vec<String>,

    /// Body of the package() function that materializes `$pkgdir`
    pub package: String,

    /// Maintainer script bodies, absent when not declared
    pub preinstall: Option<String>,
    pub configure: Option<String>,
    pub preremove: Option<String>,
    pub postremove: Option<String>,
    pub preupgrade: Option<String>,
    pub postupgrade: Option<String>,
}

impl Package {
    /// Unique identifier of this package within one architecture
    pub fn pkgid(&self, arch: &str) -> String {
        format!(
            "{}_{}_{}",
            self.name,
            self.version.to_string().replace(':', "_"),
            arch
        )
    }

    /// Archive path for this package, relative to the dist directory
    pub fn filename(&self, arch: &str) -> PathBuf {
        PathBuf::from(arch).join(format!("{}.ipk", self.pkgid(arch)))
    }

    /// Render the RFC-822-style control block for this package.
    ///
    /// Shared metadata (homepage, maintainer, license, architecture)
    /// lives on the parents, which the caller passes explicitly. Key
    /// order is fixed; dependency lists keep declaration order and are
    /// omitted when empty.
    pub fn control_fields(&self, recipe: &Recipe, arch: &str) -> String {
        let mut control = format!(
            "Package: {}\n\
             Description: {}\n\
             Homepage: {}\n\
             Version: {}\n\
             Section: {}\n\
             Maintainer: {}\n\
             License: {}\n\
             Architecture: {}\n",
            self.name,
            self.description,
            recipe.url,
            self.version,
            self.section,
            recipe.maintainer,
            recipe.license,
            arch,
        );

        for (key, deps) in [
            ("Depends", &self.installdepends),
            ("Conflicts", &self.conflicts),
            ("Replaces", &self.replaces),
        ] {
            if !deps.is_empty() {
                let rendered: Vec<String> = deps.iter().map(Dependency::to_debian).collect();
                control.push_str(&format!("{}: {}\n", key, rendered.join(", ")));
            }
        }

        control.push_str(&format!("Source: {}\n", recipe.name()));
        control
    }
}
