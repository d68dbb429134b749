// src/lib.rs

//! galley — reproducible ipk package builder
//!
//! Cooks Arch-style shell recipes into Debian-style ipk archives for
//! an embedded Linux device. Builds run inside a container image so
//! outputs are byte-identical across machines.
//!
//! # Architecture
//!
//! - [`bash`] - Shell evaluator bridge capturing recipe declarations
//! - [`recipe`] - Typed recipe model and per-architecture specialization
//! - [`source`] - Source fetching, checksum verification, auto-extraction
//! - [`executor`] - Script execution inside a container image
//! - [`builder`] - The phase pipeline driving a recipe to its archives
//! - [`ipk`] - Deterministic `ar` + `tar.gz` archive emission
//! - [`hooks`] - Extension points observing and mutating the pipeline

pub mod bash;
pub mod builder;
pub mod compression;
mod error;
pub mod executor;
pub mod hash;
pub mod hooks;
pub mod ipk;
pub mod recipe;
pub mod source;
pub mod version;

pub use builder::Builder;
pub use error::{Error, Result};
pub use executor::{BindMount, CancelToken, ExecRequest, Executor, HostExecutor, OciExecutor};
pub use hooks::{BuildHook, HookContext, HookRegistry};
pub use recipe::{BuildRecipe, Package, Recipe, Source, parse};
pub use source::{CurlFetcher, Fetcher};
pub use version::{Dependency, DependencyKind, Version};
