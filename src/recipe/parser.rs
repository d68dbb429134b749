// src/recipe/parser.rs

//! Recipe parsing and architecture specialization
//!
//! Projects the symbol table captured by the shell bridge onto the
//! typed recipe model. Parsing runs in two passes: a generic pass
//! reads the shared recipe metadata, then one specialization pass per
//! declared architecture folds `<base>_<arch>` symbols into their base
//! and builds a [`BuildRecipe`].
//!
//! Specialization rules, applied in lexical order of the symbol table:
//! a suffixed scalar replaces the base, a suffixed indexed array is
//! concatenated after the base, and suffixes naming other
//! architectures are discarded from the view. An associative-array
//! base or a kind mismatch between base and suffix is an error.

use crate::bash::{self, Functions, Value, Variables};
use crate::error::{Error, Result};
use crate::recipe::{BuildRecipe, DEFAULT_ARCH, Package, Recipe, SKIP_CHECKSUM, Source};
use crate::version::{Dependency, DependencyKind, Version};
use crate::hash;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Name of the recipe definition file inside a recipe directory
pub const RECIPE_FILENAME: &str = "package";

/// Sentinel exported during parse-phase evaluation so recipes can
/// distinguish it from build-phase execution
const PARSE_SENTINEL: &str = "GALLEY_PARSE";

fn package_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("static regex"))
}

/// Environment handed to the shell bridge at parse time.
///
/// `srcdir` and `pkgdir` are placeholders; a recipe must only expand
/// them inside function bodies, which run later with the real paths.
fn parse_env() -> Vec<(String, String)> {
    vec![
        ("srcdir".to_string(), "/nonexistent/src".to_string()),
        ("pkgdir".to_string(), "/nonexistent/pkg".to_string()),
        (PARSE_SENTINEL.to_string(), "1".to_string()),
    ]
}

/// Load and parse the recipe defined in `recipe_dir`.
pub fn parse(recipe_dir: &Path) -> Result<Recipe> {
    let definition_path = recipe_dir.join(RECIPE_FILENAME);
    let definition = fs::read_to_string(&definition_path).map_err(|e| {
        Error::recipe(
            recipe_dir,
            format!("cannot read '{}': {}", definition_path.display(), e),
        )
    })?;

    let (variables, functions) = bash::get_declarations(&definition, &parse_env())?;
    parse_symbols(recipe_dir, variables, functions)
}

/// Build the recipe model from an evaluated symbol table.
pub fn parse_symbols(
    recipe_dir: &Path,
    variables: Variables,
    functions: Functions,
) -> Result<Recipe> {
    let mut generic = variables.clone();

    let archs = match generic.remove("archs") {
        None => vec![DEFAULT_ARCH.to_string()],
        Some(Value::Indexed(archs)) => archs,
        Some(other) => {
            return Err(field_kind_error(recipe_dir, "archs", "indexed array", &other));
        }
    };

    if archs.is_empty() {
        return Err(Error::recipe(recipe_dir, "field 'archs' must not be empty"));
    }

    // Generic pass: shared metadata from the unspecialized table
    let timestamp_str = pop_string(recipe_dir, &mut generic, "timestamp")?;
    let timestamp = parse_timestamp(recipe_dir, &timestamp_str)?;
    let maintainer = pop_string(recipe_dir, &mut generic, "maintainer")?;
    let url = pop_string(recipe_dir, &mut generic, "url")?;
    let license = pop_string(recipe_dir, &mut generic, "license")?;
    let sources = pop_indexed_or(recipe_dir, &mut generic, "source")?;
    let checksums = pop_indexed_or(recipe_dir, &mut generic, "sha256sums")?;
    let noextract = pop_indexed_or(recipe_dir, &mut generic, "noextract")?;

    check_source_lists(recipe_dir, &sources, &checksums)?;

    let mut variants = BTreeMap::new();

    for arch in &archs {
        let specialized = specialize(recipe_dir, &variables, &archs, arch)?;
        let variant = parse_variant(recipe_dir, arch, specialized, functions.clone())?;

        if variants.insert(arch.clone(), variant).is_some() {
            return Err(Error::recipe(
                recipe_dir,
                format!("architecture '{}' is declared more than once", arch),
            ));
        }
    }

    debug!(
        "parsed recipe at {} with {} architecture(s)",
        recipe_dir.display(),
        variants.len()
    );

    Ok(Recipe {
        recipe_dir: recipe_dir.to_path_buf(),
        timestamp,
        maintainer,
        url,
        license,
        sources,
        checksums,
        noextract,
        archs,
        variants,
    })
}

/// Fold architecture-suffixed symbols into the view for one architecture.
fn specialize(
    recipe_dir: &Path,
    variables: &Variables,
    archs: &[String],
    arch: &str,
) -> Result<Variables> {
    let mut out = Variables::new();
    let mut merges: Vec<(String, Value)> = Vec::new();

    // BTreeMap iteration gives the lexical order the fold is defined in
    for (name, value) in variables {
        if let Some((base, suffix)) = name.rsplit_once('_') {
            if archs.iter().any(|a| a == suffix) {
                if suffix == arch && !base.is_empty() {
                    merges.push((base.to_string(), value.clone()));
                }
                continue;
            }
        }
        out.insert(name.clone(), value.clone());
    }

    for (base, value) in merges {
        match out.remove(&base) {
            None => {
                out.insert(base, value);
            }
            Some(Value::Scalar(_)) => match value {
                Value::Scalar(s) => {
                    out.insert(base, Value::Scalar(s));
                }
                other => {
                    return Err(Error::recipe(
                        recipe_dir,
                        format!(
                            "field '{}' is declared several times with different types \
                             (string vs {})",
                            base,
                            other.kind()
                        ),
                    ));
                }
            },
            Some(Value::Indexed(mut items)) => match value {
                Value::Indexed(more) => {
                    items.extend(more);
                    out.insert(base, Value::Indexed(items));
                }
                other => {
                    return Err(Error::recipe(
                        recipe_dir,
                        format!(
                            "field '{}' is declared several times with different types \
                             (indexed array vs {})",
                            base,
                            other.kind()
                        ),
                    ));
                }
            },
            Some(Value::Assoc(_)) => {
                return Err(Error::recipe(
                    recipe_dir,
                    format!(
                        "field '{}' cannot combine an associative array with an \
                         architecture-suffixed declaration",
                        base
                    ),
                ));
            }
        }
    }

    // The architecture list is consumed by the generic pass; the
    // specialized view sees only its own tag
    out.remove("archs");
    out.insert("arch".to_string(), Value::Scalar(arch.to_string()));
    Ok(out)
}

/// Parse one architecture-specialized variant.
fn parse_variant(
    recipe_dir: &Path,
    arch: &str,
    mut vars: Variables,
    mut funcs: Functions,
) -> Result<BuildRecipe> {
    // Raw field values, re-declared at the top of every emitted script
    // so function bodies can run standalone in the container
    let mut header_vars = Variables::new();

    let flags = pop_indexed_or(recipe_dir, &mut vars, "flags")?;
    header_vars.insert("flags".to_string(), Value::Indexed(flags.clone()));

    for field in ["timestamp", "maintainer", "url", "license"] {
        let value = pop_string(recipe_dir, &mut vars, field)?;
        header_vars.insert(field.to_string(), Value::Scalar(value));
    }

    let source_urls = pop_indexed_or(recipe_dir, &mut vars, "source")?;
    let checksums = pop_indexed_or(recipe_dir, &mut vars, "sha256sums")?;
    let noextract = pop_indexed_or(recipe_dir, &mut vars, "noextract")?;
    header_vars.insert("source".to_string(), Value::Indexed(source_urls.clone()));
    header_vars.insert("sha256sums".to_string(), Value::Indexed(checksums.clone()));
    header_vars.insert("noextract".to_string(), Value::Indexed(noextract.clone()));

    check_source_lists(recipe_dir, &source_urls, &checksums)?;

    let sources = source_urls
        .iter()
        .zip(&checksums)
        .map(|(url, checksum)| {
            let basename = url.rsplit('/').next().unwrap_or(url);
            Source {
                url: url.clone(),
                checksum: checksum.clone(),
                noextract: noextract.iter().any(|n| n == basename),
            }
        })
        .collect();

    let makedepends_raw = pop_indexed_or(recipe_dir, &mut vars, "makedepends")?;
    header_vars.insert(
        "makedepends".to_string(),
        Value::Indexed(makedepends_raw.clone()),
    );
    let makedepends = makedepends_raw
        .iter()
        .map(|dep| {
            Dependency::parse(dep)
                .map_err(|e| Error::recipe(recipe_dir, format!("in 'makedepends': {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let image = pop_string_or(recipe_dir, &mut vars, "image", "")?;
    if !image.is_empty() {
        header_vars.insert("image".to_string(), Value::Scalar(image.clone()));
    }

    let arch_value = pop_string_or(recipe_dir, &mut vars, "arch", arch)?;
    header_vars.insert("arch".to_string(), Value::Scalar(arch_value));

    if !image.is_empty() && !funcs.contains_key("build") {
        return Err(Error::recipe(
            recipe_dir,
            "missing build() function for a recipe which declares a build image",
        ));
    }
    if image.is_empty() && funcs.contains_key("build") {
        return Err(Error::recipe(
            recipe_dir,
            "missing image declaration for a recipe which has a build() step",
        ));
    }

    let prepare = funcs.remove("prepare");
    let build = funcs.remove("build");

    let pkgnames = pop_indexed(recipe_dir, &mut vars, "pkgnames")?;
    if pkgnames.is_empty() {
        return Err(Error::recipe(
            recipe_dir,
            "field 'pkgnames' must not be empty",
        ));
    }
    for (i, name) in pkgnames.iter().enumerate() {
        if pkgnames[..i].contains(name) {
            return Err(Error::recipe(
                recipe_dir,
                format!("package '{}' is declared more than once", name),
            ));
        }
    }

    let packages = if pkgnames.len() == 1 {
        // Single-package recipe: recipe-level declarations describe the package
        let mut pkg_vars = vars.clone();
        pkg_vars.insert(
            "pkgname".to_string(),
            Value::Scalar(pkgnames[0].clone()),
        );
        vec![parse_package(
            recipe_dir,
            pkg_vars,
            header_vars.clone(),
            &mut funcs,
        )?]
    } else {
        // Split-package recipe: each entry is a function whose body
        // contributes package-local declarations
        let mut bodies = Vec::with_capacity(pkgnames.len());
        for name in &pkgnames {
            let body = funcs.remove(name).ok_or_else(|| {
                Error::recipe(
                    recipe_dir,
                    format!("missing required function {}() for corresponding package", name),
                )
            })?;
            bodies.push((name.clone(), body));
        }

        let mut packages = Vec::with_capacity(bodies.len());
        for (name, body) in bodies {
            let mut context_vars = header_vars.clone();
            context_vars.extend(vars.clone());
            context_vars.insert("pkgname".to_string(), Value::Scalar(name.clone()));

            let context = format!(
                "{}{}{}",
                bash::put_variables(&context_vars),
                bash::put_functions(&funcs),
                body
            );
            let (mut pkg_vars, pkg_funcs) = bash::get_declarations(&context, &parse_env())?;

            // Recipe fields re-enter through the context; strip them so
            // only package-local declarations and recipe defaults remain
            for field in header_vars.keys() {
                pkg_vars.remove(field);
            }

            let mut all_funcs = funcs.clone();
            all_funcs.extend(pkg_funcs);

            packages.push(parse_package(
                recipe_dir,
                pkg_vars,
                header_vars.clone(),
                &mut all_funcs,
            )?);
        }
        packages
    };

    // Remaining declarations feed the prepare/build script header
    let mut script_vars = header_vars;
    script_vars.extend(vars);
    let header = script_header(&script_vars, &funcs);

    Ok(BuildRecipe {
        arch: arch.to_string(),
        image,
        flags,
        makedepends,
        sources,
        prepare: prepare.map(|body| format!("{}{}", header, body)),
        build: build.map(|body| format!("{}{}", header, body)),
        packages,
    })
}

/// Parse one package from its (possibly package-local) symbol table.
fn parse_package(
    recipe_dir: &Path,
    mut vars: Variables,
    mut header_vars: Variables,
    funcs: &mut Functions,
) -> Result<Package> {
    let name = pop_string(recipe_dir, &mut vars, "pkgname")?;
    if !package_name_regex().is_match(&name) {
        return Err(Error::recipe(
            recipe_dir,
            format!(
                "invalid package name '{}': must match [a-z][a-z0-9-]*",
                name
            ),
        ));
    }
    header_vars.insert("pkgname".to_string(), Value::Scalar(name.clone()));

    let pkgver = pop_string(recipe_dir, &mut vars, "pkgver")?;
    let version = Version::parse_package(&pkgver)
        .map_err(|e| Error::recipe(recipe_dir, format!("in 'pkgver': {}", e)))?;
    header_vars.insert("pkgver".to_string(), Value::Scalar(pkgver));

    let description = pop_string(recipe_dir, &mut vars, "pkgdesc")?;
    let section = pop_string(recipe_dir, &mut vars, "section")?;

    let mut dep_fields = [Vec::new(), Vec::new(), Vec::new()];
    for (slot, field) in dep_fields
        .iter_mut()
        .zip(["installdepends", "conflicts", "replaces"])
    {
        for raw in pop_indexed_or(recipe_dir, &mut vars, field)? {
            let dep = Dependency::parse(&raw)
                .map_err(|e| Error::recipe(recipe_dir, format!("in '{}': {}", field, e)))?;

            if dep.kind != DependencyKind::Host {
                return Err(Error::recipe(
                    recipe_dir,
                    format!("only host packages are supported in the '{}' field", field),
                ));
            }
            slot.push(dep);
        }
    }
    let [installdepends, conflicts, replaces] = dep_fields;

    let conffiles = pop_indexed_or(recipe_dir, &mut vars, "conffiles")?;

    let package = funcs.remove("package").ok_or_else(|| {
        Error::recipe(
            recipe_dir,
            format!("missing required function package() for package {}", name),
        )
    })?;

    let preinstall = funcs.remove("preinstall");
    let configure = funcs.remove("configure");
    let preremove = funcs.remove("preremove");
    let postremove = funcs.remove("postremove");
    let preupgrade = funcs.remove("preupgrade");
    let postupgrade = funcs.remove("postupgrade");

    // Custom fields and helper functions must be underscore-prefixed
    for var_name in vars.keys() {
        if !var_name.starts_with('_') {
            return Err(Error::recipe(
                recipe_dir,
                format!(
                    "unknown field '{}' in the definition of package {} \
                     (prefix custom fields with '_')",
                    var_name, name
                ),
            ));
        }
    }
    for func_name in funcs.keys() {
        if !func_name.starts_with('_') {
            return Err(Error::recipe(
                recipe_dir,
                format!(
                    "unknown function '{}' in the definition of package {} \
                     (prefix custom functions with '_')",
                    func_name, name
                ),
            ));
        }
    }

    let mut script_vars = header_vars;
    script_vars.extend(vars);
    let header = script_header(&script_vars, funcs);
    let with_header = |body: Option<String>| body.map(|b| format!("{}{}", header, b));

    Ok(Package {
        name,
        version,
        description,
        section,
        installdepends,
        conflicts,
        replaces,
        conffiles,
        package: format!("{}{}", header, package),
        preinstall: with_header(preinstall),
        configure: with_header(configure),
        preremove: with_header(preremove),
        postremove: with_header(postremove),
        preupgrade: with_header(preupgrade),
        postupgrade: with_header(postupgrade),
    })
}

/// Header re-declaring recipe variables and helper functions, prepended
/// to every emitted script body.
fn script_header(vars: &Variables, funcs: &Functions) -> String {
    format!("{}{}\n", bash::put_variables(vars), bash::put_functions(funcs))
}

/// Validate the source/checksum invariants shared by the generic and
/// specialized views.
fn check_source_lists(recipe_dir: &Path, sources: &[String], checksums: &[String]) -> Result<()> {
    if sources.len() != checksums.len() {
        return Err(Error::recipe(
            recipe_dir,
            format!(
                "expected the same number of sources and checksums, got {} source(s) \
                 and {} checksum(s)",
                sources.len(),
                checksums.len()
            ),
        ));
    }

    for checksum in checksums {
        if checksum != SKIP_CHECKSUM && !hash::is_sha256_hex(checksum) {
            return Err(Error::recipe(
                recipe_dir,
                format!(
                    "invalid checksum '{}': expected SKIP or 64 lowercase hex digits",
                    checksum
                ),
            ));
        }
    }

    Ok(())
}

fn parse_timestamp(recipe_dir: &Path, value: &str) -> Result<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    // Short ISO-8601 forms recipes commonly use
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%MZ") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }

    Err(Error::recipe(
        recipe_dir,
        format!("field 'timestamp' does not contain a valid ISO-8601 date: '{}'", value),
    ))
}

fn pop_string(recipe_dir: &Path, vars: &mut Variables, name: &str) -> Result<String> {
    match vars.remove(name) {
        None => Err(Error::recipe(
            recipe_dir,
            format!("missing required field '{}'", name),
        )),
        Some(Value::Scalar(s)) => Ok(s),
        Some(other) => Err(field_kind_error(recipe_dir, name, "string", &other)),
    }
}

fn pop_string_or(
    recipe_dir: &Path,
    vars: &mut Variables,
    name: &str,
    default: &str,
) -> Result<String> {
    match vars.remove(name) {
        None => Ok(default.to_string()),
        Some(Value::Scalar(s)) => Ok(s),
        Some(other) => Err(field_kind_error(recipe_dir, name, "string", &other)),
    }
}

fn pop_indexed(recipe_dir: &Path, vars: &mut Variables, name: &str) -> Result<Vec<String>> {
    match vars.remove(name) {
        None => Err(Error::recipe(
            recipe_dir,
            format!("missing required field '{}'", name),
        )),
        Some(Value::Indexed(items)) => Ok(items),
        Some(other) => Err(field_kind_error(recipe_dir, name, "indexed array", &other)),
    }
}

fn pop_indexed_or(recipe_dir: &Path, vars: &mut Variables, name: &str) -> Result<Vec<String>> {
    match vars.remove(name) {
        None => Ok(Vec::new()),
        Some(Value::Indexed(items)) => Ok(items),
        Some(other) => Err(field_kind_error(recipe_dir, name, "indexed array", &other)),
    }
}

fn field_kind_error(recipe_dir: &Path, name: &str, expected: &str, got: &Value) -> Error {
    Error::recipe(
        recipe_dir,
        format!("field '{}' must be a {}, got {}", name, expected, got.kind()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PREAMBLE: &str = r#"
timestamp=2023-12-01T00:00Z
maintainer='Test <test@example.com>'
url=https://example.com/app
license=MIT
"#;

    fn write_recipe(definition: &str) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(RECIPE_FILENAME), definition).unwrap();
        dir
    }

    fn parse_str(definition: &str) -> Result<Recipe> {
        let dir = write_recipe(&format!("{}{}", PREAMBLE, definition));
        parse(dir.path())
    }

    #[test]
    fn test_minimal_single_package() {
        let recipe = parse_str(
            r#"
pkgnames=(demo)
pkgdesc='A demo'
pkgver=1.0-1
section=utils

package() {
    true
}
"#,
        )
        .unwrap();

        assert_eq!(recipe.archs, vec!["rmall"]);
        let variant = recipe.variant("rmall").unwrap();
        assert_eq!(variant.packages.len(), 1);

        let pkg = &variant.packages[0];
        assert_eq!(pkg.name, "demo");
        assert_eq!(pkg.description, "A demo");
        assert_eq!(pkg.version.to_string(), "1.0-1");
        assert_eq!(pkg.section, "utils");
        assert!(variant.build.is_none());
        assert!(variant.prepare.is_none());
    }

    #[test]
    fn test_missing_required_field() {
        let err = parse_str(
            r#"
pkgnames=(demo)
pkgver=1.0-1
section=utils
package() { true; }
"#,
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("pkgdesc"), "unexpected error: {}", message);
    }

    #[test]
    fn test_checksum_count_mismatch() {
        let err = parse_str(
            r#"
pkgnames=(demo)
pkgdesc='A demo'
pkgver=1.0-1
section=utils
source=(a.txt b.txt)
sha256sums=(SKIP)
package() { true; }
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("number of sources and checksums"));
    }

    #[test]
    fn test_checksum_format_validation() {
        let err = parse_str(
            r#"
pkgnames=(demo)
pkgdesc='A demo'
pkgver=1.0-1
section=utils
source=(a.txt)
sha256sums=(nothex)
package() { true; }
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("invalid checksum"));
    }

    #[test]
    fn test_arch_specialization_scalar_and_array() {
        let recipe = parse_str(
            r#"
archs=(rm1 rm2)
pkgnames=(demo)
pkgdesc='A demo'
pkgver=1.0-1
section=utils
image=base:v1
image_rm2=base:v2
source=(common.c)
source_rm2=(extra.c)
sha256sums=(SKIP)
sha256sums_rm2=(SKIP)

build() {
    true
}

package() {
    true
}
"#,
        )
        .unwrap();

        let rm1 = recipe.variant("rm1").unwrap();
        assert_eq!(rm1.image, "base:v1");
        assert_eq!(rm1.sources.len(), 1);
        assert_eq!(rm1.sources[0].url, "common.c");

        let rm2 = recipe.variant("rm2").unwrap();
        assert_eq!(rm2.image, "base:v2");
        assert_eq!(rm2.sources.len(), 2);
        assert_eq!(rm2.sources[1].url, "extra.c");

        // The generic view keeps only the base declarations
        assert_eq!(recipe.sources, vec!["common.c"]);
    }

    #[test]
    fn test_specialization_kind_mismatch() {
        let err = parse_str(
            r#"
archs=(rm1)
pkgnames=(demo)
pkgdesc='A demo'
pkgver=1.0-1
section=utils
flags=(-O2)
flags_rm1=scalar
package() { true; }
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("different types"));
    }

    #[test]
    fn test_image_requires_build() {
        let err = parse_str(
            r#"
pkgnames=(demo)
pkgdesc='A demo'
pkgver=1.0-1
section=utils
image=base:v1
package() { true; }
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("missing build() function"));
    }

    #[test]
    fn test_build_requires_image() {
        let err = parse_str(
            r#"
pkgnames=(demo)
pkgdesc='A demo'
pkgver=1.0-1
section=utils
build() { true; }
package() { true; }
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("missing image declaration"));
    }

    #[test]
    fn test_invalid_package_name() {
        let err = parse_str(
            r#"
pkgnames=(Demo)
pkgdesc='A demo'
pkgver=1.0-1
section=utils
package() { true; }
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("invalid package name"));
    }

    #[test]
    fn test_invalid_version() {
        let err = parse_str(
            r#"
pkgnames=(demo)
pkgdesc='A demo'
pkgver=1.0
section=utils
package() { true; }
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("pkgver"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse_str(
            r#"
pkgnames=(demo)
pkgdesc='A demo'
pkgver=1.0-1
section=utils
custom=value
package() { true; }
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("unknown field 'custom'"));
    }

    #[test]
    fn test_underscore_fields_allowed() {
        let recipe = parse_str(
            r#"
pkgnames=(demo)
pkgdesc='A demo'
pkgver=1.0-1
section=utils
_helper=value
_setup() { echo ok; }
package() { _setup; }
"#,
        )
        .unwrap();

        let pkg = &recipe.variant("rmall").unwrap().packages[0];
        // Custom declarations are re-declared in the script header
        assert!(pkg.package.contains("_helper='value'"));
        assert!(pkg.package.contains("_setup()"));
    }

    #[test]
    fn test_split_packages() {
        let recipe = parse_str(
            r#"
pkgnames=(app-core app-extra)
pkgver=2.0-3
section=utils

app-core() {
    pkgdesc='Core files'

    package() {
        true
    }
}

app-extra() {
    pkgdesc='Extra files'
    installdepends=(app-core)

    package() {
        true
    }
}
"#,
        )
        .unwrap();

        let variant = recipe.variant("rmall").unwrap();
        assert_eq!(variant.packages.len(), 2);

        // Declaration order is preserved
        assert_eq!(variant.packages[0].name, "app-core");
        assert_eq!(variant.packages[1].name, "app-extra");
        assert_eq!(variant.packages[0].description, "Core files");
        assert_eq!(variant.packages[1].description, "Extra files");
        assert_eq!(variant.packages[1].installdepends[0].package, "app-core");

        // The shared pkgver flows into both packages
        assert_eq!(variant.packages[0].version.to_string(), "2.0-3");
        assert_eq!(variant.packages[1].version.to_string(), "2.0-3");
    }

    #[test]
    fn test_split_package_missing_function() {
        let err = parse_str(
            r#"
pkgnames=(app-core app-extra)
pkgver=2.0-3
section=utils

app-core() {
    pkgdesc='Core files'
    package() { true; }
}
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("app-extra"));
    }

    #[test]
    fn test_duplicate_package_names_rejected() {
        let err = parse_str(
            r#"
pkgnames=(demo demo)
pkgver=1.0-1
pkgdesc='A demo'
section=utils
demo() { package() { true; }; }
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_build_dependency_rejected_in_installdepends() {
        let err = parse_str(
            r#"
pkgnames=(demo)
pkgdesc='A demo'
pkgver=1.0-1
section=utils
installdepends=(build:gcc)
package() { true; }
"#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("only host packages"));
    }

    #[test]
    fn test_script_headers_make_bodies_standalone() {
        let recipe = parse_str(
            r#"
pkgnames=(demo)
pkgdesc='A demo'
pkgver=1.0-1
section=utils
image=base:v1

build() {
    gcc -o demo demo.c
}

package() {
    install -D "$srcdir"/demo "$pkgdir"/opt/bin/demo
}
"#,
        )
        .unwrap();

        let variant = recipe.variant("rmall").unwrap();
        let build = variant.build.as_ref().unwrap();
        assert!(build.contains("pkgver='1.0-1'") || build.contains("pkgver=1.0-1"));
        assert!(build.ends_with("gcc -o demo demo.c"));

        let pkg = &variant.packages[0];
        assert!(pkg.package.contains("pkgname='demo'"));
    }

    #[test]
    fn test_timestamp_formats() {
        let dir = tempfile::tempdir().unwrap();
        for value in ["2023-12-01T00:00:00Z", "2023-12-01T00:00Z", "2023-12-01"] {
            assert!(
                parse_timestamp(dir.path(), value).is_ok(),
                "rejected '{}'",
                value
            );
        }
        assert!(parse_timestamp(dir.path(), "yesterday").is_err());
    }
}
