// tests/build_pipeline.rs

//! End-to-end pipeline tests running recipe scripts on the host.

mod common;

use common::{BuildFixture, EPOCH, RecordingHook, read_ipk_members, read_tar_gz};
use galley::hooks::HookContext;
use galley::{BuildHook, Error, HookRegistry, Recipe};
use std::fs;
use std::io::Write;

#[test]
fn test_single_package_minimal_build() {
    let fixture = BuildFixture::new(
        r#"
archs=(rmall)
pkgnames=(foo)
pkgver=0.0.1-1
pkgdesc='Demo binary'
section=utils
image=base:v1
source=(foo.c)
sha256sums=(SKIP)

build() {
    cp foo.c foo
}

package() {
    install -D -m 755 "$srcdir"/foo "$pkgdir"/opt/bin/foo
}
"#,
    );
    fixture.add_source("foo.c", b"int main(void) { return 0; }\n");

    let mut recipe = fixture.parse().unwrap();
    let outputs = fixture.builder().make(&mut recipe).unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(
        outputs[0],
        fixture.dist_dir.join("rmall/foo_0.0.1-1_rmall.ipk")
    );
    assert!(outputs[0].is_file());

    // The archive's own mtime is pinned to the recipe timestamp
    let metadata = fs::metadata(&outputs[0]).unwrap();
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    assert_eq!(mtime.unix_seconds(), EPOCH as i64);

    let members = read_ipk_members(&outputs[0]);
    assert_eq!(members[0].0, "debian-binary");
    assert_eq!(members[0].1, b"2.0\n");

    let control_entries = read_tar_gz(&members[1].1);
    let control = control_entries
        .iter()
        .find(|(name, ..)| name == "./control")
        .unwrap();
    let control_text = String::from_utf8_lossy(&control.3);
    assert!(control_text.contains("Package: foo\n"));
    assert!(control_text.contains("Version: 0.0.1-1\n"));
    assert!(control_text.contains("Architecture: rmall\n"));
    assert!(control_text.contains("Maintainer: Test <test@example.com>\n"));

    let data_entries = read_tar_gz(&members[2].1);
    let binary = data_entries
        .iter()
        .find(|(name, ..)| name == "./opt/bin/foo")
        .unwrap();
    assert_eq!(binary.2, 0o755);
    assert_eq!(binary.3, b"int main(void) { return 0; }\n");

    for (name, mtime, ..) in &data_entries {
        assert_eq!(*mtime, EPOCH, "wrong mtime for {}", name);
    }
}

#[test]
fn test_split_architecture_specialization() {
    let fixture = BuildFixture::new(
        r#"
archs=(rm1 rm2)
pkgnames=(demo)
pkgver=1.0-1
pkgdesc='Split-arch demo'
section=utils
image=base:v1
image_rm2=base:v2
source=(common.c)
source_rm2=(extra.c)
sha256sums=(SKIP)
sha256sums_rm2=(SKIP)

build() {
    :
}

package() {
    install -D "$srcdir"/common.c "$pkgdir"/opt/src/common.c
}
"#,
    );
    fixture.add_source("common.c", b"common\n");
    fixture.add_source("extra.c", b"extra\n");

    let recipe = fixture.parse().unwrap();

    let rm1 = recipe.variant("rm1").unwrap();
    assert_eq!(rm1.image, "base:v1");
    assert_eq!(rm1.sources.len(), 1);

    let rm2 = recipe.variant("rm2").unwrap();
    assert_eq!(rm2.image, "base:v2");
    assert_eq!(rm2.sources.len(), 2);

    // Build both variants; each fetches its own source set
    let mut recipe = recipe;
    let outputs = fixture.builder().make(&mut recipe).unwrap();
    assert_eq!(outputs.len(), 2);
    assert!(fixture.src_dir("rm1").join("common.c").is_file());
    assert!(!fixture.src_dir("rm1").join("extra.c").exists());
    assert!(fixture.src_dir("rm2").join("extra.c").is_file());
}

#[test]
fn test_checksum_enforcement_aborts() {
    let fixture = BuildFixture::new(&format!(
        r#"
pkgnames=(foo)
pkgver=0.0.1-1
pkgdesc='Demo'
section=utils
source=(foo.c)
sha256sums=({})

package() {{
    true
}}
"#,
        "0".repeat(64)
    ));
    fixture.add_source("foo.c", b"int main;\n");

    let mut recipe = fixture.parse().unwrap();
    let err = fixture.builder().make(&mut recipe).unwrap_err();

    match err {
        Error::ChecksumMismatch { url, expected, .. } => {
            assert_eq!(url, "foo.c");
            assert_eq!(expected, "0".repeat(64));
        }
        other => panic!("expected checksum mismatch, got {:?}", other),
    }
    assert!(!fixture.dist_dir.join("rmall").exists());
}

#[test]
fn test_multi_package_fan_out() {
    let fixture = BuildFixture::new(
        r#"
pkgnames=(alpha beta)
pkgver=1.0-1
section=utils

alpha() {
    pkgdesc='First package'

    package() {
        install -D -m 644 /dev/null "$pkgdir"/opt/share/alpha
    }
}

beta() {
    pkgdesc='Second package'

    package() {
        install -D -m 644 /dev/null "$pkgdir"/opt/share/beta
    }
}
"#,
    );

    let (hook, log) = RecordingHook::new("rec");
    let mut hooks = HookRegistry::new();
    hooks.register("rec", Box::new(hook));

    let mut recipe = fixture.parse().unwrap();
    let outputs = fixture
        .builder()
        .with_hooks(hooks)
        .make(&mut recipe)
        .unwrap();

    assert_eq!(outputs.len(), 2);
    assert!(outputs[0].ends_with("rmall/alpha_1.0-1_rmall.ipk"));
    assert!(outputs[1].ends_with("rmall/beta_1.0-1_rmall.ipk"));

    // post_package and post_archive fire once per package, in
    // declaration order
    let log = log.lock().unwrap();
    let per_package: Vec<&str> = log
        .iter()
        .filter(|entry| entry.contains("post_package") || entry.contains("post_archive"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        per_package,
        [
            "rec:post_package:alpha",
            "rec:post_archive:alpha_1.0-1_rmall.ipk",
            "rec:post_package:beta",
            "rec:post_archive:beta_1.0-1_rmall.ipk",
        ]
    );
}

#[test]
fn test_auto_extract_prefix_stripping() {
    let fixture = BuildFixture::new(
        r#"
pkgnames=(foo)
pkgver=0.0.1-1
pkgdesc='Demo'
section=utils
source=(src.zip)
sha256sums=(SKIP)
noextract=()

package() {
    install -D -m 644 "$srcdir"/Makefile "$pkgdir"/opt/share/Makefile
}
"#,
    );

    // Zip with every entry under a release directory
    let file = fs::File::create(fixture.recipe_dir.join("src.zip")).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, body) in [
        ("src-abc/Makefile", &b"all:\n"[..]),
        ("src-abc/main.c", b"int main;\n"),
        ("src-abc/include/x.h", b"#pragma once\n"),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap();

    let mut recipe = fixture.parse().unwrap();
    fixture.builder().make(&mut recipe).unwrap();

    let src_dir = fixture.src_dir("rmall");
    assert!(src_dir.join("Makefile").is_file());
    assert!(src_dir.join("main.c").is_file());
    assert!(src_dir.join("include/x.h").is_file());
    assert!(!src_dir.join("src-abc").exists());
    // The archive itself is removed after extraction
    assert!(!src_dir.join("src.zip").exists());
}

/// Hook scheduling an extra package during post_parse.
struct AppendPackage;

impl BuildHook for AppendPackage {
    fn post_parse(&self, ctx: &HookContext, recipe: &mut Recipe) -> anyhow::Result<()> {
        let arch = ctx.arch.to_string();
        let variant = recipe.variants.get_mut(&arch).unwrap();
        let mut extra = variant.packages[0].clone();
        extra.name = "extra".to_string();
        extra.description = "Added by a hook".to_string();
        extra.package = "true".to_string();
        variant.packages.push(extra);
        Ok(())
    }
}

#[test]
fn test_hook_mutation_adds_package() {
    let fixture = BuildFixture::new(
        r#"
pkgnames=(foo)
pkgver=0.0.1-1
pkgdesc='Demo'
section=utils

package() {
    true
}
"#,
    );

    let mut hooks = HookRegistry::new();
    hooks.register("append", Box::new(AppendPackage));

    let mut recipe = fixture.parse().unwrap();
    let outputs = fixture
        .builder()
        .with_hooks(hooks)
        .make(&mut recipe)
        .unwrap();

    assert_eq!(outputs.len(), 2);
    assert!(outputs[1].ends_with("rmall/extra_0.0.1-1_rmall.ipk"));
    assert!(outputs[1].is_file());
}

#[test]
fn test_hook_firing_counts_and_order() {
    let fixture = BuildFixture::new(
        r#"
pkgnames=(foo)
pkgver=0.0.1-1
pkgdesc='Demo'
section=utils
image=base:v1
source=(foo.c)
sha256sums=(SKIP)

prepare() {
    :
}

build() {
    :
}

package() {
    true
}
"#,
    );
    fixture.add_source("foo.c", b"int main;\n");

    let (first, log) = RecordingHook::new("one");
    let second = RecordingHook {
        log: log.clone(),
        name: "two",
    };
    let mut hooks = HookRegistry::new();
    hooks.register("one", Box::new(first));
    hooks.register("two", Box::new(second));

    let mut recipe = fixture.parse().unwrap();
    fixture.builder().with_hooks(hooks).make(&mut recipe).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(
        *log,
        vec![
            "one:post_parse",
            "two:post_parse",
            "one:post_fetch_sources",
            "two:post_fetch_sources",
            "one:post_prepare",
            "two:post_prepare",
            "one:post_build",
            "two:post_build",
            "one:post_package:foo",
            "two:post_package:foo",
            "one:post_archive:foo_0.0.1-1_rmall.ipk",
            "two:post_archive:foo_0.0.1-1_rmall.ipk",
        ]
    );
}

#[test]
fn test_failing_build_script_aborts() {
    let fixture = BuildFixture::new(
        r#"
pkgnames=(foo)
pkgver=0.0.1-1
pkgdesc='Demo'
section=utils
image=base:v1

build() {
    exit 7
}

package() {
    true
}
"#,
    );

    let mut recipe = fixture.parse().unwrap();
    let err = fixture.builder().make(&mut recipe).unwrap_err();

    match err {
        Error::BuildScript { script, status } => {
            assert_eq!(script, "build");
            assert_eq!(status, 7);
        }
        other => panic!("expected build script error, got {:?}", other),
    }
    // The pipeline never reached the archive phase
    assert!(!fixture.dist_dir.join("rmall").exists());
}

#[test]
fn test_cancellation_before_start() {
    let fixture = BuildFixture::new(
        r#"
pkgnames=(foo)
pkgver=0.0.1-1
pkgdesc='Demo'
section=utils

package() {
    true
}
"#,
    );

    let mut recipe = fixture.parse().unwrap();
    let builder = fixture.builder();
    builder.cancel_token().cancel();

    let err = builder.make(&mut recipe).unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

#[test]
fn test_maintainer_scripts_in_archive() {
    let fixture = BuildFixture::new(
        r#"
pkgnames=(foo)
pkgver=0.0.1-1
pkgdesc='Demo'
section=utils
installdepends=(libbar 'libbaz>=1.0-1')

package() {
    true
}

configure() {
    echo configured
}

preremove() {
    echo leaving
}
"#,
    );

    let mut recipe = fixture.parse().unwrap();
    let outputs = fixture.builder().make(&mut recipe).unwrap();

    let members = read_ipk_members(&outputs[0]);
    let entries = read_tar_gz(&members[1].1);
    let names: Vec<&str> = entries.iter().map(|(n, ..)| n.as_str()).collect();
    assert_eq!(names, ["./", "./control", "./postinst", "./prerm"]);

    let postinst = entries.iter().find(|(n, ..)| n == "./postinst").unwrap();
    assert_eq!(postinst.2, 0o755);
    let script = String::from_utf8_lossy(&postinst.3);
    assert!(script.starts_with("#!/usr/bin/env bash"));
    assert!(script.contains("if [[ $1 = configure ]]"));
    assert!(script.contains("echo configured"));

    let control = entries.iter().find(|(n, ..)| n == "./control").unwrap();
    let control_text = String::from_utf8_lossy(&control.3);
    assert!(control_text.contains("Depends: libbar, libbaz (>= 1.0-1)\n"));
}

#[test]
fn test_byte_identical_rebuild() {
    let definition = r#"
pkgnames=(foo)
pkgver=0.0.1-1
pkgdesc='Demo'
section=utils
source=(foo.c)
sha256sums=(SKIP)

package() {
    install -D -m 755 "$srcdir"/foo.c "$pkgdir"/opt/bin/foo
}

configure() {
    echo configured
}
"#;

    let mut archives = Vec::new();
    for _ in 0..2 {
        let fixture = BuildFixture::new(definition);
        fixture.add_source("foo.c", b"int main(void) { return 0; }\n");

        let mut recipe = fixture.parse().unwrap();
        let outputs = fixture.builder().make(&mut recipe).unwrap();
        archives.push(fs::read(&outputs[0]).unwrap());
    }

    assert_eq!(
        archives[0], archives[1],
        "two builds from identical inputs must be byte-identical"
    );
}
