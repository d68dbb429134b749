// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

use galley::hooks::HookContext;
use galley::{BuildHook, Builder, HostExecutor, Recipe};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Pinned recipe timestamp used across the tests
pub const TIMESTAMP: &str = "2023-12-01T00:00:00Z";

/// `TIMESTAMP` as seconds since the epoch
pub const EPOCH: u64 = 1_701_388_800;

/// Standard metadata block shared by the test recipes
pub const PREAMBLE: &str = "timestamp=2023-12-01T00:00:00Z\n\
                            maintainer='Test <test@example.com>'\n\
                            url=https://example.com/app\n\
                            license=MIT\n";

/// A recipe directory plus the work/dist directories of one build.
///
/// Keep the struct alive until assertions are done; the temp
/// directories are removed on drop.
pub struct BuildFixture {
    pub root: TempDir,
    pub recipe_dir: PathBuf,
    pub work_dir: PathBuf,
    pub dist_dir: PathBuf,
}

impl BuildFixture {
    /// Create a fixture with the recipe definition written to disk.
    pub fn new(definition: &str) -> Self {
        let root = TempDir::new().unwrap();
        let recipe_dir = root.path().join("recipe");
        let work_dir = root.path().join("work");
        let dist_dir = root.path().join("dist");
        fs::create_dir(&recipe_dir).unwrap();

        fs::write(
            recipe_dir.join("package"),
            format!("{}{}", PREAMBLE, definition),
        )
        .unwrap();

        Self {
            root,
            recipe_dir,
            work_dir,
            dist_dir,
        }
    }

    /// Add a source file next to the recipe definition.
    pub fn add_source(&self, name: &str, contents: &[u8]) {
        fs::write(self.recipe_dir.join(name), contents).unwrap();
    }

    /// Parse the fixture's recipe.
    pub fn parse(&self) -> galley::Result<Recipe> {
        galley::parse(&self.recipe_dir)
    }

    /// Builder running scripts on the host, without a container.
    pub fn builder(&self) -> Builder {
        Builder::new(&self.work_dir, &self.dist_dir).with_executor(Box::new(HostExecutor))
    }

    /// The `srcdir` used for one architecture.
    pub fn src_dir(&self, arch: &str) -> PathBuf {
        self.work_dir.join("recipe").join(arch).join("src")
    }
}

/// Hook recording every event it sees, with the package or path in
/// scope, for assertions on firing order.
pub struct RecordingHook {
    pub log: Arc<Mutex<Vec<String>>>,
    pub name: &'static str,
}

impl RecordingHook {
    pub fn new(name: &'static str) -> (Self, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                log: log.clone(),
                name,
            },
            log,
        )
    }

    fn record(&self, event: &str, detail: &str) {
        let entry = if detail.is_empty() {
            format!("{}:{}", self.name, event)
        } else {
            format!("{}:{}:{}", self.name, event, detail)
        };
        self.log.lock().unwrap().push(entry);
    }
}

impl BuildHook for RecordingHook {
    fn post_parse(&self, _ctx: &HookContext, _recipe: &mut Recipe) -> anyhow::Result<()> {
        self.record("post_parse", "");
        Ok(())
    }

    fn post_fetch_sources(
        &self,
        _ctx: &HookContext,
        _recipe: &Recipe,
        _src_dir: &Path,
    ) -> anyhow::Result<()> {
        self.record("post_fetch_sources", "");
        Ok(())
    }

    fn post_prepare(
        &self,
        _ctx: &HookContext,
        _recipe: &Recipe,
        _src_dir: &Path,
    ) -> anyhow::Result<()> {
        self.record("post_prepare", "");
        Ok(())
    }

    fn post_build(
        &self,
        _ctx: &HookContext,
        _recipe: &Recipe,
        _src_dir: &Path,
    ) -> anyhow::Result<()> {
        self.record("post_build", "");
        Ok(())
    }

    fn post_package(
        &self,
        ctx: &HookContext,
        _recipe: &Recipe,
        _src_dir: &Path,
        _pkg_dir: &Path,
    ) -> anyhow::Result<()> {
        self.record("post_package", ctx.package.unwrap_or(""));
        Ok(())
    }

    fn post_archive(
        &self,
        _ctx: &HookContext,
        _recipe: &Recipe,
        ar_path: &Path,
    ) -> anyhow::Result<()> {
        let name = ar_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record("post_archive", &name);
        Ok(())
    }
}

/// Decode an ipk into its three members.
pub fn read_ipk_members(path: &Path) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;

    let data = fs::read(path).unwrap();
    let mut archive = ar::Archive::new(&data[..]);
    let mut members = Vec::new();

    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.unwrap();
        let name = String::from_utf8_lossy(entry.header().identifier()).into_owned();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).unwrap();
        members.push((name, contents));
    }

    members
}

/// Decode a gzipped tar member into (path, mtime, mode, contents).
pub fn read_tar_gz(data: &[u8]) -> Vec<(String, u64, u32, Vec<u8>)> {
    use std::io::Read;

    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(data));
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().display().to_string();
            let mtime = entry.header().mtime().unwrap();
            let mode = entry.header().mode().unwrap();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            (name, mtime, mode, contents)
        })
        .collect()
}
