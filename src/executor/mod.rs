// src/executor/mod.rs

//! Script execution in an isolated build environment
//!
//! The pipeline never runs recipe scripts itself: it hands them to an
//! [`Executor`] together with the container image, environment, bind
//! mounts, and working directory they need. The default
//! [`OciExecutor`] drives an OCI container runtime through its CLI;
//! [`HostExecutor`] runs scripts directly on the host for recipes and
//! tests that do not need isolation.
//!
//! Executors report the script's exit status; interpreting a non-zero
//! status is the caller's concern. Cancellation is checked while a
//! script runs and kills the subprocess.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Interval between cancellation checks while a script runs
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cooperative cancellation flag shared with the pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; running scripts are killed at the next poll.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A path bound into the execution environment
#[derive(Debug, Clone)]
pub struct BindMount {
    /// Path on the host
    pub source: PathBuf,
    /// Path inside the environment
    pub target: PathBuf,
    /// Mount read-write (default is read-only)
    pub writable: bool,
}

impl BindMount {
    pub fn readonly(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            writable: false,
        }
    }

    pub fn writable(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            writable: true,
        }
    }
}

/// One script execution request
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Container image identifier; executors without images ignore it
    pub image: String,

    /// Script body to run through the shell
    pub script: String,

    /// Environment bindings; paths refer to mount targets
    pub env: Vec<(String, String)>,

    /// Working directory inside the environment
    pub workdir: PathBuf,

    /// Host directories bound into the environment
    pub mounts: Vec<BindMount>,
}

/// Capability to run a shell script in an isolated environment.
pub trait Executor {
    /// Run the script and return its exit status.
    fn run(&self, request: &ExecRequest, cancel: &CancelToken) -> Result<i32>;
}

/// Executor backed by an OCI container runtime CLI.
pub struct OciExecutor {
    /// Runtime binary (`docker`, `podman`)
    runtime: String,

    /// Prefix prepended to recipe image identifiers
    image_prefix: String,
}

impl OciExecutor {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            image_prefix: String::new(),
        }
    }

    /// Prepend a registry prefix to every recipe image identifier.
    pub fn with_image_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.image_prefix = prefix.into();
        self
    }
}

impl Default for OciExecutor {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl Executor for OciExecutor {
    fn run(&self, request: &ExecRequest, cancel: &CancelToken) -> Result<i32> {
        let image = format!("{}{}", self.image_prefix, request.image);
        info!("running script in container image {}", image);

        let mut command = Command::new(&self.runtime);
        command.arg("run").arg("--rm");

        for mount in &request.mounts {
            let mut volume = format!(
                "{}:{}",
                mount.source.display(),
                mount.target.display()
            );
            if !mount.writable {
                volume.push_str(":ro");
            }
            command.arg("-v").arg(volume);
        }

        command.arg("-w").arg(&request.workdir);

        for (key, value) in &request.env {
            command.arg("-e").arg(format!("{}={}", key, value));
        }

        command
            .arg(&image)
            .arg("/usr/bin/env")
            .arg("bash")
            .arg("-c")
            .arg(&request.script);

        run_with_cancel(command, cancel)
    }
}

/// Executor running scripts directly on the host, without isolation.
///
/// Mount targets are translated back to their host sources, so
/// scripts see the same `$srcdir`/`$pkgdir` layout as in a container.
pub struct HostExecutor;

impl HostExecutor {
    fn translate(path: &Path, mounts: &[BindMount]) -> PathBuf {
        for mount in mounts {
            if let Ok(rest) = path.strip_prefix(&mount.target) {
                return mount.source.join(rest);
            }
        }
        path.to_path_buf()
    }
}

impl Executor for HostExecutor {
    fn run(&self, request: &ExecRequest, cancel: &CancelToken) -> Result<i32> {
        let workdir = Self::translate(&request.workdir, &request.mounts);
        debug!("running script on host in {}", workdir.display());

        let mut command = Command::new("bash");
        command.arg("-c").arg(&request.script).current_dir(&workdir);

        for (key, value) in &request.env {
            let translated = Self::translate(Path::new(value), &request.mounts);
            command.env(key, &translated);
        }

        run_with_cancel(command, cancel)
    }
}

/// Spawn a command, stream its output to the log, and wait for it
/// while honouring cancellation.
fn run_with_cancel(mut command: Command, cancel: &CancelToken) -> Result<i32> {
    if cancel.is_canceled() {
        return Err(Error::Canceled);
    }

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;

    // Drain output on separate threads so a chatty script never fills
    // the pipe while we are polling for exit
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_thread = stdout.map(|stream| {
        std::thread::spawn(move || {
            use std::io::{BufRead, BufReader};
            for line in BufReader::new(stream).lines().map_while(|l| l.ok()) {
                info!("| {}", line);
            }
        })
    });
    let stderr_thread = stderr.map(|stream| {
        std::thread::spawn(move || {
            use std::io::{BufRead, BufReader};
            for line in BufReader::new(stream).lines().map_while(|l| l.ok()) {
                warn!("| {}", line);
            }
        })
    });

    let status = loop {
        if cancel.is_canceled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Canceled);
        }

        if let Some(status) = child.wait_timeout(POLL_INTERVAL)? {
            break status;
        }
    };

    if let Some(thread) = stdout_thread {
        let _ = thread.join();
    }
    if let Some(thread) = stderr_thread {
        let _ = thread.join();
    }

    Ok(status.code().unwrap_or(-1))
}
