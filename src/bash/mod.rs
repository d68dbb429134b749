// src/bash/mod.rs

//! Shell evaluator bridge
//!
//! Recipes are authored in Bash; the rest of the crate is not. The
//! bridge keeps that boundary clean: it evaluates a recipe in a child
//! shell process, asks the shell itself to print its symbol table
//! (`declare -p` for variables, `declare -f` for functions), and
//! parses that textual form back into typed values. Recipe semantics
//! stay faithful to the shell without shell semantics leaking into the
//! core.
//!
//! Evaluation runs with a cleared environment plus whatever bindings
//! the caller provides (placeholders for `srcdir`/`pkgdir` and a
//! parse-phase sentinel). Recipes must restrict themselves to
//! declarations at the top level; anything with side effects belongs
//! inside a function.

mod dump;

pub use dump::parse_declarations;

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

/// A variable captured from the shell symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Plain scalar string
    Scalar(String),
    /// Indexed array (`declare -a`)
    Indexed(Vec<String>),
    /// Associative array (`declare -A`)
    Assoc(BTreeMap<String, String>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "string",
            Value::Indexed(_) => "indexed array",
            Value::Assoc(_) => "associative array",
        }
    }
}

/// Variables keyed by name, in lexical order
pub type Variables = BTreeMap<String, Value>;

/// Function bodies keyed by name
pub type Functions = BTreeMap<String, String>;

/// Marker separating recipe output from the symbol dump
const DUMP_MARKER: &str = "---8<--- galley symbol dump ---8<---";

/// Variables the shell itself maintains; never part of a recipe
const SHELL_VARIABLES: &[&str] = &[
    "BASH",
    "BASHOPTS",
    "BASHPID",
    "BASH_ALIASES",
    "BASH_ARGC",
    "BASH_ARGV",
    "BASH_ARGV0",
    "BASH_CMDS",
    "BASH_COMMAND",
    "BASH_LINENO",
    "BASH_LOADABLES_PATH",
    "BASH_SOURCE",
    "BASH_SUBSHELL",
    "BASH_VERSINFO",
    "BASH_VERSION",
    "COLUMNS",
    "COMP_WORDBREAKS",
    "DIRSTACK",
    "EPOCHREALTIME",
    "EPOCHSECONDS",
    "EUID",
    "FUNCNAME",
    "GROUPS",
    "HISTCMD",
    "HISTFILE",
    "HISTFILESIZE",
    "HISTSIZE",
    "HOSTNAME",
    "HOSTTYPE",
    "IFS",
    "LINENO",
    "LINES",
    "MACHTYPE",
    "MAILCHECK",
    "OLDPWD",
    "OPTERR",
    "OPTIND",
    "OSTYPE",
    "PATH",
    "PIPESTATUS",
    "PPID",
    "PS1",
    "PS2",
    "PS4",
    "PWD",
    "RANDOM",
    "SECONDS",
    "SHELL",
    "SHELLOPTS",
    "SHLVL",
    "SRANDOM",
    "TERM",
    "UID",
    "_",
];

/// Evaluate a shell script and capture its declarations.
///
/// The script runs in a fresh `bash --noprofile --norc` process with a
/// cleared environment extended by `env`. Returns the variables and
/// functions the script declared; bindings injected through `env` and
/// shell-maintained variables are filtered out.
pub fn get_declarations(
    script: &str,
    env: &[(String, String)],
) -> Result<(Variables, Functions)> {
    let mut child = Command::new("bash")
        .arg("--noprofile")
        .arg("--norc")
        .env_clear()
        .env("PATH", "/usr/bin:/bin")
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::ShellEvaluation(format!("failed to spawn bash: {}", e)))?;

    let input = format!(
        "{}\nprintf '%s\\n' '{}'\ndeclare -p\ndeclare -f\n",
        script, DUMP_MARKER
    );

    {
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| Error::ShellEvaluation("bash stdin unavailable".to_string()))?;
        // A script that exits early closes the pipe; the exit status
        // check below reports the actual failure
        let _ = stdin.write_all(input.as_bytes());
    }

    let output = child
        .wait_with_output()
        .map_err(|e| Error::ShellEvaluation(format!("failed to wait for bash: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::ShellEvaluation(format!(
            "bash exited with status {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let dump = stdout
        .split_once(DUMP_MARKER)
        .map(|(_, rest)| rest)
        .ok_or_else(|| Error::ShellEvaluation("symbol dump marker not found".to_string()))?;

    let (mut variables, functions) = parse_declarations(dump)?;

    for name in SHELL_VARIABLES {
        variables.remove(*name);
    }
    for (name, _) in env {
        variables.remove(name);
    }

    debug!(
        "captured {} variable(s), {} function(s)",
        variables.len(),
        functions.len()
    );

    Ok((variables, functions))
}

/// Render variables back into shell assignments.
///
/// Used to build the header that lets function bodies run standalone
/// in the build container with the recipe's declarations in scope.
pub fn put_variables(variables: &Variables) -> String {
    let mut out = String::new();

    for (name, value) in variables {
        match value {
            Value::Scalar(s) => {
                out.push_str(name);
                out.push('=');
                out.push_str(&quote(s));
            }
            Value::Indexed(items) => {
                out.push_str(name);
                out.push_str("=(");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    out.push_str(&quote(item));
                }
                out.push(')');
            }
            Value::Assoc(map) => {
                out.push_str("declare -A ");
                out.push_str(name);
                out.push_str("=(");
                for (i, (key, val)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    out.push('[');
                    out.push_str(&quote(key));
                    out.push_str("]=");
                    out.push_str(&quote(val));
                }
                out.push(')');
            }
        }
        out.push('\n');
    }

    out
}

/// Render function definitions back into shell syntax.
pub fn put_functions(functions: &Functions) -> String {
    let mut out = String::new();

    for (name, body) in functions {
        out.push_str(name);
        out.push_str("() {\n");
        out.push_str(body);
        out.push_str("\n}\n");
    }

    out
}

/// Single-quote a string for the shell.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}
