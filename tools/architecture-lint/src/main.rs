//! CLI entry point for the repo-local architecture lint.

use std::fmt;
use std::io::{self, Write};
use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::Dir;

fn main() -> ExitCode {
    let backend_dir = match workspace_root() {
        Ok(root) => root.join("backend"),
        Err(err) => {
            let _ = writeln!(io::stderr().lock(), "{err}");
            return ExitCode::FAILURE;
        }
    };
    match architecture_lint::lint_backend_sources(&backend_dir) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = writeln!(io::stderr().lock(), "{err}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WorkspaceRootError;

impl fmt::Display for WorkspaceRootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unable to locate workspace root (directory containing a workspace Cargo.toml)"
        )
    }
}

impl std::error::Error for WorkspaceRootError {}

/// First ancestor of `CARGO_WORKSPACE_DIR`, the working directory or this
/// crate's manifest directory that holds a `[workspace]` manifest.
fn workspace_root() -> Result<Utf8PathBuf, WorkspaceRootError> {
    let from_env = std::env::var("CARGO_WORKSPACE_DIR")
        .ok()
        .map(Utf8PathBuf::from);
    let from_cwd = std::env::current_dir()
        .ok()
        .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok());
    let from_manifest = Some(Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR")));

    [from_env, from_cwd, from_manifest]
        .into_iter()
        .flatten()
        .find_map(|start| find_workspace_root(&start))
        .ok_or(WorkspaceRootError)
}

fn find_workspace_root(start: &Utf8Path) -> Option<Utf8PathBuf> {
    start
        .ancestors()
        .find(|dir| declares_workspace(dir))
        .map(Utf8Path::to_path_buf)
}

fn declares_workspace(dir: &Utf8Path) -> bool {
    Dir::open_ambient_dir(dir, ambient_authority())
        .and_then(|dir| dir.read_to_string("Cargo.toml"))
        .is_ok_and(|contents| contents.contains("[workspace]"))
}
