//! Repo-local architectural lint for the invoice bot's hexagonal layout.
//!
//! The backend keeps its services and ports in `domain`, chat transports in
//! `inbound`, and portal, storage and alerting adapters in `outbound`. The
//! composition root (`bot`), settings (`config`) and tracing setup
//! (`telemetry`) sit beside them. This crate checks, per layer, which of
//! those sibling modules and which external crates a source file may name:
//!
//! - `domain` must not reach adapters, the composition root, settings or
//!   tracing setup, nor HTTP, filesystem or configuration crates
//! - `inbound` must not reach `outbound` or perform HTTP or file I/O itself
//! - `outbound` must not reach `inbound` or load configuration
//!
//! Run it with `cargo run -p architecture-lint` from anywhere in the
//! workspace.

use std::collections::BTreeSet;
use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::Dir;
use syn::visit::Visit;

/// Library name of the backend crate as seen from integration code.
const BACKEND_CRATE: &str = "invoice_backend";

/// Top-level modules of the backend crate.
const BACKEND_MODULES: &[&str] = &[
    "bot",
    "config",
    "domain",
    "inbound",
    "outbound",
    "telemetry",
    "test_support",
];

/// A single boundary violation discovered by the linter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File path relative to `backend/src`.
    pub file: Utf8PathBuf,
    /// Human-readable description of the violated rule.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file, self.message)
    }
}

/// Failure modes returned by the architecture lint.
#[derive(Debug)]
pub enum ArchitectureLintError {
    /// Filesystem traversal or reading failed.
    Io(io::Error),
    /// A source path was not valid UTF-8.
    NonUtf8Path(String),
    /// Rust source parsing failed.
    Parse {
        /// File that failed to parse.
        file: Utf8PathBuf,
        /// Parser diagnostic.
        message: String,
    },
    /// One or more boundary violations were found.
    Violations(Vec<Violation>),
}

impl fmt::Display for ArchitectureLintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error while linting architecture: {err}"),
            Self::NonUtf8Path(path) => write!(f, "source path is not valid UTF-8: {path}"),
            Self::Parse { file, message } => write!(
                f,
                "Failed to parse Rust source while linting architecture ({file}): {message}"
            ),
            Self::Violations(violations) => {
                writeln!(f, "Architecture boundary violations:")?;
                for violation in violations {
                    writeln!(f, "- {violation}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ArchitectureLintError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ArchitectureLintError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Lint the backend crate sources on disk.
///
/// `backend_dir` must be the `backend/` directory at the repository root.
///
/// # Errors
///
/// Returns [`ArchitectureLintError::Violations`] listing every breach, or an
/// I/O or parse error when the sources cannot be read.
pub fn lint_backend_sources(backend_dir: &Utf8Path) -> Result<(), ArchitectureLintError> {
    let src = Dir::open_ambient_dir(backend_dir.join("src"), ambient_authority())?;
    let sources = collect_lint_sources(&src)?;
    lint_sources(&sources)
}

/// Lint the provided Rust sources. Intended for unit and behaviour tests.
///
/// # Errors
///
/// Returns [`ArchitectureLintError::Violations`] listing every breach, or a
/// parse error for a file outside the known layers or with invalid syntax.
pub fn lint_sources(sources: &[LintSource]) -> Result<(), ArchitectureLintError> {
    let mut violations = Vec::new();

    for source in sources {
        let rule = LayerRule::for_path(&source.file).ok_or_else(|| ArchitectureLintError::Parse {
            file: source.file.clone(),
            message: "unable to infer module layer from file path".to_owned(),
        })?;
        let parsed =
            syn::parse_file(&source.contents).map_err(|err| ArchitectureLintError::Parse {
                file: source.file.clone(),
                message: err.to_string(),
            })?;
        violations.extend(rule.check(&source.file, &parsed));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ArchitectureLintError::Violations(violations))
    }
}

/// A Rust source file to be linted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintSource {
    /// Path relative to `backend/src`.
    pub file: Utf8PathBuf,
    /// File contents.
    pub contents: String,
}

/// What one layer may not name.
#[derive(Debug, Clone, Copy)]
struct LayerRule {
    layer: &'static str,
    forbidden_modules: &'static [&'static str],
    forbidden_crates: &'static [&'static str],
}

const LAYER_RULES: &[LayerRule] = &[
    LayerRule {
        layer: "domain",
        forbidden_modules: &["bot", "config", "inbound", "outbound", "telemetry"],
        forbidden_crates: &[
            "cap_std",
            "clap",
            "httpmock",
            "ortho_config",
            "reqwest",
            "tracing_subscriber",
        ],
    },
    LayerRule {
        layer: "inbound",
        forbidden_modules: &["bot", "config", "outbound"],
        forbidden_crates: &["cap_std", "ortho_config", "reqwest"],
    },
    LayerRule {
        layer: "outbound",
        forbidden_modules: &["bot", "config", "inbound"],
        forbidden_crates: &["clap", "ortho_config"],
    },
];

impl LayerRule {
    fn for_path(relative_path: &Utf8Path) -> Option<Self> {
        let first = relative_path.components().next()?.as_str();
        LAYER_RULES.iter().copied().find(|rule| rule.layer == first)
    }

    fn check(self, file: &Utf8Path, parsed: &syn::File) -> Vec<Violation> {
        let mut collector = PathCollector::default();
        collector.visit_file(parsed);

        let mut messages = BTreeSet::new();
        for segments in &collector.paths {
            if let Some(root) = internal_module_root(segments)
                .filter(|root| self.forbidden_modules.contains(root))
            {
                messages.insert(format!(
                    "{} module must not depend on crate::{root}",
                    self.layer
                ));
            }
            if let Some(root) =
                external_crate_root(segments).filter(|root| self.forbidden_crates.contains(root))
            {
                messages.insert(format!(
                    "{} module must not depend on external crate `{root}`",
                    self.layer
                ));
            }
        }

        messages
            .into_iter()
            .map(|message| Violation {
                file: file.to_path_buf(),
                message,
            })
            .collect()
    }
}

fn is_relative_module_segment(segment: &str) -> bool {
    matches!(segment, "crate" | "self" | "super")
}

/// Backend module a path resolves into, for `crate::`, `super::`, bare and
/// `invoice_backend::` prefixed paths.
fn internal_module_root(segments: &[String]) -> Option<&str> {
    let first = segments.first()?.as_str();
    // A lone identifier such as a local `config` binding names no module.
    if segments.len() > 1 && BACKEND_MODULES.contains(&first) {
        return Some(first);
    }
    let start_index = if is_relative_module_segment(first) {
        segments
            .iter()
            .position(|segment| !is_relative_module_segment(segment.as_str()))?
    } else if first == BACKEND_CRATE {
        1
    } else {
        return None;
    };
    segments
        .get(start_index)
        .map(String::as_str)
        .filter(|root| BACKEND_MODULES.contains(root))
}

fn external_crate_root(segments: &[String]) -> Option<&str> {
    let root = segments.first()?.as_str();
    if is_relative_module_segment(root) || root == BACKEND_CRATE {
        return None;
    }
    Some(root)
}

#[derive(Default)]
struct PathCollector {
    paths: BTreeSet<Vec<String>>,
}

impl PathCollector {
    fn record_path(&mut self, path: &syn::Path) {
        let segments = path
            .segments
            .iter()
            .map(|segment| segment.ident.to_string())
            .collect::<Vec<_>>();
        if !segments.is_empty() {
            self.paths.insert(segments);
        }
    }

    fn record_use_tree(&mut self, tree: &syn::UseTree, mut prefix: Vec<String>) {
        match tree {
            syn::UseTree::Path(path) => {
                prefix.push(path.ident.to_string());
                self.record_use_tree(&path.tree, prefix);
            }
            syn::UseTree::Name(name) => {
                prefix.push(name.ident.to_string());
                self.paths.insert(prefix);
            }
            syn::UseTree::Rename(rename) => {
                prefix.push(rename.ident.to_string());
                self.paths.insert(prefix);
            }
            syn::UseTree::Glob(_) => {
                prefix.push("*".to_owned());
                self.paths.insert(prefix);
            }
            syn::UseTree::Group(group) => {
                for item in &group.items {
                    self.record_use_tree(item, prefix.clone());
                }
            }
        }
    }
}

impl<'ast> Visit<'ast> for PathCollector {
    fn visit_path(&mut self, node: &'ast syn::Path) {
        self.record_path(node);
        syn::visit::visit_path(self, node);
    }

    fn visit_item_use(&mut self, node: &'ast syn::ItemUse) {
        self.record_use_tree(&node.tree, Vec::new());
    }
}

fn collect_lint_sources(src: &Dir) -> Result<Vec<LintSource>, ArchitectureLintError> {
    let mut sources = Vec::new();
    for rule in LAYER_RULES {
        if !src.exists(rule.layer) {
            continue;
        }
        collect_sources_under(&src.open_dir(rule.layer)?, Utf8Path::new(rule.layer), &mut sources)?;
    }
    Ok(sources)
}

fn collect_sources_under(
    dir: &Dir,
    relative: &Utf8Path,
    sources: &mut Vec<LintSource>,
) -> Result<(), ArchitectureLintError> {
    for entry in dir.entries()? {
        let entry = entry?;
        let os_name = entry.file_name();
        let name = os_name.to_str().ok_or_else(|| {
            ArchitectureLintError::NonUtf8Path(os_name.to_string_lossy().into_owned())
        })?;
        let path = relative.join(name);
        if entry.file_type()?.is_dir() {
            collect_sources_under(&entry.open_dir()?, &path, sources)?;
            continue;
        }
        if path.extension() != Some("rs") {
            continue;
        }
        let contents = dir.read_to_string(name)?;
        sources.push(LintSource {
            file: path,
            contents,
        });
    }
    Ok(())
}
