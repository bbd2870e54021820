//! Per-run compile session
//!
//! All mutable front-end state for one compile invocation lives here: the
//! layered macro scope, captured PCD bindings, and the include search roots.
//! A session is built, used for one `preprocess` + `parse` pass, and
//! dropped; nothing leaks across runs.

use std::path::{Path, PathBuf};

use crate::scope::MacroScope;

#[derive(Debug, Clone)]
pub struct CompileSession {
    pub fdf_path: PathBuf,
    pub workspace_dir: PathBuf,
    pub platform_dir: Option<PathBuf>,
    pub scope: MacroScope,
}

impl CompileSession {
    pub fn new(fdf_path: impl Into<PathBuf>) -> Self {
        let fdf_path = fdf_path.into();
        let workspace_dir = fdf_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            fdf_path,
            workspace_dir,
            platform_dir: None,
            scope: MacroScope::new(),
        }
    }

    pub fn with_workspace(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    pub fn with_platform(mut self, dir: impl Into<PathBuf>) -> Self {
        self.platform_dir = Some(dir.into());
        self
    }

    /// Directory of the FDF file itself; first include search root.
    pub fn fdf_dir(&self) -> PathBuf {
        self.fdf_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Include search roots, in the order they are consulted:
    /// FDF directory, active-platform directory, workspace root.
    pub fn include_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.fdf_dir()];
        if let Some(platform) = &self.platform_dir {
            roots.push(platform.clone());
        }
        roots.push(self.workspace_dir.clone());
        roots
    }

    /// Resolve a possibly-relative path against the search roots; the first
    /// existing candidate wins. Absolute existing paths pass through.
    pub fn resolve_path(&self, path: &str) -> Option<PathBuf> {
        let p = Path::new(path);
        if p.is_absolute() {
            return p.exists().then(|| p.to_path_buf());
        }
        self.include_roots()
            .into_iter()
            .map(|root| root.join(p))
            .find(|candidate| candidate.exists())
    }
}
