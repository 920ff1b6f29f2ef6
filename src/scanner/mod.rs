//! Repository discovery.
//!
//! Walks the repository once at startup and produces the
//! [`RepositoryContext`] every specialist sees. The context is immutable for
//! the duration of a run.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

/// Configuration for file scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// File extensions to include (e.g., ["rs", "py", "js"])
    pub extensions: Vec<String>,
    /// Directory or file names to exclude (e.g., ["node_modules", ".git"])
    pub excludes: Vec<String>,
    /// Maximum file size in bytes
    pub max_file_size: u64,
    /// Maximum number of files to index
    pub max_files: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: vec![
                "py", "rs", "js", "ts", "jsx", "tsx", "go", "java", "c", "cpp", "h", "hpp", "cs",
                "rb", "php", "swift", "kt", "scala",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            excludes: vec![
                ".git",
                "node_modules",
                "dist",
                "build",
                "target",
                "__pycache__",
                ".venv",
                "venv",
                "env",
                "site-packages",
                ".mypy_cache",
                ".pytest_cache",
                ".ruff_cache",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_file_size: 1024 * 1024,
            max_files: None,
        }
    }
}

impl From<&crate::config::ScannerConfig> for ScanConfig {
    fn from(config: &crate::config::ScannerConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            excludes: config.excludes.clone(),
            max_file_size: config.max_file_size,
            max_files: config.max_files,
        }
    }
}

/// Scanned file information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Relative path from repo root, `/`-separated.
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// File extension (without dot)
    pub extension: String,
}

/// Everything a specialist may know about the repository under lint.
#[derive(Debug, Clone)]
pub struct RepositoryContext {
    /// Canonical repository root.
    pub root: PathBuf,
    /// Indexed source files, sorted by path.
    pub files: Vec<ScannedFile>,
    /// Best-practice guidelines loaded from the rules path.
    pub rules_text: Option<String>,
    /// Extensions/excludes the tools must honour.
    pub scan_config: ScanConfig,
}

impl RepositoryContext {
    /// Index `root` and build the context.
    pub fn discover(root: &Path, scan_config: ScanConfig, rules_text: Option<String>) -> Result<Self> {
        let root = fs::canonicalize(root)
            .with_context(|| format!("Cannot resolve repository root: {}", root.display()))?;

        let scanner = FileScanner::new(root.clone(), scan_config.clone());
        let files = scanner.scan()?;
        info!("Indexed {} source files under {}", files.len(), root.display());

        Ok(Self {
            root,
            files,
            rules_text,
            scan_config,
        })
    }

    /// True while the root still points at a directory.
    pub fn is_resolvable(&self) -> bool {
        self.root.is_dir()
    }

    /// File counts keyed by extension.
    pub fn counts_by_extension(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for file in &self.files {
            *counts.entry(file.extension.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Resolve a repo-relative (or absolute) path, refusing anything that
    /// escapes the root.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let resolved = match fs::canonicalize(&joined) {
            Ok(p) => p,
            // Nonexistent paths: fall back to a lexical check.
            Err(_) => lexical_normalize(&joined),
        };

        resolved.starts_with(&self.root).then_some(resolved)
    }

    /// Relative display path for an absolute path under the root.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    pub fn scanner(&self) -> FileScanner {
        FileScanner::new(self.root.clone(), self.scan_config.clone())
    }
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// File scanner for discovering source files.
pub struct FileScanner {
    config: ScanConfig,
    repo_root: PathBuf,
}

impl FileScanner {
    /// Create a new file scanner.
    pub fn new(repo_root: PathBuf, config: ScanConfig) -> Self {
        Self { config, repo_root }
    }

    /// Scan for all matching files, sorted by path.
    pub fn scan(&self) -> Result<Vec<ScannedFile>> {
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.repo_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_excluded_entry(e));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.matches(entry.path()) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let rel_path = entry
                .path()
                .strip_prefix(&self.repo_root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");

            files.push(ScannedFile {
                path: rel_path,
                size,
                extension: extension_of(entry.path()),
            });

            if let Some(max) = self.config.max_files {
                if files.len() >= max {
                    break;
                }
            }
        }

        Ok(files)
    }

    /// List a directory's immediate children (for tool use).
    pub fn list_directory(&self, dir_path: &Path) -> Result<Vec<String>> {
        if !dir_path.is_dir() {
            anyhow::bail!("Not a directory: {}", dir_path.display());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(dir_path)?.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if self.is_excluded(&name) {
                continue;
            }
            let suffix = if entry.path().is_dir() { "/" } else { "" };
            entries.push(format!("{}{}", name, suffix));
        }

        entries.sort();
        Ok(entries)
    }

    /// Check if a file matches scan criteria.
    pub fn matches(&self, path: &Path) -> bool {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if self.is_excluded(name) {
                return false;
            }
        }

        let ext = extension_of(path);
        if !self.config.extensions.iter().any(|e| *e == ext) {
            return false;
        }

        match fs::metadata(path) {
            Ok(metadata) => metadata.len() <= self.config.max_file_size,
            Err(_) => false,
        }
    }

    fn is_excluded_entry(&self, entry: &DirEntry) -> bool {
        entry
            .file_name()
            .to_str()
            .map(|name| self.is_excluded(name))
            .unwrap_or(true)
    }

    /// Check if a name matches exclusion patterns.
    fn is_excluded(&self, name: &str) -> bool {
        // Hidden files
        if name.starts_with('.') {
            return true;
        }

        self.config.excludes.iter().any(|pattern| name == pattern)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string()
}
