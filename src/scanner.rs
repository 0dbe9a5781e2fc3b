use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// A regular file visible to the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Workspace-relative path, forward slashes.
    pub path: String,
    /// Modification time in milliseconds since the epoch.
    pub mtime_ms: i64,
    /// File size in bytes.
    pub size: u64,
}

/// Compiled include/exclude patterns for a workspace.
pub struct Scanner {
    include: GlobSet,
    exclude: GlobSet,
}

impl Scanner {
    pub fn new(include_patterns: &[String], exclude_patterns: &[String]) -> Result<Self> {
        Ok(Scanner {
            include: build_globset(include_patterns)?,
            exclude: build_globset(exclude_patterns)?,
        })
    }

    /// Walk the workspace and collect every regular file matching at least
    /// one include pattern and no exclude pattern. Hidden files and
    /// directories are skipped. Results are sorted by path for
    /// deterministic ordering.
    pub fn scan(&self, root: &Path) -> Result<Vec<ScannedFile>> {
        if !root.exists() {
            return Err(Error::Config(format!(
                "workspace root does not exist: {}",
                root.display()
            )));
        }

        let mut files = Vec::new();
        // depth 0 is the root itself, which may legitimately be dot-named.
        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name().to_string_lossy().as_ref()));
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                // Unreadable directories are skipped, not fatal.
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");

            if !self.matches(&rel) {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| {
                Error::Io(std::io::Error::other(format!(
                    "cannot stat {}: {}",
                    rel, e
                )))
            })?;
            files.push(ScannedFile {
                path: rel,
                mtime_ms: mtime_millis(&metadata),
                size: metadata.len(),
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Whether a workspace-relative path matches the configured patterns.
    pub fn matches(&self, rel_path: &str) -> bool {
        self.include.is_match(rel_path) && !self.exclude.is_match(rel_path)
    }

    /// Subset of `paths` that still exist under `root` and still match the
    /// patterns. Used to decide which indexed rows survive a rescan.
    pub fn existing_matching(&self, root: &Path, paths: &[String]) -> Vec<String> {
        paths
            .iter()
            .filter(|p| self.matches(p) && root.join(p).is_file())
            .cloned()
            .collect()
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') && name != "." && name != ".."
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("invalid glob pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("cannot compile glob patterns: {e}")))
}

fn mtime_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn scanner(include: &[&str], exclude: &[&str]) -> Scanner {
        Scanner::new(
            &include.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            &exclude.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    #[test]
    fn scan_finds_matching_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.md"), "alpha").unwrap();
        fs::write(tmp.path().join("b.txt"), "beta").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/c.md"), "gamma").unwrap();

        let files = scanner(&["**/*.md"], &[]).scan(tmp.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "sub/c.md"]);
    }

    #[test]
    fn exclude_patterns_win() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("drafts")).unwrap();
        fs::write(tmp.path().join("keep.md"), "x").unwrap();
        fs::write(tmp.path().join("drafts/skip.md"), "y").unwrap();

        let files = scanner(&["**/*.md"], &["drafts/**"]).scan(tmp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "keep.md");
    }

    #[test]
    fn hidden_files_and_dirs_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".hidden.md"), "x").unwrap();
        fs::create_dir(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join(".git/notes.md"), "y").unwrap();
        fs::write(tmp.path().join("visible.md"), "z").unwrap();

        let files = scanner(&["**/*.md"], &[]).scan(tmp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "visible.md");
    }

    #[test]
    fn reports_size_and_mtime() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f.md"), "12345").unwrap();
        let files = scanner(&["**/*.md"], &[]).scan(tmp.path()).unwrap();
        assert_eq!(files[0].size, 5);
        assert!(files[0].mtime_ms > 0);
    }

    #[test]
    fn existing_matching_filters_deleted_and_unmatched() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.md"), "x").unwrap();
        fs::write(tmp.path().join("b.rst"), "y").unwrap();

        let s = scanner(&["**/*.md"], &[]);
        let survivors = s.existing_matching(
            tmp.path(),
            &[
                "a.md".to_string(),
                "b.rst".to_string(),
                "gone.md".to_string(),
            ],
        );
        assert_eq!(survivors, vec!["a.md"]);
    }

    #[test]
    fn missing_root_is_a_config_error() {
        let err = scanner(&["**/*"], &[])
            .scan(Path::new("/nonexistent/semdex-test-root"))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
