//! Local file access confined to allow-listed directories.
//!
//! A path is accepted only if all three views of it stay inside an allowed
//! root: the lexically normalized literal path, every symlink met while
//! walking it, and the final canonical path. Checks run before any content is
//! read or served from cache.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use sieve_core::Error;

use super::{FetchMethod, FetchResult};

/// Confines local reads to a set of directory roots.
#[derive(Debug, Clone)]
pub struct PathGuard {
    roots: Vec<PathBuf>,
    max_file_size: u64,
}

impl PathGuard {
    /// Relative roots are anchored at the current working directory.
    pub fn new(allowed_directories: &[PathBuf], max_file_size: u64) -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        let roots = allowed_directories
            .iter()
            .map(|root| normalize(&cwd.join(root)))
            .collect();
        Self { roots, max_file_size }
    }

    /// Validate `path` and return its canonical form plus size.
    ///
    /// # Errors
    ///
    /// - `PathNotAllowed` when any view of the path leaves every root
    /// - `NotFound`, `NotAFile`, `FileTooLarge` for the file itself
    pub async fn check(&self, path: &Path) -> Result<(PathBuf, u64), Error> {
        let denied = || Error::PathNotAllowed(path.display().to_string());

        let lexical = normalize(path);
        let canonical_roots = self.canonical_roots().await;
        let lexical_ok = self.roots.iter().chain(canonical_roots.iter()).any(|r| lexical.starts_with(r));
        if !lexical_ok {
            tracing::warn!(path = %path.display(), "path outside allowed directories");
            return Err(denied());
        }

        self.check_symlinks(&lexical, &canonical_roots).await?;

        let canonical = match tokio::fs::canonicalize(path).await {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::NotFound(path.display().to_string())),
            Err(e) => return Err(Error::PathNotAllowed(format!("{}: {e}", path.display()))),
        };
        if !canonical_roots.iter().any(|r| canonical.starts_with(r)) {
            tracing::warn!(path = %path.display(), resolved = %canonical.display(), "path resolves outside allowed directories");
            return Err(denied());
        }

        let metadata = tokio::fs::metadata(&canonical)
            .await
            .map_err(|_| Error::NotFound(path.display().to_string()))?;
        if !metadata.is_file() {
            return Err(Error::NotAFile(path.display().to_string()));
        }
        if metadata.len() > self.max_file_size {
            return Err(Error::FileTooLarge { size: metadata.len(), limit: self.max_file_size });
        }

        Ok((canonical, metadata.len()))
    }

    async fn canonical_roots(&self) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            if let Ok(canonical) = tokio::fs::canonicalize(root).await {
                out.push(canonical);
            }
        }
        out
    }

    /// Every symlink at or below a root must point back inside a root.
    async fn check_symlinks(&self, lexical: &Path, canonical_roots: &[PathBuf]) -> Result<(), Error> {
        let mut prefix = PathBuf::new();
        for component in lexical.components() {
            prefix.push(component);
            let below_root = self.roots.iter().chain(canonical_roots.iter()).any(|r| prefix.starts_with(r));
            if !below_root {
                continue;
            }

            let Ok(meta) = tokio::fs::symlink_metadata(&prefix).await else {
                // Missing components surface as NotFound at canonicalization.
                return Ok(());
            };
            if !meta.file_type().is_symlink() {
                continue;
            }

            let target = tokio::fs::canonicalize(&prefix).await.ok();
            let inside = target
                .as_ref()
                .is_some_and(|t| canonical_roots.iter().any(|r| t.starts_with(r)));
            if !inside {
                tracing::warn!(link = %prefix.display(), "symlink escapes allowed directories");
                return Err(Error::PathNotAllowed(lexical.display().to_string()));
            }
        }
        Ok(())
    }
}

/// Read a local file after the guard approves it.
pub(crate) async fn read_file(guard: &PathGuard, path: &Path) -> Result<FetchResult, Error> {
    let started = Instant::now();
    let (canonical, size) = guard.check(path).await?;

    let content = tokio::fs::read(&canonical).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        _ => Error::NotAFile(format!("{}: {e}", path.display())),
    })?;

    let content_type = content_type_for(&canonical);
    let mut headers = BTreeMap::new();
    headers.insert("content-length".to_string(), size.to_string());
    headers.insert("content-type".to_string(), content_type.to_string());

    Ok(FetchResult {
        location: path.display().to_string(),
        content,
        content_type: Some(content_type.to_string()),
        headers,
        status_code: 200,
        fetch_method: FetchMethod::Filesystem,
        final_location: canonical.display().to_string(),
        fetch_ms: started.elapsed().as_millis() as u64,
    })
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Content type by file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" | "xhtml" => "text/html",
        "md" | "markdown" | "mdx" => "text/markdown",
        "txt" | "text" | "log" | "rst" => "text/plain",
        "json" => "application/json",
        "xml" => "application/xml",
        "csv" => "text/csv",
        "rs" => "text/x-rust",
        "py" => "text/x-python",
        "js" | "mjs" | "cjs" => "text/javascript",
        "ts" | "tsx" => "text/x-typescript",
        "go" => "text/x-go",
        "java" => "text/x-java",
        "c" | "h" => "text/x-c",
        "cpp" | "cc" | "hpp" => "text/x-c++",
        "rb" => "text/x-ruby",
        "sh" | "bash" => "text/x-shellscript",
        "toml" => "text/x-toml",
        "yaml" | "yml" => "text/x-yaml",
        "css" => "text/css",
        "sql" => "text/x-sql",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_resolves_parent_dirs() {
        assert_eq!(normalize(Path::new("/srv/docs/../../etc/passwd")), PathBuf::from("/etc/passwd"));
        assert_eq!(normalize(Path::new("/srv/./docs/a.md")), PathBuf::from("/srv/docs/a.md"));
    }

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(content_type_for(Path::new("a/README.MD")), "text/markdown");
        assert_eq!(content_type_for(Path::new("main.rs")), "text/x-rust");
        assert_eq!(content_type_for(Path::new("blob")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_inside_root_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "hello").unwrap();

        let guard = PathGuard::new(&[dir.path().to_path_buf()], 1024);
        let (canonical, size) = guard.check(&file).await.unwrap();
        assert_eq!(size, 5);
        assert!(canonical.ends_with("notes.txt"));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let guard = PathGuard::new(&[dir.path().to_path_buf()], 1024);
        let escape = dir.path().join("../../etc/passwd");
        assert!(matches!(guard.check(&escape).await, Err(Error::PathNotAllowed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let allowed = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path(), allowed.path().join("link")).unwrap();

        let guard = PathGuard::new(&[allowed.path().to_path_buf()], 1024);
        let via_link = allowed.path().join("link/secret.txt");
        assert!(matches!(guard.check(&via_link).await, Err(Error::PathNotAllowed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_inside_root_accepted() {
        let allowed = tempfile::tempdir().unwrap();
        std::fs::create_dir(allowed.path().join("real")).unwrap();
        std::fs::write(allowed.path().join("real/a.md"), "# A").unwrap();
        std::os::unix::fs::symlink(allowed.path().join("real"), allowed.path().join("alias")).unwrap();

        let guard = PathGuard::new(&[allowed.path().to_path_buf()], 1024);
        assert!(guard.check(&allowed.path().join("alias/a.md")).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_directory_and_oversized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.bin"), vec![0u8; 64]).unwrap();
        let guard = PathGuard::new(&[dir.path().to_path_buf()], 32);

        assert!(matches!(guard.check(&dir.path().join("nope.txt")).await, Err(Error::NotFound(_))));
        assert!(matches!(guard.check(dir.path()).await, Err(Error::NotAFile(_))));
        assert!(matches!(
            guard.check(&dir.path().join("big.bin")).await,
            Err(Error::FileTooLarge { size: 64, limit: 32 })
        ));
    }

    #[tokio::test]
    async fn test_read_file_sets_method_and_type() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.md");
        std::fs::write(&file, "# Title\n\nBody").unwrap();

        let guard = PathGuard::new(&[dir.path().to_path_buf()], 1024);
        let result = read_file(&guard, &file).await.unwrap();
        assert_eq!(result.fetch_method, FetchMethod::Filesystem);
        assert_eq!(result.content_type.as_deref(), Some("text/markdown"));
        assert_eq!(result.content, b"# Title\n\nBody");
    }
}
