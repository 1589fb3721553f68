use crate::parser::ParserRegistry;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Walk error: {0}")]
  Walk(#[from] ignore::Error),
}

/// Result of scanning a single file
#[derive(Debug, Clone)]
pub struct ScannedFile {
  pub path: PathBuf,
  pub relative_path: String,
  pub size: u64,
  pub mtime_ms: i64,
}

/// Result of scanning a directory
#[derive(Debug)]
pub struct ScanResult {
  pub files: Vec<ScannedFile>,
  pub skipped_count: u32,
  pub total_bytes: u64,
  pub scan_duration: Duration,
}

/// Progress callback data
#[derive(Debug, Clone)]
pub struct ScanProgress {
  pub scanned: u32,
  pub path: PathBuf,
}

/// Gitignore-aware, parser-capability-filtered directory walker feeding the
/// reconcile step of a full rebuild.
pub struct Scanner {
  max_file_size: u64,
  follow_links: bool,
}

impl Default for Scanner {
  fn default() -> Self {
    Self::new()
  }
}

impl Scanner {
  pub fn new() -> Self {
    Self { max_file_size: 10 * 1024 * 1024, follow_links: false }
  }

  pub fn with_max_file_size(mut self, size: u64) -> Self {
    self.max_file_size = size;
    self
  }

  /// Scan directory in parallel, respecting `.gitignore` and the supplied
  /// parser registry's notion of indexability.
  pub fn scan<F>(&self, root: &Path, parsers: &ParserRegistry, progress: F) -> ScanResult
  where
    F: Fn(ScanProgress) + Send + Sync,
  {
    let start = Instant::now();
    let scanned = AtomicU32::new(0);
    let skipped = AtomicU32::new(0);
    let total_bytes = AtomicU64::new(0);

    let walker = WalkBuilder::new(root)
      .follow_links(self.follow_links)
      .hidden(true)
      .git_ignore(true)
      .git_global(true)
      .git_exclude(true)
      .add_custom_ignore_filename(".knowdiskignore")
      .build();

    // par_bridge parallelizes without collecting first, which matters once a
    // source directory has tens of thousands of files.
    let files: Vec<ScannedFile> = walker
      .filter_map(|e| e.ok())
      .par_bridge()
      .filter_map(|entry| {
        let path = entry.path();

        if entry.file_type().is_none_or(|ft| ft.is_dir()) {
          return None;
        }

        let count = scanned.fetch_add(1, Ordering::Relaxed);
        if count.is_multiple_of(100) {
          progress(ScanProgress { scanned: count, path: path.to_path_buf() });
        }

        if !parsers.is_supported(path) {
          return None;
        }

        let metadata = entry.metadata().ok()?;
        if metadata.len() == 0 {
          skipped.fetch_add(1, Ordering::Relaxed);
          return None;
        }
        if metadata.len() > self.max_file_size {
          skipped.fetch_add(1, Ordering::Relaxed);
          return None;
        }

        let mtime_ms = metadata.modified().ok()?.duration_since(UNIX_EPOCH).ok()?.as_millis() as i64;
        total_bytes.fetch_add(metadata.len(), Ordering::Relaxed);

        Some(ScannedFile {
          path: path.to_path_buf(),
          relative_path: path.strip_prefix(root).ok()?.to_string_lossy().into(),
          size: metadata.len(),
          mtime_ms,
        })
      })
      .collect();

    ScanResult {
      files,
      skipped_count: skipped.load(Ordering::Relaxed),
      total_bytes: total_bytes.load(Ordering::Relaxed),
      scan_duration: start.elapsed(),
    }
  }

  /// Stat and classify a single path, outside of a full walk.
  pub fn scan_file(&self, path: &Path, root: &Path, parsers: &ParserRegistry) -> Option<ScannedFile> {
    if !parsers.is_supported(path) {
      return None;
    }

    let metadata = path.metadata().ok()?;
    if metadata.len() == 0 || metadata.len() > self.max_file_size {
      return None;
    }

    let mtime_ms = metadata.modified().ok()?.duration_since(UNIX_EPOCH).ok()?.as_millis() as i64;

    Some(ScannedFile {
      path: path.to_path_buf(),
      relative_path: path.strip_prefix(root).ok()?.to_string_lossy().into(),
      size: metadata.len(),
      mtime_ms,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scan_finds_only_parser_supported_files() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
    std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

    let scanner = Scanner::new();
    let parsers = ParserRegistry::with_defaults();
    let result = scanner.scan(dir.path(), &parsers, |_| {});

    assert_eq!(result.files.len(), 1);
    assert!(result.files[0].relative_path.contains("main.rs"));
  }

  #[test]
  fn scan_respects_gitignore() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join(".git")).unwrap();
    std::fs::write(dir.path().join(".gitignore"), "ignored/\n*.log").unwrap();
    std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
    std::fs::create_dir(dir.path().join("ignored")).unwrap();
    std::fs::write(dir.path().join("ignored/hidden.rs"), "fn hidden() {}").unwrap();

    let scanner = Scanner::new();
    let parsers = ParserRegistry::with_defaults();
    let result = scanner.scan(dir.path(), &parsers, |_| {});

    assert_eq!(result.files.len(), 1);
    assert!(result.files[0].relative_path.contains("main.rs"));
  }

  #[test]
  fn scan_skips_large_files() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("small.rs"), "fn small() {}").unwrap();
    std::fs::write(dir.path().join("large.rs"), "x".repeat(2 * 1024 * 1024)).unwrap();

    let scanner = Scanner::new().with_max_file_size(1024 * 1024);
    let parsers = ParserRegistry::with_defaults();
    let result = scanner.scan(dir.path(), &parsers, |_| {});

    assert_eq!(result.files.len(), 1);
    assert!(result.files[0].relative_path.contains("small.rs"));
    assert_eq!(result.skipped_count, 1);
  }

  #[test]
  fn scan_skips_empty_files() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("normal.rs"), "fn normal() {}").unwrap();
    std::fs::write(dir.path().join("empty.rs"), "").unwrap();

    let scanner = Scanner::new();
    let parsers = ParserRegistry::with_defaults();
    let result = scanner.scan(dir.path(), &parsers, |_| {});

    assert_eq!(result.files.len(), 1);
    assert!(result.files[0].relative_path.contains("normal.rs"));
    assert_eq!(result.skipped_count, 1);
  }
}
