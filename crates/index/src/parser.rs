//! Extension-indexed resolution of the [`knowdisk_core::capability::Parser`]
//! capability. Dispatch on file extension is an explicit lookup table, never
//! content sniffing: a path with no registered extension resolves to
//! [`ParserResolution::Unsupported`] and the caller completes its job as a
//! no-op, per the processor's contract.

use async_trait::async_trait;
use knowdisk_core::capability::{ParsedSegment, Parser, ParserResolution};
use knowdisk_core::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Parses a whole file as a single UTF-8 text segment. Most text-like source
/// formats (code, markdown, config) need nothing more sophisticated: the
/// chunker is what imposes structure downstream.
#[derive(Debug, Default)]
pub struct PlainTextParser;

#[async_trait]
impl Parser for PlainTextParser {
  async fn parse_stream(&self, bytes: &[u8]) -> Result<Vec<ParsedSegment>> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::Parse(e.to_string()))?;
    if text.trim().is_empty() {
      return Ok(Vec::new());
    }
    let len = text.chars().count() as i64;
    Ok(vec![ParsedSegment {
      text: text.to_string(),
      start_offset: 0,
      end_offset: len,
      token_estimate: (len / 4).max(1),
      skipped: None,
    }])
  }
}

/// Extensions this workspace ships a parser for out of the box. Kept as a
/// flat list (rather than a language enum) because every one of them maps to
/// the same [`PlainTextParser`] — structure comes from the chunker, not from
/// per-language parsing, so there is nothing to differentiate on here.
pub const DEFAULT_TEXT_EXTENSIONS: &[&str] = &[
  "rs", "py", "ts", "tsx", "js", "jsx", "mjs", "cjs", "go", "java", "c", "cpp", "cc", "h", "hpp", "cs", "rb", "php",
  "swift", "kt", "scala", "r", "jl", "lua", "pl", "sh", "bash", "zsh", "fish", "ps1", "sql", "graphql", "proto",
  "toml", "yaml", "yml", "json", "xml", "html", "css", "scss", "sass", "less", "vue", "svelte", "astro", "md", "mdx",
  "rst", "txt", "tex", "zig", "nim", "elm", "clj", "cljs", "ex", "exs", "erl", "hrl", "hs", "ml", "mli", "fs", "fsi",
];

/// Extension -> `Parser` lookup table. Holds `Arc<dyn Parser>` rather than a
/// boxed trait object so the same parser instance can be shared across
/// extensions (every default extension currently shares one `PlainTextParser`).
pub struct ParserRegistry {
  parsers: HashMap<String, Arc<dyn Parser>>,
}

impl ParserRegistry {
  pub fn new() -> Self {
    Self { parsers: HashMap::new() }
  }

  /// A registry pre-populated with [`PlainTextParser`] for every extension in
  /// [`DEFAULT_TEXT_EXTENSIONS`].
  pub fn with_defaults() -> Self {
    let mut registry = Self::new();
    let plain: Arc<dyn Parser> = Arc::new(PlainTextParser);
    for ext in DEFAULT_TEXT_EXTENSIONS {
      registry.parsers.insert((*ext).to_string(), plain.clone());
    }
    registry
  }

  pub fn register(&mut self, extension: impl Into<String>, parser: Arc<dyn Parser>) {
    self.parsers.insert(extension.into(), parser);
  }

  pub fn is_supported(&self, path: &Path) -> bool {
    self.extension_of(path).is_some_and(|ext| self.parsers.contains_key(&ext))
  }

  pub fn resolve(&self, path: &Path) -> ParserResolution<'_> {
    match self.extension_of(path).and_then(|ext| self.parsers.get(&ext)) {
      Some(parser) => ParserResolution::Supported(parser.as_ref()),
      None => ParserResolution::Unsupported,
    }
  }

  fn extension_of(&self, path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase())
  }
}

impl Default for ParserRegistry {
  fn default() -> Self {
    Self::with_defaults()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn plain_text_parser_returns_one_segment() {
    let parser = PlainTextParser;
    let segments = parser.parse_stream(b"hello world").await.unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].start_offset, 0);
    assert_eq!(segments[0].end_offset, 11);
  }

  #[tokio::test]
  async fn plain_text_parser_skips_blank_content() {
    let parser = PlainTextParser;
    let segments = parser.parse_stream(b"   \n\t  ").await.unwrap();
    assert!(segments.is_empty());
  }

  #[tokio::test]
  async fn non_utf8_bytes_are_a_parse_error() {
    let parser = PlainTextParser;
    let err = parser.parse_stream(&[0xff, 0xfe, 0x00]).await.unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
  }

  #[test]
  fn registry_resolves_known_extension() {
    let registry = ParserRegistry::with_defaults();
    assert!(matches!(registry.resolve(Path::new("main.rs")), ParserResolution::Supported(_)));
  }

  #[test]
  fn registry_reports_unsupported_for_unknown_extension() {
    let registry = ParserRegistry::with_defaults();
    assert!(matches!(registry.resolve(Path::new("image.png")), ParserResolution::Unsupported));
    assert!(!registry.is_supported(Path::new("image.png")));
  }

  #[test]
  fn registry_extension_match_is_case_insensitive() {
    let registry = ParserRegistry::with_defaults();
    assert!(registry.is_supported(Path::new("README.MD")));
  }

  #[test]
  fn custom_parser_can_be_registered() {
    let mut registry = ParserRegistry::new();
    registry.register("custom", Arc::new(PlainTextParser));
    assert!(registry.is_supported(Path::new("file.custom")));
  }
}
