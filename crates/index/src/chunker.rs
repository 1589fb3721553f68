//! Deterministic overlapping character-range chunker.
//!
//! Walks a cursor across a parsed text segment in fixed strides, emitting
//! windows that overlap by a configured amount. Unlike the line/semantic
//! chunkers this workspace also carries as reference, this one never looks at
//! syntax: the same `(text, config)` pair always yields the same spans and
//! hashes, which the processor's diffing depends on.

use knowdisk_core::model::chunk_hash;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
  pub size_chars: usize,
  pub overlap_chars: usize,
  pub chars_per_token: usize,
}

impl Default for ChunkerConfig {
  fn default() -> Self {
    Self {
      size_chars: 1_500,
      overlap_chars: 200,
      chars_per_token: 4,
    }
  }
}

impl ChunkerConfig {
  pub fn new(size_chars: usize, overlap_chars: usize, chars_per_token: usize) -> Self {
    assert!(size_chars > 0, "size_chars must be positive");
    assert!(overlap_chars < size_chars, "overlap_chars must be < size_chars");
    assert!(chars_per_token > 0, "chars_per_token must be positive");
    Self { size_chars, overlap_chars, chars_per_token }
  }
}

/// A single overlapping window of a parsed segment, offsets relative to the
/// whole file (the segment's `base_offset` already folded in).
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
  pub text: String,
  pub start_offset: i64,
  pub end_offset: i64,
  pub token_count: i64,
  pub chunk_hash: String,
}

pub struct Chunker {
  config: ChunkerConfig,
}

impl Default for Chunker {
  fn default() -> Self {
    Self::new(ChunkerConfig::default())
  }
}

impl Chunker {
  pub fn new(config: ChunkerConfig) -> Self {
    Self { config }
  }

  /// Chunk one parsed segment. `base_offset` is the segment's start offset
  /// within the source file; emitted spans are absolute.
  pub fn chunk(&self, text: &str, base_offset: i64) -> Vec<ChunkSpan> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len == 0 {
      return Vec::new();
    }

    let stride = self.config.size_chars - self.config.overlap_chars;
    let mut spans = Vec::new();
    let mut cursor = 0usize;

    loop {
      let end = (cursor + self.config.size_chars).min(len);
      let slice: String = chars[cursor..end].iter().collect();
      let trimmed = slice.trim();

      if !trimmed.is_empty() {
        let token_count = (trimmed.len().div_ceil(self.config.chars_per_token)).max(1) as i64;
        spans.push(ChunkSpan {
          chunk_hash: chunk_hash(&slice),
          text: slice,
          start_offset: base_offset + cursor as i64,
          end_offset: base_offset + end as i64,
          token_count,
        });
      }

      if end >= len {
        break;
      }
      cursor += stride;
    }

    spans
  }
}
