//! Disk-backed [`SourceReader`]. Used by the retrieval pipeline to hydrate a
//! stored preview back into the full chunk text when both offsets survive.

use knowdisk_core::capability::SourceReader;

#[derive(Debug, Default, Clone, Copy)]
pub struct FsSourceReader;

impl SourceReader for FsSourceReader {
  fn read_range(&self, path: &str, start: i64, end: i64) -> Option<String> {
    if start < 0 || end < start {
      return None;
    }
    let text = std::fs::read_to_string(path).ok()?;
    let (start, end) = (start as usize, end as usize);
    Some(text.chars().skip(start).take(end.saturating_sub(start)).collect())
  }
}
