//! Bridges this crate's concrete [`EmbeddingProvider`] trait to the core's
//! narrower [`knowdisk_core::capability::Embedder`] capability. Kept as its
//! own adapter so the core never depends on `knowdisk-embedding` directly
//! (per the capability-injection boundary): only the daemon's composition
//! root imports this module.

use std::sync::Arc;

use async_trait::async_trait;
use knowdisk_core::capability::Embedder;
use knowdisk_core::error::{Error, Result};

use crate::EmbeddingProvider;

/// Wraps an `Arc<dyn EmbeddingProvider>` as a `knowdisk_core::Embedder`.
pub struct CapabilityEmbedder {
  inner: Arc<dyn EmbeddingProvider>,
}

impl CapabilityEmbedder {
  pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Self {
    Self { inner }
  }
}

#[async_trait]
impl Embedder for CapabilityEmbedder {
  async fn embed(&self, text: &str) -> Result<Vec<f32>> {
    self.inner.embed(text).await.map_err(|e| Error::Embed(e.to_string()))
  }

  fn dimensions(&self) -> Option<usize> {
    Some(self.inner.dimensions())
  }
}
