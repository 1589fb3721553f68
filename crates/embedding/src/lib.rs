pub mod adapter;
pub mod ollama;
pub mod provider;
pub mod resilient;

pub use adapter::CapabilityEmbedder;
pub use ollama::{OllamaHealthStatus, OllamaProvider};
pub use provider::{EmbeddingError, EmbeddingProvider};
pub use resilient::{ResilientProvider, RetryConfig, is_retryable_error, wrap_resilient, wrap_resilient_arc};
