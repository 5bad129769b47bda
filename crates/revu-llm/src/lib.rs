//! Embedding and text-generation provider abstractions.
//!
//! The retrieval pipeline treats both services as opaque: text goes in, a
//! vector (or generated text) comes out. Batch embedding tolerates partial
//! failure and reports it per item.

pub mod error;
pub mod hashing;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod provider;

pub use error::{LlmError, Result};
pub use hashing::HashingEmbedder;
pub use provider::{EmbedBatch, EmbedInput, EmbedOutput, EmbeddingProvider, LlmProvider};
