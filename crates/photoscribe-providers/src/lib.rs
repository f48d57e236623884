//! Vision provider abstraction: one capability trait, typed failure
//! taxonomy, and concrete backends (OpenAI-compatible, Anthropic, Ollama).
//!
//! Providers never retry and never raise for predictable failure modes;
//! classification is returned as data so the engine can apply one uniform
//! backoff policy across heterogeneous backends.

mod anthropic;
mod ollama;
mod openai;
mod registry;
mod types;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use registry::ProviderRegistry;
pub use types::{
    DescribeFailure, DescribeRequest, DescribeResult, FailureKind, VisionProvider,
};
