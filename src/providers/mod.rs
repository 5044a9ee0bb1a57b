//! Bundled [`LlmProvider`](crate::LlmProvider) implementations.

pub mod openai;

pub use openai::OpenAiProvider;
