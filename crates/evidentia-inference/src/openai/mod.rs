//! OpenAI-compatible inference backend.
//!
//! Works with any endpoint that speaks `/chat/completions` with
//! `response_format: {"type": "json_object"}` (OpenAI, Azure OpenAI, vLLM,
//! LM Studio, Ollama in compatibility mode).
//!
//! # Example
//!
//! ```rust,no_run
//! use evidentia_inference::openai::{OpenAIBackend, OpenAIConfig};
//!
//! // Fails with a configuration error when OPENAI_API_KEY is missing.
//! let backend = OpenAIBackend::from_env();
//!
//! let mut config = OpenAIConfig::new("sk-local");
//! config.base_url = "http://localhost:11434/v1".to_string();
//! let backend = OpenAIBackend::new(config).unwrap();
//! ```

mod backend;
mod error;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig, DEFAULT_GEN_MODEL, DEFAULT_OPENAI_URL};
pub use error::{to_core_error, OpenAIErrorCode};
pub use types::*;
