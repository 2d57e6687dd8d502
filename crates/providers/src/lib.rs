//! LLM provider adapters (OpenAI-compatible, Anthropic, Google Gemini),
//! the model-alias registry, and shared SSE streaming plumbing.

pub mod anthropic;
pub mod google;
pub mod mock;
pub mod openai_compat;
pub mod registry;
mod sse;
mod traits;
mod util;

pub use registry::ProviderRegistry;
pub use traits::{ChatRequest, ChatResponse, LlmProvider};
