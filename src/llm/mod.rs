//! Reasoning capability (LLM) module
//!
//! Judges strategic alignment, summarizes conversations and extracts tasks.
//!
//! Architecture follows the project pattern (trait + impl + mock):
//! - `ReasoningProvider` trait: async interface to the reasoning capability
//! - `HttpReasoningProvider`: any OpenAI-compatible chat completions API
//! - `MockReasoningProvider`: scripted provider for tests
//! - `LlmError`: distinguishable failure kinds (quota exhaustion above all)

pub mod error;
pub mod http;
pub mod mock;
pub mod models;
pub mod traits;

pub use error::{classify_llm_error, is_quota_exhausted, LlmError};
pub use http::HttpReasoningProvider;
pub use mock::{InjectedFailure, MockReasoningProvider};
pub use models::{AlignmentVerdict, ExtractedTask, LlmPricing, ThreadSummary};
pub use traits::ReasoningProvider;
