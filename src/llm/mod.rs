//! LLM provider integration
//!
//! The raw client turns a prompt into text; everything structural lives in
//! [`structured`], which all LLM-consuming stages (planner, generator,
//! summariser) share: JSON extraction, field-name normalisation, schema
//! validation and bounded retries.

pub mod client;
pub mod mock;
pub mod structured;
pub mod traits;

pub use client::HttpLlmClient;
pub use mock::MockLlmClient;
pub use structured::{call_structured, normalise_fields, StructuredCall, DEFAULT_ATTEMPTS};
pub use traits::{LlmClient, LlmRequest};
