//! API translation between Anthropic and `OpenAI` formats.
//!
//! The core of the gateway: converts requests, complete responses, and streamed
//! chunks between the two API formats. Nothing in here performs I/O.

pub mod anthropic_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
