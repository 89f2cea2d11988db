//! chatrelay - Chat relay for DeepSeek, OpenAI and Anthropic
//!
//! This library provides the core functionality for the chatrelay server:
//! configuration, the provider wire formats, and the retrying relay.

pub mod config;
pub mod error;
pub mod relay;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
