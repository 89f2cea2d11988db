//! Chat relay module.
//!
//! This module provides the browser-facing HTTP API that accepts chat
//! transcripts and forwards them to the selected upstream provider.

mod handlers;
pub mod provider;
pub mod redact;
pub mod retry;
mod server;
pub mod service;
pub mod transport;
pub mod types;

pub use retry::{AttemptRecord, RetryPolicy};
pub use server::{build_relay, create_router, run_server, AppState};
pub use service::{Endpoints, Relay, Relayed};
pub use transport::{HttpTransport, Transport, TransportError, UpstreamReply, UpstreamRequest};
pub use types::{ChatMessage, Credential, ModelSelector, RelayRequest, RelayResponse, Role};
