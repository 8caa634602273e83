//! Parley: a conversation turn engine.
//!
//! Drives request/response cycles against a pluggable model-execution
//! runtime, normalizes heterogeneous provider stream events into one
//! [`ConversationEvent`](types::ConversationEvent) protocol, pauses for
//! human tool approvals (including abort-and-resume), retries when the
//! model asks for a tool that does not exist, and builds chat-completions
//! payloads for providers without server-side threading.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use parley::prelude::*;
//!
//! # async fn example() -> parley::error::Result<()> {
//! let config = ParleyConfig::load()?;
//! let runtime = Arc::new(ChatCompletionsRuntime::new(config.chat_client()));
//! let mut session = ConversationSession::new(runtime, config.session_config());
//! let response = session.send_message("Hello!", None).await?;
//! println!("{}", response.text);
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod commands;
pub mod config;
pub mod error;
pub mod prelude;
pub mod provider;
pub mod runtime;
pub mod session;
pub mod stream;
pub mod tools;
pub mod types;
pub mod util;
