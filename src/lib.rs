//! # a3s-relay
//!
//! Transcodes the event stream of a code-execution agent into an
//! OpenAI-compatible chat-completion stream and into a live, syntax-highlighted
//! transcript.
//!
//! ## Overview
//!
//! An agent emits a flat, fragmentable sequence of typed events: prose,
//! source code, execution output, confirmation prompts and "currently
//! executing line" markers. `a3s-relay` turns that sequence into well-formed
//! blocks once and feeds the result to every output framing, so streamed and
//! aggregated responses always carry the same text.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_relay::encoder::aggregate::aggregate_all;
//! use a3s_relay::Event;
//!
//! let aggregate = aggregate_all(
//!     vec![
//!         Event::message("Hello "),
//!         Event::message("world"),
//!         Event::code_start("sh"),
//!         Event::code("ls -la"),
//!         Event::code_end(),
//!     ],
//!     "text",
//!     None,
//! );
//! assert_eq!(aggregate.content, "Hello world\n```sh\nls -la\n```\n");
//! ```
//!
//! ## Architecture
//!
//! - **BlockTracker**: turns events into `Opened`/`Appended`/`Closed` block
//!   transitions, force-closing anything left open
//! - **SseEncoder / AggregateEncoder**: text framings of the transitions
//! - **TranscriptRenderer**: node-by-id document for interactive clients
//! - **AgentHandle**: exclusive, cancellable access to a stateful agent
//! - **Isolator**: runs one instruction against an empty history and
//!   restores the original afterwards

pub mod agent;
pub mod api;
pub mod cli;
pub mod config;
pub mod dirs;
pub mod encoder;
pub mod error;
pub mod event;
pub mod server;
pub mod tracker;
pub mod transcript;

// Re-export core types
pub use agent::{Agent, AgentHandle, EventSink, EventStream, HistoryEntry, Isolator};
pub use config::RelayConfig;
pub use encoder::FinishReason;
pub use error::{RelayError, Result};
pub use event::{Event, EventKind, Phase, Role};
pub use tracker::{BlockKind, BlockTracker, BlockTransition};
pub use transcript::{DocumentUpdate, TranscriptRenderer};
