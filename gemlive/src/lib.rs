//! # gemlive
//!
//! Real-time bidirectional multimodal streaming client for the Gemini Live API.
//!
//! The crate opens one persistent duplex connection per session, sends the
//! setup frame, multiplexes outgoing audio, video and text, and turns inbound
//! frames into typed events: audio chunks, text chunks, tool calls,
//! interruptions and turn completion.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────┐   events    ┌──────────────┐
//!   │  Supervisor  │◄────────────┤ LiveSession  │──► SessionEvent subscribers
//!   │ (reconnect)  │──connect───►│ (state mach.)│
//!   └──────────────┘             └──────┬───────┘
//!                                       │ encode / decode
//!                                ┌──────▼───────┐
//!                                │    codec     │
//!                                └──────┬───────┘
//!                                ┌──────▼───────┐
//!                                │  Transport   │  WsTransport | MemoryTransport
//!                                └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use gemlive::{LiveSession, SessionConfig, SessionEvent, WsTransport};
//! use std::sync::Arc;
//!
//! let session = LiveSession::new(Arc::new(WsTransport::new()));
//! let mut events = session.subscribe();
//! session.connect(SessionConfig::new(api_key).with_voice("Puck")).await?;
//! session.send_text("Hello!")?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::Text(chunk) => print!("{chunk}"),
//!         SessionEvent::TurnComplete(_) => println!(),
//!         SessionEvent::Close(_) => break,
//!         _ => {}
//!     }
//! }
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod reconnect;
pub mod session;
pub mod tools;
pub mod transport;

// Re-exports
pub use audio::{AudioChunk, AudioFormat, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use config::{
    DEFAULT_MODEL, GEMINI_LIVE_URL, GEMINI_VOICES, SessionConfig, SessionConfigBuilder,
};
pub use error::{RealtimeError, Result};
pub use frame::{
    Blob, FunctionCall, FunctionResponse, IncomingFrame, MediaChunk, Modality, OutgoingFrame, Part,
    ToolDefinition,
};
pub use reconnect::{
    CloseCategory, ContextProvider, ReconnectPolicy, RecentTurns, Supervisor, SupervisorEvent,
};
pub use session::{CloseEvent, LiveSession, SessionEvent, SessionState, TurnSummary};
pub use tools::{ToolHandler, ToolRegistry, serve_tool_calls};
pub use transport::{MemoryTransport, Transport, WsTransport};
