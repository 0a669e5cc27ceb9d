//! Emote burst detection for live chat
//!
//! - `chat_core` - chat frame codec, emote catalog, WebSocket transport
//! - `pipeline` - rolling windows, burst extraction, batch persistence, runtime

pub mod chat_core;
pub mod pipeline;
