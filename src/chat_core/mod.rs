//! Chat-side collaborators: frame codec, emote catalog, WebSocket transport

pub mod catalog;
pub mod message;
pub mod ws_client;

pub use catalog::{fetch_catalog, Catalog, CatalogError, EmoteDescriptor};
pub use message::{parse_frame, ChatMessage};
pub use ws_client::{connect, pump_frames, KeepaliveWriter, TransportError};
