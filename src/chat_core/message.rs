use serde::{Deserialize, Serialize};

/// Frame prefix for user chat messages
pub const MSG_PREFIX: &str = "MSG ";

/// Decoded `MSG` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub features: Vec<String>,
    /// Server timestamp, unix millis
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub data: String,
}

impl ChatMessage {
    /// Whitespace-separated tokens of the message body
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.data.split_whitespace()
    }
}

#[derive(Debug)]
pub enum FrameError {
    Decode(serde_json::Error),
}

impl From<serde_json::Error> for FrameError {
    fn from(err: serde_json::Error) -> Self {
        FrameError::Decode(err)
    }
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Decode(e) => write!(f, "Malformed MSG payload: {}", e),
        }
    }
}

impl std::error::Error for FrameError {}

/// Parse a text frame
///
/// Returns `Ok(None)` for frames that are not chat messages (`NAMES`, `JOIN`,
/// `QUIT`, `PING`, ...).
pub fn parse_frame(frame: &str) -> Result<Option<ChatMessage>, FrameError> {
    let Some(payload) = frame.strip_prefix(MSG_PREFIX) else {
        return Ok(None);
    };

    let message: ChatMessage = serde_json::from_str(payload)?;
    Ok(Some(message))
}
