//! Frame — the envelope for every whiteboard event on the wire.
//!
//! ARCHITECTURE
//! ============
//! Clients and server exchange JSON text frames over one WebSocket. The
//! server routes on the `event` name (`whiteboard:join`, `whiteboard:stroke`,
//! ...) and treats `data` as a flat payload owned by the event.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`.
//! - Server replies to a request (`init`, `error`) carry `parent_id`.
//! - Relayed frames are fresh frames; peers never see the sender's frame id.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// EVENT NAMES
// =============================================================================

pub const EVENT_CONNECTED: &str = "session:connected";
pub const EVENT_JOIN: &str = "whiteboard:join";
pub const EVENT_INIT: &str = "whiteboard:init";
pub const EVENT_ERROR: &str = "whiteboard:error";
pub const EVENT_UPDATE: &str = "whiteboard:update";
pub const EVENT_STROKE: &str = "whiteboard:stroke";
pub const EVENT_SNAPSHOT: &str = "whiteboard:snapshot";
pub const EVENT_CLEAR: &str = "whiteboard:clear";

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key carrying a whiteboard id when the envelope field is absent.
pub const FRAME_WHITEBOARD_ID: &str = "whiteboardId";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// The universal message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    #[serde(default)]
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whiteboard_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub event: String,
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create a server-originated event frame.
    pub fn event(event: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            whiteboard_id: None,
            from: None,
            event: event.into(),
            data,
        }
    }

    /// Reply to this frame with a different event. Inherits `whiteboard_id`.
    #[must_use]
    pub fn reply(&self, event: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            whiteboard_id: self.whiteboard_id,
            from: None,
            event: event.into(),
            data,
        }
    }

    /// Create a structured `whiteboard:error` reply from a typed error.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_CODE.into(), serde_json::Value::String(err.error_code().to_string()));
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(err.to_string()));
        self.reply(EVENT_ERROR, data)
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_whiteboard_id(mut self, whiteboard_id: Uuid) -> Self {
        self.whiteboard_id = Some(whiteboard_id);
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Frame {
    /// Whiteboard addressed by this frame: envelope field first, then
    /// `data.whiteboardId` as a string.
    #[must_use]
    pub fn target_whiteboard(&self) -> Option<Uuid> {
        self.whiteboard_id.or_else(|| {
            self.data
                .get(FRAME_WHITEBOARD_ID)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
        })
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
