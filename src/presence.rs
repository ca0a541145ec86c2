//! Per-session presence: cursor position, active selection, last-seen.
//!
//! Narrower than the teacher's `enterprise/realtime/presence.rs`
//! (`UserPresence`/`PresenceManager`, with editing status, idle/activity
//! timeouts and a separate heartbeat manager) — the spec only asks for
//! an opaque cursor point, the selected element ids, and a last-seen
//! stamp, server-side only and never persisted. The deterministic
//! per-user display colour is carried over unchanged from
//! `UserInfo::generate_color`.

use crate::model::{ElementId, UserId};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Transient, never-persisted per-user collaboration state inside a Room.
#[derive(Debug, Clone)]
pub struct Presence {
    pub user_id: UserId,
    pub display_name: String,
    pub color: String,
    /// Opaque `{x, y}`-shaped point; `None` until the first `cursor_move`.
    pub cursor: Option<Value>,
    pub selected_element_ids: Vec<ElementId>,
    pub last_seen: DateTime<Utc>,
}

impl Presence {
    pub fn new(user_id: UserId, display_name: String) -> Self {
        Self {
            color: generate_color(user_id),
            user_id,
            display_name,
            cursor: None,
            selected_element_ids: Vec::new(),
            last_seen: Utc::now(),
        }
    }

    pub fn update_cursor(&mut self, cursor: Value) {
        self.cursor = Some(cursor);
        self.last_seen = Utc::now();
    }

    pub fn update_selection(&mut self, selected_element_ids: Vec<ElementId>) {
        self.selected_element_ids = selected_element_ids;
        self.last_seen = Utc::now();
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

/// Deterministic per-user colour derived from the first three id bytes.
fn generate_color(id: UserId) -> String {
    let bytes = id.as_bytes();
    format!("#{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2])
}
