//! Gateway wire protocol. The first frame identifies the participant and
//! room; everything after is commands in, deltas out.

use serde::{Deserialize, Serialize};

use swatch_sync::event_log::SequencedEvent;
use swatch_sync::protocol::{Command, ParticipantProfile, RoomDelta, RoomSnapshot};

/// First message a client sends to identify itself and pick a room.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientHello {
    Join {
        room_id: String,
        participant: ParticipantProfile,
    },
}

/// Frames a connected client may send after the hello.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A room command, applied in the room's total order.
    Command { command: Command },
    /// Convenience: a pasted link, classified server-side before loading.
    LoadUrl { participant_id: String, url: String },
    /// Reconnect catch-up: events strictly after `after_seq`.
    CatchUp { after_seq: u64 },
}

/// Frames the gateway sends back.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Initial state right after a successful join.
    Welcome {
        snapshot: RoomSnapshot,
        events: Vec<SequencedEvent>,
    },
    Delta {
        delta: RoomDelta,
    },
    Events {
        events: Vec<SequencedEvent>,
    },
    /// Private to this connection; never broadcast.
    Error {
        message: String,
    },
}
