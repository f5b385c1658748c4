//! Command and delta vocabulary for the room synchronization protocol.
//!
//! These types are the contract with the transport layer: commands come in
//! from participants, deltas fan back out. The envelope carrying them over
//! a particular transport lives with that transport.

use serde::{Deserialize, Serialize};

use crate::clock::PlaybackClock;
use crate::content::ContentSelection;
use crate::event_log::Event;
use crate::presence::OnlineState;

/// Descriptor a participant arrives with. Identity is established outside
/// the engine; both fields are opaque here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub id: String,
    pub display_name: String,
}

/// Roster entry as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub display_name: String,
    pub is_host: bool,
    pub join_seq: u64,
    pub online: OnlineState,
}

/// Everything a participant can ask a room to do. Commands are applied
/// atomically and in total order per room; errors go back to the issuer
/// only and leave the room untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    Join {
        participant: ParticipantProfile,
    },
    Leave {
        participant_id: String,
    },
    LoadContent {
        participant_id: String,
        selection: ContentSelection,
    },
    SetPlaying {
        participant_id: String,
        playing: bool,
    },
    SeekTo {
        participant_id: String,
        seconds: f64,
    },
    PostChat {
        author_id: String,
        text: String,
    },
    Heartbeat {
        participant_id: String,
    },
    /// Host's client echoing what its player observes. Reports carrying a
    /// revision other than the current one are stale and dropped.
    ReportPlayback {
        participant_id: String,
        revision: u64,
        position_seconds: f64,
        duration_seconds: Option<f64>,
    },
    /// A participant's reconciler gave up after retrying; the room records
    /// it so everyone can see who fell out of sync.
    ReportSyncLost {
        participant_id: String,
    },
}

impl Command {
    /// The participant a command speaks for. Transports use this to pin
    /// frames to the connection's established identity.
    pub fn issuer(&self) -> &str {
        match self {
            Command::Join { participant } => &participant.id,
            Command::Leave { participant_id }
            | Command::LoadContent { participant_id, .. }
            | Command::SetPlaying { participant_id, .. }
            | Command::SeekTo { participant_id, .. }
            | Command::Heartbeat { participant_id }
            | Command::ReportPlayback { participant_id, .. }
            | Command::ReportSyncLost { participant_id } => participant_id,
            Command::PostChat { author_id, .. } => author_id,
        }
    }
}

/// State changes fanned out to every participant of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoomDelta {
    SelectionChanged {
        selection: Option<ContentSelection>,
        clock: PlaybackClock,
    },
    ClockChanged {
        clock: PlaybackClock,
    },
    ParticipantJoined {
        entry: RosterEntry,
    },
    ParticipantLeft {
        participant_id: String,
    },
    PresenceChanged {
        participant_id: String,
        online: OnlineState,
    },
    HostChanged {
        participant_id: String,
    },
    EventAppended {
        seq: u64,
        event: Event,
    },
}

/// Full room state for a joining or reconnecting client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub selection: Option<ContentSelection>,
    pub clock: PlaybackClock,
    pub roster: Vec<RosterEntry>,
    pub last_event_seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_roundtrips_as_tagged_json() {
        let cmd = Command::SeekTo {
            participant_id: "u-1".into(),
            seconds: 50.0,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"kind\":\"seek_to\""));
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn load_content_carries_a_selection() {
        let json = r#"{
            "kind": "load_content",
            "participant_id": "u-1",
            "selection": {
                "kind": "video_platform",
                "platform_id": "youtube",
                "media_id": "dQw4w9WgXcQ"
            }
        }"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert!(matches!(
            cmd,
            Command::LoadContent {
                selection: ContentSelection::VideoPlatform { .. },
                ..
            }
        ));
    }

    #[test]
    fn delta_roundtrips_as_tagged_json() {
        let delta = RoomDelta::PresenceChanged {
            participant_id: "u-2".into(),
            online: OnlineState::Offline,
        };
        let json = serde_json::to_string(&delta).unwrap();
        assert!(json.contains("\"kind\":\"presence_changed\""));
        assert!(json.contains("\"online\":\"offline\""));
        let back: RoomDelta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, delta);
    }
}
