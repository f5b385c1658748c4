pub mod clock;
pub mod content;
pub mod event_log;
pub mod presence;
pub mod protocol;
pub mod reconcile;
pub mod registry;
pub mod room;

pub use clock::PlaybackClock;
pub use content::{
    AdapterConfig, AdapterFactory, AdapterKind, AdapterNotification, BuiltAdapter, ContentAdapter,
    ContentSelection, EmbedEndpoint, PassiveFrameAdapter, PlayerCommand, VideoPlatformAdapter,
};
pub use event_log::{Event, EventLog, SequencedEvent};
pub use presence::{OnlineState, PresenceChange, PresenceConfig, PresenceTracker};
pub use protocol::{Command, ParticipantProfile, RoomDelta, RoomSnapshot, RosterEntry};
pub use reconcile::{ClockReconciler, ReconcilerConfig, SyncAction, SyncDriver, SyncEvent};
pub use registry::{RegistryConfig, RoomHandle, RoomRegistry, RoomStatus};
pub use room::{RoomConfig, RoomLifecycle, RoomSession};
