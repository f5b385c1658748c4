//! Actor-per-room execution and the room registry.
//!
//! Each room runs as one tokio task owning its `RoomSession`. Commands
//! arrive as envelopes with a reply channel, so effects for one room apply
//! in a single total order while distinct rooms proceed in parallel. Deltas
//! fan out on a broadcast channel that transports subscribe to. The registry
//! creates rooms on first use and retires rooms that stay empty past a
//! grace period, which also stops their actor and sweep timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, info};

use swatch_common::errors::CommandError;
use swatch_common::now_millis;

use crate::event_log::SequencedEvent;
use crate::protocol::{Command, RoomDelta, RoomSnapshot};
use crate::room::{RoomConfig, RoomSession};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub room: RoomConfig,
    /// How often each room reclassifies lapsed participants.
    pub sweep_interval: Duration,
    /// How long a room may sit empty before the reaper retires it.
    pub retire_grace: Duration,
    pub delta_capacity: usize,
    pub command_buffer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            room: RoomConfig::default(),
            sweep_interval: Duration::from_secs(5),
            retire_grace: Duration::from_secs(60),
            delta_capacity: 256,
            command_buffer: 64,
        }
    }
}

/// Occupancy answer used by the reaper.
#[derive(Debug, Clone, Copy)]
pub struct RoomStatus {
    pub participants: usize,
    pub online: usize,
}

enum RoomMsg {
    Apply {
        cmd: Command,
        reply: oneshot::Sender<Result<Vec<RoomDelta>, CommandError>>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
    EventsSince {
        after: u64,
        reply: oneshot::Sender<Vec<SequencedEvent>>,
    },
    Status {
        reply: oneshot::Sender<RoomStatus>,
    },
    Shutdown,
}

/// Cheap handle onto one room's actor.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: String,
    tx: mpsc::Sender<RoomMsg>,
    deltas: broadcast::Sender<RoomDelta>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Apply a command in the room's total order. The error (if any) is
    /// yours alone; deltas reach everyone through `subscribe`.
    pub async fn apply(&self, cmd: Command) -> Result<Vec<RoomDelta>, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomMsg::Apply {
                cmd,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CommandError::RoomClosed(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| CommandError::RoomClosed(self.room_id.clone()))?
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomMsg::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| CommandError::RoomClosed(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| CommandError::RoomClosed(self.room_id.clone()))
    }

    /// Events strictly after `after`, for reconnect catch-up.
    pub async fn events_since(&self, after: u64) -> Result<Vec<SequencedEvent>, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomMsg::EventsSince {
                after,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CommandError::RoomClosed(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| CommandError::RoomClosed(self.room_id.clone()))
    }

    pub async fn status(&self) -> Result<RoomStatus, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomMsg::Status { reply: reply_tx })
            .await
            .map_err(|_| CommandError::RoomClosed(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| CommandError::RoomClosed(self.room_id.clone()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomDelta> {
        self.deltas.subscribe()
    }
}

struct RoomEntry {
    handle: RoomHandle,
    empty_since: Option<Instant>,
}

/// Thread-safe map of live rooms. Clone freely; all clones share state.
#[derive(Clone)]
pub struct RoomRegistry {
    config: RegistryConfig,
    rooms: Arc<RwLock<HashMap<String, RoomEntry>>>,
}

impl RoomRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get a room's handle, creating the room (and its actor) on first use.
    pub async fn room(&self, room_id: &str) -> RoomHandle {
        if let Some(entry) = self.rooms.read().await.get(room_id) {
            return entry.handle.clone();
        }

        let mut rooms = self.rooms.write().await;
        if let Some(entry) = rooms.get(room_id) {
            return entry.handle.clone();
        }

        let (tx, rx) = mpsc::channel(self.config.command_buffer);
        let (delta_tx, _) = broadcast::channel(self.config.delta_capacity);
        let session = RoomSession::new(room_id, self.config.room.clone(), now_millis());
        tokio::spawn(room_task(
            session,
            rx,
            delta_tx.clone(),
            self.config.sweep_interval,
        ));

        let handle = RoomHandle {
            room_id: room_id.to_string(),
            tx,
            deltas: delta_tx,
        };
        rooms.insert(
            room_id.to_string(),
            RoomEntry {
                handle: handle.clone(),
                empty_since: None,
            },
        );
        info!(room_id, "room created");
        handle
    }

    pub async fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(room_id).map(|e| e.handle.clone())
    }

    pub async fn count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// One reaper pass: retire rooms that have been empty past the grace
    /// period. Callers loop this on their own cadence.
    pub async fn reap_idle(&self) {
        let handles: Vec<(String, RoomHandle)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, e)| (id.clone(), e.handle.clone()))
            .collect();

        let mut occupancy = Vec::with_capacity(handles.len());
        for (room_id, handle) in handles {
            // A dead actor counts as empty; the entry gets cleaned up below.
            let participants = handle
                .status()
                .await
                .map(|s| s.participants)
                .unwrap_or(0);
            occupancy.push((room_id, participants));
        }

        let now = Instant::now();
        let mut rooms = self.rooms.write().await;
        for (room_id, participants) in occupancy {
            let Some(entry) = rooms.get_mut(&room_id) else {
                continue;
            };
            if participants > 0 {
                entry.empty_since = None;
                continue;
            }
            let since = entry.empty_since.get_or_insert(now);
            if now.duration_since(*since) >= self.config.retire_grace {
                let _ = entry.handle.tx.try_send(RoomMsg::Shutdown);
                rooms.remove(&room_id);
                info!(room_id = %room_id, "room retired");
            }
        }
    }
}

async fn room_task(
    mut session: RoomSession,
    mut rx: mpsc::Receiver<RoomMsg>,
    deltas: broadcast::Sender<RoomDelta>,
    sweep_interval: Duration,
) {
    let mut sweep = tokio::time::interval(sweep_interval);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(RoomMsg::Apply { cmd, reply }) => {
                    let result = session.apply(cmd, now_millis(), Instant::now());
                    if let Ok(out) = &result {
                        for delta in out {
                            let _ = deltas.send(delta.clone());
                        }
                    }
                    let _ = reply.send(result);
                }
                Some(RoomMsg::Snapshot { reply }) => {
                    let _ = reply.send(session.snapshot());
                }
                Some(RoomMsg::EventsSince { after, reply }) => {
                    let _ = reply.send(session.events_since(after));
                }
                Some(RoomMsg::Status { reply }) => {
                    let _ = reply.send(RoomStatus {
                        participants: session.participant_count(),
                        online: session.online_count(),
                    });
                }
                Some(RoomMsg::Shutdown) | None => break,
            },
            _ = sweep.tick() => {
                for delta in session.sweep_presence(now_millis(), Instant::now()) {
                    let _ = deltas.send(delta);
                }
            }
        }
    }
    debug!(room_id = %session.room_id(), "room task stopped");
}
