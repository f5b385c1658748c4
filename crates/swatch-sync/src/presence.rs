//! Per-participant liveness tracking.
//!
//! Every participant must heartbeat within the configured interval or be
//! reclassified offline by the next sweep. The room's creating participant
//! is exempt while the process is alive: it is the local authority and can
//! never be partitioned from itself. All methods take an injected `Instant`
//! so classification is deterministic under test.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnlineState {
    Online,
    Offline,
}

/// Liveness cadence. A configurable default, not a wire contract.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub heartbeat_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// A single observed transition, reported exactly once per flip.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceChange {
    pub participant_id: String,
    pub online: OnlineState,
}

#[derive(Debug)]
struct PresenceEntry {
    last_heartbeat: Instant,
    online: OnlineState,
}

/// Heartbeat bookkeeping for one room.
#[derive(Debug)]
pub struct PresenceTracker {
    config: PresenceConfig,
    creator_id: Option<String>,
    entries: HashMap<String, PresenceEntry>,
}

impl PresenceTracker {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            creator_id: None,
            entries: HashMap::new(),
        }
    }

    /// Exempt the room's creating participant from offline reclassification.
    pub fn set_creator(&mut self, participant_id: &str) {
        self.creator_id = Some(participant_id.to_string());
    }

    /// Start tracking a participant as online.
    pub fn track(&mut self, participant_id: &str, now: Instant) {
        self.entries.insert(
            participant_id.to_string(),
            PresenceEntry {
                last_heartbeat: now,
                online: OnlineState::Online,
            },
        );
    }

    /// Stop tracking a departed participant.
    pub fn forget(&mut self, participant_id: &str) {
        self.entries.remove(participant_id);
    }

    /// Record a heartbeat. Returns the transition if this heartbeat brought
    /// an offline participant back online.
    pub fn record_heartbeat(
        &mut self,
        participant_id: &str,
        now: Instant,
    ) -> Option<PresenceChange> {
        let entry = self.entries.get_mut(participant_id)?;
        entry.last_heartbeat = now;
        if entry.online == OnlineState::Offline {
            entry.online = OnlineState::Online;
            return Some(PresenceChange {
                participant_id: participant_id.to_string(),
                online: OnlineState::Online,
            });
        }
        None
    }

    /// Force a participant online (rejoin path). Returns true if it flipped.
    pub fn mark_online(&mut self, participant_id: &str, now: Instant) -> bool {
        match self.entries.get_mut(participant_id) {
            Some(entry) => {
                entry.last_heartbeat = now;
                let flipped = entry.online == OnlineState::Offline;
                entry.online = OnlineState::Online;
                flipped
            }
            None => {
                self.track(participant_id, now);
                false
            }
        }
    }

    /// Force a participant offline. Returns true if it flipped.
    pub fn mark_offline(&mut self, participant_id: &str) -> bool {
        match self.entries.get_mut(participant_id) {
            Some(entry) if entry.online == OnlineState::Online => {
                entry.online = OnlineState::Offline;
                true
            }
            _ => false,
        }
    }

    pub fn is_online(&self, participant_id: &str) -> bool {
        self.entries
            .get(participant_id)
            .map(|e| e.online == OnlineState::Online)
            .unwrap_or(false)
    }

    pub fn state_of(&self, participant_id: &str) -> Option<OnlineState> {
        self.entries.get(participant_id).map(|e| e.online)
    }

    pub fn online_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.online == OnlineState::Online)
            .count()
    }

    /// Reclassify participants whose heartbeat lapsed. Each transition is
    /// reported once; already-offline participants stay silent on later
    /// sweeps. Results are ordered by participant id for determinism.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<PresenceChange> {
        let mut changes = Vec::new();
        for (id, entry) in &mut self.entries {
            if entry.online != OnlineState::Online {
                continue;
            }
            if self.creator_id.as_deref() == Some(id.as_str()) {
                continue;
            }
            if now.duration_since(entry.last_heartbeat) > self.config.heartbeat_interval {
                entry.online = OnlineState::Offline;
                changes.push(PresenceChange {
                    participant_id: id.clone(),
                    online: OnlineState::Offline,
                });
            }
        }
        changes.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(interval_secs: u64) -> PresenceTracker {
        PresenceTracker::new(PresenceConfig {
            heartbeat_interval: Duration::from_secs(interval_secs),
        })
    }

    #[test]
    fn lapsed_heartbeat_goes_offline_exactly_once() {
        let mut tracker = tracker(30);
        let start = Instant::now();
        tracker.track("u-1", start);

        // 31s without a heartbeat crosses the 30s threshold.
        let later = start + Duration::from_secs(31);
        let changes = tracker.sweep_expired(later);
        assert_eq!(
            changes,
            vec![PresenceChange {
                participant_id: "u-1".into(),
                online: OnlineState::Offline,
            }]
        );

        // Further sweeps stay silent: the transition was already reported.
        assert!(tracker.sweep_expired(later + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn heartbeat_within_interval_stays_online() {
        let mut tracker = tracker(30);
        let start = Instant::now();
        tracker.track("u-1", start);

        tracker.record_heartbeat("u-1", start + Duration::from_secs(20));
        let changes = tracker.sweep_expired(start + Duration::from_secs(45));
        assert!(changes.is_empty());
        assert!(tracker.is_online("u-1"));
    }

    #[test]
    fn heartbeat_after_expiry_reports_return() {
        let mut tracker = tracker(30);
        let start = Instant::now();
        tracker.track("u-1", start);
        tracker.sweep_expired(start + Duration::from_secs(31));
        assert!(!tracker.is_online("u-1"));

        let change = tracker
            .record_heartbeat("u-1", start + Duration::from_secs(40))
            .expect("offline heartbeat should flip back online");
        assert_eq!(change.online, OnlineState::Online);
        assert!(tracker.is_online("u-1"));
    }

    #[test]
    fn creator_is_exempt_from_expiry() {
        let mut tracker = tracker(30);
        let start = Instant::now();
        tracker.track("host", start);
        tracker.track("guest", start);
        tracker.set_creator("host");

        let changes = tracker.sweep_expired(start + Duration::from_secs(120));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].participant_id, "guest");
        assert!(tracker.is_online("host"));
    }

    #[test]
    fn sweep_reports_in_id_order() {
        let mut tracker = tracker(30);
        let start = Instant::now();
        for id in ["u-c", "u-a", "u-b"] {
            tracker.track(id, start);
        }

        let ids: Vec<String> = tracker
            .sweep_expired(start + Duration::from_secs(31))
            .into_iter()
            .map(|c| c.participant_id)
            .collect();
        assert_eq!(ids, vec!["u-a", "u-b", "u-c"]);
    }

    #[test]
    fn explicit_marks_flip_state_deterministically() {
        let mut tracker = tracker(30);
        let start = Instant::now();
        tracker.track("u-1", start);

        assert!(tracker.mark_offline("u-1"));
        assert!(!tracker.mark_offline("u-1"), "already offline");
        assert!(tracker.mark_online("u-1", start));
        assert!(!tracker.mark_online("u-1", start), "already online");

        // mark_online also refreshes the heartbeat.
        assert!(tracker
            .sweep_expired(start + Duration::from_secs(29))
            .is_empty());
    }

    #[test]
    fn forgotten_participants_never_report() {
        let mut tracker = tracker(30);
        let start = Instant::now();
        tracker.track("u-1", start);
        tracker.forget("u-1");
        assert!(tracker.sweep_expired(start + Duration::from_secs(60)).is_empty());
        assert!(tracker.record_heartbeat("u-1", start).is_none());
    }
}
