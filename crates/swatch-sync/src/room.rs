//! The authoritative per-room state machine.
//!
//! A `RoomSession` owns everything a room is: the content selection, the
//! playback clock, the roster, presence, and the event log. It mutates only
//! through [`RoomSession::apply`], which validates before touching any state
//! so a failed command is a no-op. The owning actor (see `registry`) feeds
//! commands in one at a time, which is what makes the ordering authoritative.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info};

use swatch_common::errors::CommandError;

use crate::clock::PlaybackClock;
use crate::content::ContentSelection;
use crate::event_log::{Event, EventLog, SequencedEvent};
use crate::presence::{OnlineState, PresenceConfig, PresenceTracker};
use crate::protocol::{Command, ParticipantProfile, RoomDelta, RoomSnapshot, RosterEntry};

/// Room lifecycle. Rooms are retired only from `Empty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomLifecycle {
    Empty,
    Active,
}

#[derive(Debug, Clone, Default)]
pub struct RoomConfig {
    pub presence: PresenceConfig,
}

#[derive(Debug)]
struct Member {
    profile: ParticipantProfile,
    join_seq: u64,
}

/// Authoritative state for one watch-together room.
#[derive(Debug)]
pub struct RoomSession {
    room_id: String,
    selection: Option<ContentSelection>,
    clock: PlaybackClock,
    members: HashMap<String, Member>,
    next_join_seq: u64,
    host_id: Option<String>,
    presence: PresenceTracker,
    log: EventLog,
}

impl RoomSession {
    pub fn new(room_id: impl Into<String>, config: RoomConfig, now_wall: u64) -> Self {
        Self {
            room_id: room_id.into(),
            selection: None,
            clock: PlaybackClock::new(now_wall),
            members: HashMap::new(),
            next_join_seq: 1,
            host_id: None,
            presence: PresenceTracker::new(config.presence),
            log: EventLog::new(),
        }
    }

    /// Apply one command. All-or-nothing: an `Err` means nothing changed.
    /// Returned deltas are for fan-out to every participant; the error path
    /// is private to the issuer.
    pub fn apply(
        &mut self,
        cmd: Command,
        now_wall: u64,
        now_mono: Instant,
    ) -> Result<Vec<RoomDelta>, CommandError> {
        match cmd {
            Command::Join { participant } => self.join(participant, now_wall, now_mono),
            Command::Leave { participant_id } => self.leave(&participant_id, now_wall),
            Command::LoadContent {
                participant_id,
                selection,
            } => self.load_content(&participant_id, selection, now_wall),
            Command::SetPlaying {
                participant_id,
                playing,
            } => self.set_playing(&participant_id, playing, now_wall),
            Command::SeekTo {
                participant_id,
                seconds,
            } => self.seek_to(&participant_id, seconds, now_wall),
            Command::PostChat { author_id, text } => self.post_chat(&author_id, text, now_wall),
            Command::Heartbeat { participant_id } => {
                self.heartbeat(&participant_id, now_wall, now_mono)
            }
            Command::ReportPlayback {
                participant_id,
                revision,
                position_seconds,
                duration_seconds,
            } => self.report_playback(
                &participant_id,
                revision,
                position_seconds,
                duration_seconds,
                now_wall,
            ),
            Command::ReportSyncLost { participant_id } => {
                self.report_sync_lost(&participant_id, now_wall)
            }
        }
    }

    /// Reclassify lapsed participants. Runs through the same single writer
    /// as commands, just without an issuer to answer to.
    pub fn sweep_presence(&mut self, now_wall: u64, now_mono: Instant) -> Vec<RoomDelta> {
        let mut deltas = Vec::new();
        for change in self.presence.sweep_expired(now_mono) {
            let name = self.display_name(&change.participant_id);
            deltas.push(RoomDelta::PresenceChanged {
                participant_id: change.participant_id.clone(),
                online: change.online,
            });
            self.append_notice(format!("{name} went offline"), now_wall, &mut deltas);
            info!(
                room_id = %self.room_id,
                participant_id = %change.participant_id,
                "participant went offline"
            );
        }
        deltas
    }

    // -----------------------------------------------------------------------
    // Command handlers
    // -----------------------------------------------------------------------

    fn join(
        &mut self,
        profile: ParticipantProfile,
        now_wall: u64,
        now_mono: Instant,
    ) -> Result<Vec<RoomDelta>, CommandError> {
        if self.members.contains_key(&profile.id) {
            if self.presence.is_online(&profile.id) {
                return Err(CommandError::DuplicateParticipant(profile.id));
            }
            // Known participant coming back from an offline spell.
            let mut deltas = Vec::new();
            self.presence.mark_online(&profile.id, now_mono);
            deltas.push(RoomDelta::PresenceChanged {
                participant_id: profile.id.clone(),
                online: OnlineState::Online,
            });
            let name = self.display_name(&profile.id);
            self.append_notice(format!("{name} rejoined"), now_wall, &mut deltas);
            if self.host_id.is_none() {
                self.transfer_host_to(profile.id.clone(), now_wall, &mut deltas);
            }
            info!(room_id = %self.room_id, participant_id = %profile.id, "participant rejoined");
            return Ok(deltas);
        }

        let join_seq = self.next_join_seq;
        self.next_join_seq += 1;
        let first = self.members.is_empty();
        self.members.insert(
            profile.id.clone(),
            Member {
                profile: profile.clone(),
                join_seq,
            },
        );
        self.presence.track(&profile.id, now_mono);
        if first {
            self.host_id = Some(profile.id.clone());
            self.presence.set_creator(&profile.id);
        }

        let mut deltas = vec![RoomDelta::ParticipantJoined {
            entry: self.roster_entry(&profile.id),
        }];
        self.append_notice(
            format!("{} joined", profile.display_name),
            now_wall,
            &mut deltas,
        );
        if !first && self.host_id.is_none() {
            self.transfer_host_to(profile.id.clone(), now_wall, &mut deltas);
        }
        info!(
            room_id = %self.room_id,
            participant_id = %profile.id,
            join_seq,
            host = first,
            "participant joined"
        );
        Ok(deltas)
    }

    fn leave(&mut self, id: &str, now_wall: u64) -> Result<Vec<RoomDelta>, CommandError> {
        let Some(member) = self.members.remove(id) else {
            return Err(CommandError::UnknownParticipant(id.to_string()));
        };
        self.presence.forget(id);

        let mut deltas = vec![RoomDelta::ParticipantLeft {
            participant_id: id.to_string(),
        }];
        self.append_notice(
            format!("{} left", member.profile.display_name),
            now_wall,
            &mut deltas,
        );

        if self.host_id.as_deref() == Some(id) {
            self.host_id = None;
            if let Some(next) = self.longest_tenured_online() {
                self.transfer_host_to(next, now_wall, &mut deltas);
            }
        }
        info!(
            room_id = %self.room_id,
            participant_id = %id,
            remaining = self.members.len(),
            "participant left"
        );
        Ok(deltas)
    }

    fn load_content(
        &mut self,
        id: &str,
        selection: ContentSelection,
        now_wall: u64,
    ) -> Result<Vec<RoomDelta>, CommandError> {
        self.require_member(id)?;
        // Reject before any state changes; the previous selection survives.
        selection.validate()?;

        self.selection = Some(selection.clone());
        self.clock.reset(now_wall);

        let mut deltas = vec![RoomDelta::SelectionChanged {
            selection: self.selection.clone(),
            clock: self.clock.clone(),
        }];
        self.append_notice(
            format!("now watching: {}", selection.describe()),
            now_wall,
            &mut deltas,
        );
        info!(
            room_id = %self.room_id,
            participant_id = %id,
            selection = %selection.describe(),
            synchronizable = selection.is_synchronizable(),
            "content loaded"
        );
        Ok(deltas)
    }

    fn set_playing(
        &mut self,
        id: &str,
        playing: bool,
        now_wall: u64,
    ) -> Result<Vec<RoomDelta>, CommandError> {
        self.require_host(id)?;
        self.clock.set_playing(playing, now_wall);
        debug!(room_id = %self.room_id, playing, revision = self.clock.revision, "playback toggled");
        Ok(vec![RoomDelta::ClockChanged {
            clock: self.clock.clone(),
        }])
    }

    fn seek_to(
        &mut self,
        id: &str,
        seconds: f64,
        now_wall: u64,
    ) -> Result<Vec<RoomDelta>, CommandError> {
        self.require_host(id)?;
        self.clock.seek_to(seconds, now_wall);
        debug!(
            room_id = %self.room_id,
            position = self.clock.position_seconds,
            revision = self.clock.revision,
            "seeked"
        );
        Ok(vec![RoomDelta::ClockChanged {
            clock: self.clock.clone(),
        }])
    }

    fn post_chat(
        &mut self,
        author_id: &str,
        text: String,
        now_wall: u64,
    ) -> Result<Vec<RoomDelta>, CommandError> {
        let member = self.require_member(author_id)?;
        let event = Event::ChatMessage {
            author_id: author_id.to_string(),
            display_name: member.profile.display_name.clone(),
            text,
            at: now_wall,
        };
        let seq = self.log.append(event.clone());
        Ok(vec![RoomDelta::EventAppended { seq, event }])
    }

    fn heartbeat(
        &mut self,
        id: &str,
        now_wall: u64,
        now_mono: Instant,
    ) -> Result<Vec<RoomDelta>, CommandError> {
        self.require_member(id)?;
        let mut deltas = Vec::new();
        if let Some(change) = self.presence.record_heartbeat(id, now_mono) {
            let name = self.display_name(id);
            deltas.push(RoomDelta::PresenceChanged {
                participant_id: change.participant_id,
                online: change.online,
            });
            self.append_notice(format!("{name} is back online"), now_wall, &mut deltas);
        }
        Ok(deltas)
    }

    fn report_playback(
        &mut self,
        id: &str,
        revision: u64,
        position_seconds: f64,
        duration_seconds: Option<f64>,
        now_wall: u64,
    ) -> Result<Vec<RoomDelta>, CommandError> {
        self.require_host(id)?;
        if revision != self.clock.revision {
            debug!(
                room_id = %self.room_id,
                reported = revision,
                current = self.clock.revision,
                "dropping stale playback report"
            );
            return Ok(Vec::new());
        }
        self.clock
            .refresh(position_seconds, duration_seconds, now_wall);
        Ok(vec![RoomDelta::ClockChanged {
            clock: self.clock.clone(),
        }])
    }

    fn report_sync_lost(
        &mut self,
        id: &str,
        now_wall: u64,
    ) -> Result<Vec<RoomDelta>, CommandError> {
        self.require_member(id)?;
        let name = self.display_name(id);
        let mut deltas = Vec::new();
        self.append_notice(format!("playback sync lost for {name}"), now_wall, &mut deltas);
        Ok(deltas)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn require_member(&self, id: &str) -> Result<&Member, CommandError> {
        self.members
            .get(id)
            .ok_or_else(|| CommandError::UnknownParticipant(id.to_string()))
    }

    fn require_host(&self, id: &str) -> Result<(), CommandError> {
        self.require_member(id)?;
        if self.host_id.as_deref() != Some(id) {
            return Err(CommandError::NotAuthorized(
                "only the host controls playback".into(),
            ));
        }
        Ok(())
    }

    /// Longest-tenured online participant: lowest join sequence wins.
    fn longest_tenured_online(&self) -> Option<String> {
        self.members
            .iter()
            .filter(|(id, _)| self.presence.is_online(id))
            .min_by_key(|(_, m)| m.join_seq)
            .map(|(id, _)| id.clone())
    }

    fn transfer_host_to(&mut self, id: String, now_wall: u64, deltas: &mut Vec<RoomDelta>) {
        let name = self.display_name(&id);
        self.host_id = Some(id.clone());
        deltas.push(RoomDelta::HostChanged {
            participant_id: id.clone(),
        });
        self.append_notice(format!("host transferred to {name}"), now_wall, deltas);
        info!(room_id = %self.room_id, participant_id = %id, "host transferred");
    }

    fn append_notice(&mut self, text: String, at: u64, deltas: &mut Vec<RoomDelta>) {
        let event = Event::SystemNotice { text, at };
        let seq = self.log.append(event.clone());
        deltas.push(RoomDelta::EventAppended { seq, event });
    }

    fn display_name(&self, id: &str) -> String {
        self.members
            .get(id)
            .map(|m| m.profile.display_name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn roster_entry(&self, id: &str) -> RosterEntry {
        let member = &self.members[id];
        RosterEntry {
            id: member.profile.id.clone(),
            display_name: member.profile.display_name.clone(),
            is_host: self.host_id.as_deref() == Some(id),
            join_seq: member.join_seq,
            online: self
                .presence
                .state_of(id)
                .unwrap_or(OnlineState::Offline),
        }
    }

    // -----------------------------------------------------------------------
    // Read access
    // -----------------------------------------------------------------------

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn lifecycle(&self) -> RoomLifecycle {
        if self.members.is_empty() {
            RoomLifecycle::Empty
        } else {
            RoomLifecycle::Active
        }
    }

    pub fn participant_count(&self) -> usize {
        self.members.len()
    }

    pub fn online_count(&self) -> usize {
        self.presence.online_count()
    }

    pub fn host_id(&self) -> Option<&str> {
        self.host_id.as_deref()
    }

    pub fn selection(&self) -> Option<&ContentSelection> {
        self.selection.as_ref()
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn events_since(&self, seq: u64) -> Vec<SequencedEvent> {
        self.log.since(seq)
    }

    pub fn last_event_seq(&self) -> u64 {
        self.log.last_seq()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let mut roster: Vec<RosterEntry> = self
            .members
            .keys()
            .map(|id| self.roster_entry(id))
            .collect();
        roster.sort_by_key(|e| e.join_seq);
        RoomSnapshot {
            room_id: self.room_id.clone(),
            selection: self.selection.clone(),
            clock: self.clock.clone(),
            roster,
            last_event_seq: self.log.last_seq(),
        }
    }
}
