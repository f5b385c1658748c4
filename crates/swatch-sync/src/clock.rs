//! Authoritative playback clock for a room.

use serde::{Deserialize, Serialize};

/// Authoritative playback state for a room's current selection.
///
/// `revision` increases on every commanded transition (load, play, pause,
/// seek) and lets the session drop stale client reports. Position refreshes
/// from the host's player do not bump it; they track the clock's natural
/// advancement, not a new authoritative decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackClock {
    pub is_playing: bool,
    pub position_seconds: f64,
    /// 0.0 until the host's player has reported real media metadata.
    pub duration_seconds: f64,
    /// Epoch millis of the last authoritative update.
    pub last_updated_at: u64,
    pub revision: u64,
}

impl PlaybackClock {
    pub fn new(now: u64) -> Self {
        Self {
            is_playing: false,
            position_seconds: 0.0,
            duration_seconds: 0.0,
            last_updated_at: now,
            revision: 0,
        }
    }

    /// Reset for a newly loaded selection.
    pub fn reset(&mut self, now: u64) {
        self.is_playing = false;
        self.position_seconds = 0.0;
        self.duration_seconds = 0.0;
        self.last_updated_at = now;
        self.revision += 1;
    }

    /// Start or stop playback. The stored position is projected forward
    /// first so pausing freezes the clock where playback actually is.
    pub fn set_playing(&mut self, playing: bool, now: u64) {
        self.position_seconds = self.projected_position(now);
        self.is_playing = playing;
        self.last_updated_at = now;
        self.revision += 1;
    }

    pub fn seek_to(&mut self, seconds: f64, now: u64) {
        self.position_seconds = self.clamp(seconds);
        self.last_updated_at = now;
        self.revision += 1;
    }

    /// Refresh position/duration from an accepted host report. Not a
    /// commanded transition: the revision stays put.
    pub fn refresh(&mut self, position_seconds: f64, duration_seconds: Option<f64>, now: u64) {
        if let Some(duration) = duration_seconds {
            if duration.is_finite() && duration > 0.0 {
                self.duration_seconds = duration;
            }
        }
        self.position_seconds = self.clamp(position_seconds);
        self.last_updated_at = now;
    }

    /// Where playback should be right now: the stored position advanced by
    /// the elapsed time while playing, clamped to the media bounds.
    pub fn projected_position(&self, now: u64) -> f64 {
        if !self.is_playing {
            return self.position_seconds;
        }
        let elapsed = now.saturating_sub(self.last_updated_at) as f64 / 1000.0;
        self.clamp(self.position_seconds + elapsed)
    }

    /// Clamp a position into `[0, duration]`. Only the lower bound applies
    /// while the duration is unknown.
    pub fn clamp(&self, seconds: f64) -> f64 {
        let bounded = seconds.max(0.0);
        if self.duration_seconds > 0.0 {
            bounded.min(self.duration_seconds)
        } else {
            bounded
        }
    }
}
