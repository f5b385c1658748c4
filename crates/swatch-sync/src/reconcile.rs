//! Corrective playback actions that keep a local player within tolerance of
//! the authoritative clock.
//!
//! The decision is a pure function; `SyncDriver` runs it on a fixed cadence
//! against a live adapter. Drivers exist only for synchronizable selections;
//! passive frames are deliberately left alone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use swatch_common::errors::AdapterError;
use swatch_common::now_millis;

use crate::clock::PlaybackClock;
use crate::content::{AdapterNotification, ContentAdapter, ContentSelection};

/// Drift tolerance and pacing. Defaults mirror the product's observed
/// behavior (2s drift window, 1Hz correction); all of it is configurable.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub tolerance_seconds: f64,
    pub cadence: Duration,
    pub retry_backoff: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tolerance_seconds: 2.0,
            cadence: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// What the local player should do to converge on the authoritative clock.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    Noop,
    Seek(f64),
    Resume,
    Pause,
}

/// Events the driver surfaces to its owner (the participant's client glue).
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The embed finished loading and reported media metadata.
    Ready { duration_seconds: f64 },
    /// Reconciliation failed even after a retry; the owner should tell the
    /// room. Playback is left as-is and the driver keeps trying.
    SyncLost { detail: String },
}

/// Pure reconciliation decision over an authoritative clock and a locally
/// observed player state.
#[derive(Debug, Clone, Default)]
pub struct ClockReconciler {
    config: ReconcilerConfig,
}

impl ClockReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self { config }
    }

    /// Decide the corrective action. Idempotent: a player already within
    /// tolerance and matching the authoritative play state yields `Noop`.
    pub fn plan(
        &self,
        clock: &PlaybackClock,
        local_seconds: f64,
        local_playing: bool,
        now: u64,
    ) -> SyncAction {
        let expected = clock.projected_position(now);
        if (local_seconds - expected).abs() > self.config.tolerance_seconds {
            // `projected_position` is already clamped into [0, duration].
            return SyncAction::Seek(expected);
        }
        if local_playing != clock.is_playing {
            return if clock.is_playing {
                SyncAction::Resume
            } else {
                SyncAction::Pause
            };
        }
        SyncAction::Noop
    }

    /// Like [`plan`](Self::plan) but selection-aware: passive frames are
    /// unsynchronizable and never receive corrective actions.
    pub fn plan_for(
        &self,
        selection: &ContentSelection,
        clock: &PlaybackClock,
        local_seconds: f64,
        local_playing: bool,
        now: u64,
    ) -> SyncAction {
        if !selection.is_synchronizable() {
            return SyncAction::Noop;
        }
        self.plan(clock, local_seconds, local_playing, now)
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Periodic reconciliation task for one participant's adapter. Aborted on
/// drop so no loop outlives the participant or the room.
pub struct SyncDriver {
    handle: JoinHandle<()>,
}

impl SyncDriver {
    /// Spawn a driver for the given selection. Returns `None` for passive
    /// selections: suppressing reconciliation there is policy, not an error.
    pub fn spawn(
        config: ReconcilerConfig,
        selection: &ContentSelection,
        adapter: Arc<dyn ContentAdapter>,
        notifications: mpsc::Receiver<AdapterNotification>,
        clock_rx: watch::Receiver<PlaybackClock>,
        events_tx: mpsc::Sender<SyncEvent>,
    ) -> Option<Self> {
        if !selection.is_synchronizable() {
            return None;
        }
        let handle = tokio::spawn(drive(config, adapter, notifications, clock_rx, events_tx));
        Some(Self { handle })
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for SyncDriver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn drive(
    config: ReconcilerConfig,
    adapter: Arc<dyn ContentAdapter>,
    mut notifications: mpsc::Receiver<AdapterNotification>,
    clock_rx: watch::Receiver<PlaybackClock>,
    events_tx: mpsc::Sender<SyncEvent>,
) {
    let reconciler = ClockReconciler::new(config.clone());
    let mut interval = tokio::time::interval(config.cadence);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut local_playing = false;
    let mut ready = false;

    loop {
        tokio::select! {
            note = notifications.recv() => match note {
                Some(AdapterNotification::Ready { duration_seconds }) => {
                    ready = true;
                    let _ = events_tx
                        .send(SyncEvent::Ready { duration_seconds })
                        .await;
                }
                Some(AdapterNotification::PlaybackStarted) => local_playing = true,
                Some(AdapterNotification::PlaybackPaused) => local_playing = false,
                Some(AdapterNotification::Error(detail)) => {
                    warn!(detail = %detail, "embed reported an error");
                }
                None => break,
            },
            _ = interval.tick() => {
                if !ready {
                    continue;
                }
                let clock = clock_rx.borrow().clone();
                if let Err(first) =
                    reconcile_once(&reconciler, adapter.as_ref(), &clock, &mut local_playing).await
                {
                    debug!(error = %first, "sync tick failed, retrying");
                    tokio::time::sleep(config.retry_backoff).await;
                    let clock = clock_rx.borrow().clone();
                    if let Err(err) =
                        reconcile_once(&reconciler, adapter.as_ref(), &clock, &mut local_playing)
                            .await
                    {
                        warn!(error = %err, "playback sync lost");
                        let _ = events_tx
                            .send(SyncEvent::SyncLost {
                                detail: err.to_string(),
                            })
                            .await;
                    }
                }
            }
        }
    }
}

async fn reconcile_once(
    reconciler: &ClockReconciler,
    adapter: &dyn ContentAdapter,
    clock: &PlaybackClock,
    local_playing: &mut bool,
) -> Result<(), AdapterError> {
    let local = adapter.query_time().await?;
    match reconciler.plan(clock, local, *local_playing, now_millis()) {
        SyncAction::Noop => {}
        SyncAction::Seek(target) => adapter.seek(target).await?,
        SyncAction::Resume => {
            adapter.play().await?;
            // The embed's own notification keeps this honest.
            *local_playing = true;
        }
        SyncAction::Pause => {
            adapter.pause().await?;
            *local_playing = false;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{AdapterConfig, AdapterFactory, PlayerCommand};

    fn clock_at(position: f64, playing: bool, duration: f64, now: u64) -> PlaybackClock {
        let mut clock = PlaybackClock::new(now);
        clock.refresh(position, Some(duration), now);
        if playing {
            clock.set_playing(true, now);
        }
        clock
    }

    #[test]
    fn within_tolerance_and_matching_state_is_noop_repeatedly() {
        let reconciler = ClockReconciler::default();
        let clock = clock_at(10.0, true, 300.0, 1_000);

        for _ in 0..5 {
            let action = reconciler.plan(&clock, 10.5, true, 1_000);
            assert_eq!(action, SyncAction::Noop);
        }
    }

    #[test]
    fn drift_beyond_tolerance_seeks_to_projected_position() {
        let reconciler = ClockReconciler::default();
        let clock = clock_at(10.0, true, 300.0, 0);

        // 5s later the authority projects 15s; local player sits at 4s.
        let action = reconciler.plan(&clock, 4.0, true, 5_000);
        assert_eq!(action, SyncAction::Seek(15.0));
    }

    #[test]
    fn seek_target_never_escapes_media_bounds() {
        let reconciler = ClockReconciler::default();

        let clock = clock_at(95.0, true, 100.0, 0);
        // Long projection clamps at the duration.
        let action = reconciler.plan(&clock, 10.0, true, 60_000);
        assert_eq!(action, SyncAction::Seek(100.0));

        let clock = clock_at(0.0, false, 100.0, 0);
        let action = reconciler.plan(&clock, 50.0, false, 0);
        assert_eq!(action, SyncAction::Seek(0.0));
    }

    #[test]
    fn play_state_mismatch_resumes_or_pauses() {
        let reconciler = ClockReconciler::default();

        let clock = clock_at(0.0, true, 300.0, 1_000);
        assert_eq!(reconciler.plan(&clock, 0.0, false, 1_000), SyncAction::Resume);

        let clock = clock_at(20.0, false, 300.0, 1_000);
        assert_eq!(reconciler.plan(&clock, 20.0, true, 1_000), SyncAction::Pause);
    }

    #[test]
    fn passive_selections_never_get_actions() {
        let reconciler = ClockReconciler::default();
        let selection = ContentSelection::PassiveFrame {
            target_url: "https://example.com".into(),
        };
        // Wildly divergent local state: still Noop by policy.
        let clock = clock_at(100.0, true, 300.0, 0);
        let action = reconciler.plan_for(&selection, &clock, 5_000.0, false, 0);
        assert_eq!(action, SyncAction::Noop);
    }

    #[test]
    fn driver_refuses_passive_selections() {
        let selection = ContentSelection::PassiveFrame {
            target_url: "https://example.com".into(),
        };
        let built = AdapterFactory::default().build(&selection).unwrap();
        let (_clock_tx, clock_rx) = watch::channel(PlaybackClock::new(0));
        let (events_tx, _events_rx) = mpsc::channel(8);

        let driver = SyncDriver::spawn(
            ReconcilerConfig::default(),
            &selection,
            built.adapter,
            built.notifications,
            clock_rx,
            events_tx,
        );
        assert!(driver.is_none());
    }

    #[tokio::test]
    async fn driver_resumes_a_paused_player() {
        let selection = ContentSelection::from_url("https://youtu.be/dQw4w9WgXcQ").unwrap();
        let mut built = AdapterFactory::default().build(&selection).unwrap();
        let mut embed = built.embed.take().unwrap();

        let now = now_millis();
        let clock = clock_at(0.0, true, 212.0, now);
        let (_clock_tx, clock_rx) = watch::channel(clock);
        let (events_tx, mut events_rx) = mpsc::channel(8);

        let config = ReconcilerConfig {
            cadence: Duration::from_millis(10),
            retry_backoff: Duration::from_millis(10),
            ..ReconcilerConfig::default()
        };
        let _driver = SyncDriver::spawn(
            config,
            &selection,
            built.adapter,
            built.notifications,
            clock_rx,
            events_tx,
        )
        .unwrap();

        embed
            .notifications
            .send(AdapterNotification::Ready {
                duration_seconds: 212.0,
            })
            .await
            .unwrap();
        assert_eq!(
            events_rx.recv().await,
            Some(SyncEvent::Ready {
                duration_seconds: 212.0
            })
        );

        // Answer time queries near zero; the driver should order a resume.
        let saw_play = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match embed.commands.recv().await {
                    Some(PlayerCommand::QueryTime { reply }) => {
                        let _ = reply.send(0.2);
                    }
                    Some(PlayerCommand::Play) => return true,
                    Some(_) => {}
                    None => return false,
                }
            }
        })
        .await
        .unwrap();
        assert!(saw_play);
    }

    #[tokio::test]
    async fn driver_reports_sync_lost_after_failed_retry() {
        let selection = ContentSelection::from_url("https://youtu.be/dQw4w9WgXcQ").unwrap();
        let factory = AdapterFactory::new(AdapterConfig {
            call_timeout: Duration::from_millis(20),
            channel_capacity: 8,
        });
        let mut built = factory.build(&selection).unwrap();
        let mut embed = built.embed.take().unwrap();

        let now = now_millis();
        let (_clock_tx, clock_rx) = watch::channel(clock_at(0.0, true, 212.0, now));
        let (events_tx, mut events_rx) = mpsc::channel(8);

        let config = ReconcilerConfig {
            cadence: Duration::from_millis(10),
            retry_backoff: Duration::from_millis(10),
            ..ReconcilerConfig::default()
        };
        let _driver = SyncDriver::spawn(
            config,
            &selection,
            built.adapter,
            built.notifications,
            clock_rx,
            events_tx,
        )
        .unwrap();

        embed
            .notifications
            .send(AdapterNotification::Ready {
                duration_seconds: 212.0,
            })
            .await
            .unwrap();
        assert!(matches!(
            events_rx.recv().await,
            Some(SyncEvent::Ready { .. })
        ));

        // Swallow queries without replying: every call times out.
        let swallow = tokio::spawn(async move {
            while let Some(cmd) = embed.commands.recv().await {
                drop(cmd);
            }
        });

        let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(SyncEvent::SyncLost { .. })), "got {event:?}");
        swallow.abort();
    }
}
