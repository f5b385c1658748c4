//! Content selection and the adapter seam over embeddable players.
//!
//! A room shows exactly one piece of external content at a time: either a
//! scriptable video-platform embed (YouTube, Vimeo) or a plain page in a
//! passive frame. Adapters give the client one uniform control surface over
//! both; the engine itself never talks to an embed. It only validates
//! selections and broadcasts the authoritative clock.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use swatch_common::errors::AdapterError;
use swatch_common::now_millis;

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// What a room is currently showing. Exactly one active selection per room;
/// replacing it resets the playback clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentSelection {
    VideoPlatform {
        platform_id: String,
        media_id: String,
    },
    PassiveFrame {
        target_url: String,
    },
}

fn youtube_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:youtube\.com/(?:watch\?(?:.*&)?v=|embed/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{11})",
        )
        .expect("static regex")
    })
}

fn vimeo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"vimeo\.com/(\d+)").expect("static regex"))
}

impl ContentSelection {
    /// Classify a pasted link: YouTube and Vimeo become scriptable
    /// video-platform selections, everything else loads as a passive frame
    /// with an `https://` scheme prefixed when missing.
    pub fn from_url(raw: &str) -> Result<Self, AdapterError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AdapterError::Init("empty url".into()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(AdapterError::Init(format!(
                "url contains whitespace: {trimmed}"
            )));
        }

        if let Some(caps) = youtube_re().captures(trimmed) {
            return Ok(ContentSelection::VideoPlatform {
                platform_id: "youtube".into(),
                media_id: caps[1].to_string(),
            });
        }
        if let Some(caps) = vimeo_re().captures(trimmed) {
            return Ok(ContentSelection::VideoPlatform {
                platform_id: "vimeo".into(),
                media_id: caps[1].to_string(),
            });
        }

        let target_url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };
        Ok(ContentSelection::PassiveFrame { target_url })
    }

    /// Check that an adapter could be constructed for this selection. The
    /// session runs this during `LoadContent` so a malformed selection is
    /// rejected before any state changes.
    pub fn validate(&self) -> Result<(), AdapterError> {
        match self {
            ContentSelection::VideoPlatform {
                platform_id,
                media_id,
            } => {
                if platform_id.is_empty() {
                    return Err(AdapterError::Init("empty platform id".into()));
                }
                if media_id.is_empty()
                    || !media_id
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
                {
                    return Err(AdapterError::Init(format!("malformed media id: {media_id}")));
                }
                Ok(())
            }
            ContentSelection::PassiveFrame { target_url } => {
                let ok = (target_url.starts_with("http://")
                    || target_url.starts_with("https://"))
                    && !target_url.chars().any(char::is_whitespace)
                    && target_url.len() > "https://".len();
                if ok {
                    Ok(())
                } else {
                    Err(AdapterError::Init(format!("malformed frame url: {target_url}")))
                }
            }
        }
    }

    /// Whether the clock reconciler may drive this selection. Passive frames
    /// are not script-controllable, so reconciliation is suppressed for them.
    pub fn is_synchronizable(&self) -> bool {
        matches!(self, ContentSelection::VideoPlatform { .. })
    }

    /// Short human label for system notices.
    pub fn describe(&self) -> String {
        match self {
            ContentSelection::VideoPlatform {
                platform_id,
                media_id,
            } => format!("{platform_id} video {media_id}"),
            ContentSelection::PassiveFrame { target_url } => target_url.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// Capability class of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Controllable,
    Passive,
}

/// Notifications originating at the embed, pushed to whoever holds the
/// receiver side (normally the participant's sync driver).
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterNotification {
    Ready { duration_seconds: f64 },
    PlaybackStarted,
    PlaybackPaused,
    Error(String),
}

/// Commands an adapter forwards to its embed host for execution.
#[derive(Debug)]
pub enum PlayerCommand {
    Load {
        platform_id: String,
        media_id: String,
    },
    Play,
    Pause,
    Seek {
        seconds: f64,
    },
    QueryTime {
        reply: oneshot::Sender<f64>,
    },
}

/// Uniform control surface over one embedded content source.
#[async_trait]
pub trait ContentAdapter: Send + Sync {
    fn kind(&self) -> AdapterKind;
    async fn load(&self, selection: &ContentSelection) -> Result<(), AdapterError>;
    async fn play(&self) -> Result<(), AdapterError>;
    async fn pause(&self) -> Result<(), AdapterError>;
    async fn seek(&self, seconds: f64) -> Result<(), AdapterError>;
    async fn query_time(&self) -> Result<f64, AdapterError>;
}

// ---------------------------------------------------------------------------
// Video platform adapter
// ---------------------------------------------------------------------------

/// Adapter over a scriptable third-party embed. Commands travel over a
/// bridge channel to the embed host; every call is bounded by a timeout so
/// a wedged embed surfaces `AdapterError::Timeout` instead of stalling the
/// caller.
pub struct VideoPlatformAdapter {
    bridge: mpsc::Sender<PlayerCommand>,
    call_timeout: Duration,
}

impl VideoPlatformAdapter {
    pub fn new(
        selection: &ContentSelection,
        bridge: mpsc::Sender<PlayerCommand>,
        call_timeout: Duration,
    ) -> Result<Self, AdapterError> {
        selection.validate()?;
        if !matches!(selection, ContentSelection::VideoPlatform { .. }) {
            return Err(AdapterError::Init(
                "passive selection given to video platform adapter".into(),
            ));
        }
        Ok(Self {
            bridge,
            call_timeout,
        })
    }

    async fn send(&self, command: PlayerCommand) -> Result<(), AdapterError> {
        let timeout_ms = self.call_timeout.as_millis() as u64;
        tokio::time::timeout(self.call_timeout, self.bridge.send(command))
            .await
            .map_err(|_| AdapterError::Timeout(timeout_ms))?
            .map_err(|_| AdapterError::Platform("embed bridge closed".into()))
    }
}

#[async_trait]
impl ContentAdapter for VideoPlatformAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Controllable
    }

    async fn load(&self, selection: &ContentSelection) -> Result<(), AdapterError> {
        match selection {
            ContentSelection::VideoPlatform {
                platform_id,
                media_id,
            } => {
                selection.validate()?;
                self.send(PlayerCommand::Load {
                    platform_id: platform_id.clone(),
                    media_id: media_id.clone(),
                })
                .await
            }
            ContentSelection::PassiveFrame { .. } => Err(AdapterError::Init(
                "passive selection given to video platform adapter".into(),
            )),
        }
    }

    async fn play(&self) -> Result<(), AdapterError> {
        self.send(PlayerCommand::Play).await
    }

    async fn pause(&self) -> Result<(), AdapterError> {
        self.send(PlayerCommand::Pause).await
    }

    async fn seek(&self, seconds: f64) -> Result<(), AdapterError> {
        self.send(PlayerCommand::Seek { seconds }).await
    }

    async fn query_time(&self) -> Result<f64, AdapterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(PlayerCommand::QueryTime { reply: reply_tx })
            .await?;
        match tokio::time::timeout(self.call_timeout, reply_rx).await {
            Ok(Ok(seconds)) => Ok(seconds),
            Ok(Err(_)) => Err(AdapterError::Platform("embed dropped time query".into())),
            Err(_) => Err(AdapterError::Timeout(self.call_timeout.as_millis() as u64)),
        }
    }
}

// ---------------------------------------------------------------------------
// Passive frame adapter
// ---------------------------------------------------------------------------

/// Adapter over plain web content in a frame. The content is not
/// script-controllable: playback calls succeed as no-ops and the reported
/// time is pinned to the load timestamp.
pub struct PassiveFrameAdapter {
    loaded_at_seconds: f64,
}

impl PassiveFrameAdapter {
    pub fn new(selection: &ContentSelection) -> Result<Self, AdapterError> {
        selection.validate()?;
        if !matches!(selection, ContentSelection::PassiveFrame { .. }) {
            return Err(AdapterError::Init(
                "video selection given to passive frame adapter".into(),
            ));
        }
        Ok(Self {
            loaded_at_seconds: now_millis() as f64 / 1000.0,
        })
    }
}

#[async_trait]
impl ContentAdapter for PassiveFrameAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Passive
    }

    async fn load(&self, _selection: &ContentSelection) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn play(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn pause(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn seek(&self, _seconds: f64) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn query_time(&self) -> Result<f64, AdapterError> {
        Ok(self.loaded_at_seconds)
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Channel sizing and call bounds for built adapters.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub call_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(3),
            channel_capacity: 32,
        }
    }
}

/// The embed-host side of a controllable adapter: commands to execute and a
/// sender for pushing notifications back.
pub struct EmbedEndpoint {
    pub commands: mpsc::Receiver<PlayerCommand>,
    pub notifications: mpsc::Sender<AdapterNotification>,
}

/// A constructed adapter plus its notification stream. `embed` is `None`
/// for passive frames, which have nothing to drive.
pub struct BuiltAdapter {
    pub adapter: std::sync::Arc<dyn ContentAdapter>,
    pub notifications: mpsc::Receiver<AdapterNotification>,
    pub embed: Option<EmbedEndpoint>,
}

/// Builds adapters for selections. Construction fails on malformed
/// selections, which is how a bad `LoadContent` is rejected.
#[derive(Debug, Clone, Default)]
pub struct AdapterFactory {
    config: AdapterConfig,
}

impl AdapterFactory {
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, selection: &ContentSelection) -> Result<BuiltAdapter, AdapterError> {
        let (notify_tx, notify_rx) = mpsc::channel(self.config.channel_capacity);
        match selection {
            ContentSelection::VideoPlatform { .. } => {
                let (bridge_tx, bridge_rx) = mpsc::channel(self.config.channel_capacity);
                let adapter =
                    VideoPlatformAdapter::new(selection, bridge_tx, self.config.call_timeout)?;
                Ok(BuiltAdapter {
                    adapter: std::sync::Arc::new(adapter),
                    notifications: notify_rx,
                    embed: Some(EmbedEndpoint {
                        commands: bridge_rx,
                        notifications: notify_tx,
                    }),
                })
            }
            ContentSelection::PassiveFrame { .. } => {
                let adapter = PassiveFrameAdapter::new(selection)?;
                // Frames have no load handshake worth waiting on.
                let _ = notify_tx.try_send(AdapterNotification::Ready {
                    duration_seconds: 0.0,
                });
                Ok(BuiltAdapter {
                    adapter: std::sync::Arc::new(adapter),
                    notifications: notify_rx,
                    embed: None,
                })
            }
        }
    }
}
