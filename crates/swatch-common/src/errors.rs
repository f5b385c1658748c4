//! Error taxonomy shared by the sync engine and the gateway.
//!
//! Adapter errors belong to a participant's local playback bridge and are
//! recovered locally; command errors are returned synchronously to the
//! issuing participant and never mutate room state.

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("adapter init error: {0}")]
    Init(String),

    #[error("adapter timed out after {0} ms")]
    Timeout(u64),

    #[error("platform error: {0}")]
    Platform(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("duplicate participant: {0}")]
    DuplicateParticipant(String),

    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("room closed: {0}")]
    RoomClosed(String),
}

impl From<AdapterError> for CommandError {
    fn from(err: AdapterError) -> Self {
        CommandError::InvalidSelection(err.to_string())
    }
}
