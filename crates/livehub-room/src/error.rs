//! Error types for the room layer.

/// Errors that can occur when talking to a room actor.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room's command queue is full; the message was dropped.
    #[error("room {0} is busy")]
    Busy(String),

    /// The room has shut down (it emptied or the hub stopped).
    #[error("room {0} is unavailable")]
    Unavailable(String),
}
