//! MCU bridge error types.
//!
//! Structural failures (identity conflicts, not-found, exhaustion) are returned
//! to the immediate caller as values. Media-path problems never surface here;
//! they degrade to silence inside the audio pipeline.

use thiserror::Error;

/// Bridge error type.
///
/// Maps to administrative status codes:
/// - `ConferenceNotFound`, `MemberNotFound`: `NOT_FOUND` (4)
/// - `DuplicateMemberName`, `DuplicateMember`: `CONFLICT` (5)
/// - `InvariantViolation`, `Internal`: `INTERNAL_ERROR` (6)
/// - `ConferenceFull`, `BridgeFull`, `ConferenceStopping`, `MemberClosing`,
///   `RecorderSpaceExhausted`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Conference not found (by room, numeric id or GUID).
    #[error("Conference not found: {0}")]
    ConferenceNotFound(String),

    /// Member not found in the conference.
    #[error("Member not found: {0}")]
    MemberNotFound(String),

    /// A member with the same normalized name is already in the conference.
    #[error("Duplicate member name: {0}")]
    DuplicateMemberName(String),

    /// The member (same id) is already in the conference.
    #[error("Member already present: {0}")]
    DuplicateMember(String),

    /// Conference is at its configured member maximum.
    #[error("Conference at capacity: {0}")]
    ConferenceFull(String),

    /// Bridge is at its configured conference maximum.
    #[error("Bridge at capacity")]
    BridgeFull,

    /// Conference is being torn down and refuses new members.
    #[error("Conference is stopping: {0}")]
    ConferenceStopping(String),

    /// Member lock is already closing.
    #[error("Member is closing: {0}")]
    MemberClosing(String),

    /// Recorder reported no free space; recording was not started.
    #[error("Recorder space exhausted")]
    RecorderSpaceExhausted,

    /// A locking invariant was violated (indicates a bug, not a runtime condition).
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Returns the administrative status code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            BridgeError::ConferenceNotFound(_) | BridgeError::MemberNotFound(_) => 4, // NOT_FOUND
            BridgeError::DuplicateMemberName(_) | BridgeError::DuplicateMember(_) => 5, // CONFLICT
            BridgeError::InvariantViolation(_) | BridgeError::Internal(_) => 6, // INTERNAL_ERROR
            BridgeError::ConferenceFull(_)
            | BridgeError::BridgeFull
            | BridgeError::ConferenceStopping(_)
            | BridgeError::MemberClosing(_)
            | BridgeError::RecorderSpaceExhausted => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            BridgeError::InvariantViolation(_) | BridgeError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            BridgeError::ConferenceNotFound(_) => "Conference not found".to_string(),
            BridgeError::MemberNotFound(_) => "Member not found".to_string(),
            BridgeError::DuplicateMemberName(_) => {
                "A member with this name is already in the conference".to_string()
            }
            BridgeError::DuplicateMember(_) => "Member is already in the conference".to_string(),
            BridgeError::ConferenceFull(_) => "Conference is at capacity".to_string(),
            BridgeError::BridgeFull => "Server is at capacity, please try again".to_string(),
            BridgeError::ConferenceStopping(_) => "Conference is closing".to_string(),
            BridgeError::MemberClosing(_) => "Member is disconnecting".to_string(),
            BridgeError::RecorderSpaceExhausted => "Recording space exhausted".to_string(),
        }
    }

    /// Metric label for add-member rejections.
    pub(crate) fn rejection_reason(&self) -> &'static str {
        match self {
            BridgeError::DuplicateMemberName(_) => "duplicate_name",
            BridgeError::DuplicateMember(_) => "duplicate_member",
            BridgeError::ConferenceFull(_) => "capacity",
            BridgeError::ConferenceStopping(_) => "stopping",
            BridgeError::MemberClosing(_) => "closing",
            BridgeError::InvariantViolation(_) => "invariant",
            _ => "other",
        }
    }
}
