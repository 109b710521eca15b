//! Session identity and operating mode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operating mode for a voice session.
///
/// The mode selects per-mode generation defaults and is reported to the
/// credential endpoint so the backend can apply the matching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Staff-facing drive-through / counter terminal.
    Employee,
    /// Customer-facing self-service kiosk.
    Customer,
}

impl SessionMode {
    /// Returns the wire label for this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Customer => "customer",
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One end-to-end voice interaction.
///
/// A `Session` is owned by exactly one transport connection and is
/// destroyed on disconnect. There is never more than one connection,
/// one microphone track, or one in-flight model response per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session.
    pub id: Uuid,
    /// The restaurant this session orders against.
    pub restaurant_id: String,
    /// Operating mode.
    pub mode: SessionMode,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Expiry of the negotiation credential, in milliseconds since the
    /// Unix epoch. Credentials are single-use; a session cannot be
    /// renegotiated with a credential past this instant.
    pub credential_expires_at: u64,
}

impl Session {
    /// Creates a new session for a restaurant in the given mode.
    pub fn new(restaurant_id: impl Into<String>, mode: SessionMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            restaurant_id: restaurant_id.into(),
            mode,
            created_at: Utc::now(),
            credential_expires_at: 0,
        }
    }

    /// Returns true if the stored credential expiry has passed.
    pub fn credential_expired(&self) -> bool {
        let now = Utc::now().timestamp_millis();
        now >= 0 && self.credential_expires_at <= now as u64
    }
}
