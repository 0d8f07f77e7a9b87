//! Message types for the hub actor.

use crate::models::{QuizId, UserId, UserProfile};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Identifies one WebSocket connection for its whole lifetime.
pub type ConnectionId = Uuid;

/// Role of a connection, fixed when it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Participant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Participant => "participant",
        }
    }

    pub fn for_user(creator_id: UserId, user_id: UserId) -> Self {
        if creator_id == user_id {
            Role::Host
        } else {
            Role::Participant
        }
    }
}

/// Everything the hub needs to attach a connection to a room.
#[derive(Debug)]
pub struct ConnectionRegistration {
    pub connection_id: ConnectionId,
    pub quiz_code: String,
    pub quiz_id: QuizId,
    pub user: UserProfile,
    pub role: Role,
    /// Bounded outbound queue. The hub holds the only sender, so dropping
    /// the registration closes the queue.
    pub outbound: mpsc::Sender<Arc<str>>,
}

/// One serialized frame per role. Most broadcasts use the same frame for both.
#[derive(Debug, Clone)]
pub struct RoleFrames {
    pub host: Arc<str>,
    pub participant: Arc<str>,
}

impl RoleFrames {
    pub fn uniform(frame: Arc<str>) -> Self {
        Self {
            host: Arc::clone(&frame),
            participant: frame,
        }
    }

    pub fn for_role(&self, role: Role) -> &Arc<str> {
        match role {
            Role::Host => &self.host,
            Role::Participant => &self.participant,
        }
    }
}

/// Result of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOutcome {
    /// Participant count after registration (host excluded).
    pub participant_count: usize,
    /// Earlier connection of the same user that this one replaced.
    pub superseded: Option<ConnectionId>,
}

/// Point-in-time view of one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub quiz_id: QuizId,
    pub participant_count: usize,
    pub connection_count: usize,
    pub host: Option<UserProfile>,
    /// Sorted by user id.
    pub participants: Vec<UserProfile>,
}

/// Messages sent to the hub actor.
#[derive(Debug)]
pub enum HubMessage {
    Register {
        registration: ConnectionRegistration,
        respond_to: oneshot::Sender<RegisterOutcome>,
    },

    /// Remove a connection. Unknown connections are ignored.
    Unregister {
        quiz_code: String,
        connection_id: ConnectionId,
    },

    UpdateProfile {
        quiz_code: String,
        connection_id: ConnectionId,
        profile: UserProfile,
    },

    Broadcast {
        quiz_code: String,
        frames: RoleFrames,
    },

    /// Deliver to one user's current participant connection.
    SendToUser {
        quiz_code: String,
        user_id: UserId,
        frame: Arc<str>,
    },

    AnnounceParticipants {
        quiz_code: String,
    },

    Snapshot {
        quiz_code: String,
        respond_to: oneshot::Sender<Option<RoomSnapshot>>,
    },
}
