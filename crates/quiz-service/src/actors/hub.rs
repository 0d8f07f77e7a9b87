//! `HubActor` - sole owner of room membership.
//!
//! Every room, connection entry and host/participant identity map lives
//! inside this actor. Registration, unregistration, broadcast and targeted
//! sends are all messages handled one at a time by the actor loop, so no
//! two membership mutations can interleave.
//!
//! # Delivery
//!
//! Frames are enqueued with `try_send`. A full or closed outbound queue
//! never blocks the actor: the connection is dropped through the same path
//! as an explicit unregister. Dropping a connection removes the hub's
//! sender, which closes the queue and lets the connection's writer send a
//! close frame and exit.
//!
//! # Departures
//!
//! When the current connection of a participant goes away, the hub spawns
//! [`DepartureHandler::participant_left`] so store cleanup never runs inside
//! the actor loop. A connection replaced by a newer connection of the same
//! user is not a departure.

use super::envelope::ServerEvent;
use super::messages::{
    ConnectionId, ConnectionRegistration, HubMessage, RegisterOutcome, Role, RoleFrames,
    RoomSnapshot,
};
use crate::errors::QuizError;
use crate::models::{QuizId, UserId, UserProfile};
use crate::observability::metrics;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Reacts to a participant leaving a room.
#[async_trait::async_trait]
pub trait DepartureHandler: Send + Sync + 'static {
    async fn participant_left(&self, quiz_code: String, quiz_id: QuizId, user_id: UserId);
}

/// Handle to the `HubActor`.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
}

impl HubHandle {
    /// Attach a connection to the room for its quiz code.
    pub async fn register(
        &self,
        registration: ConnectionRegistration,
    ) -> Result<RegisterOutcome, QuizError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::Register {
                registration,
                respond_to: tx,
            })
            .await
            .map_err(|e| QuizError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| QuizError::Internal(format!("response receive failed: {e}")))
    }

    /// Detach a connection. Safe to call more than once.
    pub async fn unregister(
        &self,
        quiz_code: &str,
        connection_id: ConnectionId,
    ) -> Result<(), QuizError> {
        self.send(HubMessage::Unregister {
            quiz_code: quiz_code.to_string(),
            connection_id,
        })
        .await
    }

    /// Replace the display profile of a connection and re-announce the room.
    pub async fn update_profile(
        &self,
        quiz_code: &str,
        connection_id: ConnectionId,
        profile: UserProfile,
    ) -> Result<(), QuizError> {
        self.send(HubMessage::UpdateProfile {
            quiz_code: quiz_code.to_string(),
            connection_id,
            profile,
        })
        .await
    }

    /// Send the same event to every connection in a room.
    pub async fn broadcast(&self, quiz_code: &str, event: &ServerEvent) -> Result<(), QuizError> {
        let frame = encode(event)?;
        self.broadcast_frames(quiz_code, RoleFrames::uniform(frame))
            .await
    }

    /// Send one event to the host connections and another to participants.
    pub async fn broadcast_by_role(
        &self,
        quiz_code: &str,
        host_event: &ServerEvent,
        participant_event: &ServerEvent,
    ) -> Result<(), QuizError> {
        let frames = RoleFrames {
            host: encode(host_event)?,
            participant: encode(participant_event)?,
        };
        self.broadcast_frames(quiz_code, frames).await
    }

    async fn broadcast_frames(&self, quiz_code: &str, frames: RoleFrames) -> Result<(), QuizError> {
        self.send(HubMessage::Broadcast {
            quiz_code: quiz_code.to_string(),
            frames,
        })
        .await
    }

    /// Send an event to one user's participant connection, if connected.
    pub async fn send_to_user(
        &self,
        quiz_code: &str,
        user_id: UserId,
        event: &ServerEvent,
    ) -> Result<(), QuizError> {
        let frame = encode(event)?;
        self.send(HubMessage::SendToUser {
            quiz_code: quiz_code.to_string(),
            user_id,
            frame,
        })
        .await
    }

    /// Re-send the participant list and count to a room.
    pub async fn announce_participants(&self, quiz_code: &str) -> Result<(), QuizError> {
        self.send(HubMessage::AnnounceParticipants {
            quiz_code: quiz_code.to_string(),
        })
        .await
    }

    /// Current membership of a room, `None` if it has no connections.
    pub async fn snapshot(&self, quiz_code: &str) -> Result<Option<RoomSnapshot>, QuizError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::Snapshot {
            quiz_code: quiz_code.to_string(),
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| QuizError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop the hub. Every outbound queue is closed.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for connection pumps, cancelled with the hub.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    async fn send(&self, message: HubMessage) -> Result<(), QuizError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| QuizError::Internal(format!("channel send failed: {e}")))
    }
}

fn encode(event: &ServerEvent) -> Result<Arc<str>, QuizError> {
    event
        .to_frame()
        .map_err(|e| QuizError::Internal(e.to_string()))
}

/// A registered connection.
struct ConnectionEntry {
    user: UserProfile,
    role: Role,
    outbound: mpsc::Sender<Arc<str>>,
}

/// Connections attached to one quiz code.
struct Room {
    quiz_id: QuizId,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Current connection per host user.
    hosts: HashMap<UserId, ConnectionId>,
    /// Current connection per participant user.
    participants: HashMap<UserId, ConnectionId>,
}

impl Room {
    fn new(quiz_id: QuizId) -> Self {
        Self {
            quiz_id,
            connections: HashMap::new(),
            hosts: HashMap::new(),
            participants: HashMap::new(),
        }
    }

    fn participant_count(&self) -> usize {
        self.participants.len()
    }

    fn identity_map(&mut self, role: Role) -> &mut HashMap<UserId, ConnectionId> {
        match role {
            Role::Host => &mut self.hosts,
            Role::Participant => &mut self.participants,
        }
    }

    fn participant_profiles(&self) -> Vec<UserProfile> {
        let mut profiles: Vec<UserProfile> = self
            .participants
            .values()
            .filter_map(|id| self.connections.get(id))
            .map(|entry| entry.user.clone())
            .collect();
        profiles.sort_by_key(|p| p.user_id);
        profiles
    }

    fn host_profile(&self) -> Option<UserProfile> {
        self.hosts
            .values()
            .filter_map(|id| self.connections.get(id))
            .map(|entry| entry.user.clone())
            .min_by_key(|p| p.user_id)
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            quiz_id: self.quiz_id,
            participant_count: self.participant_count(),
            connection_count: self.connections.len(),
            host: self.host_profile(),
            participants: self.participant_profiles(),
        }
    }
}

/// Why a connection is being detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetachReason {
    Unregistered,
    Backpressure,
}

/// The `HubActor` implementation.
pub struct HubActor {
    receiver: mpsc::Receiver<HubMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<String, Room>,
    departures: Arc<dyn DepartureHandler>,
}

impl HubActor {
    /// Spawn the hub actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        departures: Arc<dyn DepartureHandler>,
        mailbox_capacity: usize,
        cancel_token: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(mailbox_capacity.max(1));

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            departures,
        };

        let task_handle = tokio::spawn(actor.run());

        (
            HubHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(skip_all, name = "quiz.actor.hub")]
    async fn run(mut self) {
        info!(target: "quiz.actor.hub", "HubActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "quiz.actor.hub", "HubActor received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!(target: "quiz.actor.hub", "HubActor channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        let connections: usize = self.rooms.values().map(|r| r.connections.len()).sum();
        // Dropping the rooms drops every outbound sender.
        self.rooms.clear();
        metrics::set_active_rooms(0);

        info!(
            target: "quiz.actor.hub",
            closed_connections = connections,
            "HubActor stopped"
        );
    }

    fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Register {
                registration,
                respond_to,
            } => {
                let outcome = self.handle_register(registration);
                let _ = respond_to.send(outcome);
            }

            HubMessage::Unregister {
                quiz_code,
                connection_id,
            } => {
                self.drop_connections(&quiz_code, vec![connection_id], DetachReason::Unregistered);
            }

            HubMessage::UpdateProfile {
                quiz_code,
                connection_id,
                profile,
            } => {
                self.handle_update_profile(&quiz_code, connection_id, profile);
            }

            HubMessage::Broadcast { quiz_code, frames } => {
                let failed = self.deliver_to_room(&quiz_code, &frames);
                self.drop_connections(&quiz_code, failed, DetachReason::Backpressure);
            }

            HubMessage::SendToUser {
                quiz_code,
                user_id,
                frame,
            } => {
                let failed = self.deliver_to_user(&quiz_code, user_id, frame);
                self.drop_connections(&quiz_code, failed, DetachReason::Backpressure);
            }

            HubMessage::AnnounceParticipants { quiz_code } => {
                let failed = self.announce(&quiz_code);
                self.drop_connections(&quiz_code, failed, DetachReason::Backpressure);
            }

            HubMessage::Snapshot {
                quiz_code,
                respond_to,
            } => {
                let snapshot = self.rooms.get(&quiz_code).map(Room::snapshot);
                let _ = respond_to.send(snapshot);
            }
        }
    }

    fn handle_register(&mut self, registration: ConnectionRegistration) -> RegisterOutcome {
        let ConnectionRegistration {
            connection_id,
            quiz_code,
            quiz_id,
            user,
            role,
            outbound,
        } = registration;

        let room = self
            .rooms
            .entry(quiz_code.clone())
            .or_insert_with(|| Room::new(quiz_id));

        let user_id = user.user_id;
        let superseded = room.identity_map(role).insert(user_id, connection_id);
        if let Some(old_id) = superseded {
            // The stale connection loses its sender and closes on its own.
            room.connections.remove(&old_id);
            metrics::record_connection_closed();
            info!(
                target: "quiz.actor.hub",
                quiz_code = %quiz_code,
                user_id = user_id,
                connection_id = %old_id,
                "Connection superseded by a newer connection"
            );
        }

        room.connections.insert(
            connection_id,
            ConnectionEntry {
                user,
                role,
                outbound,
            },
        );
        metrics::record_connection_opened(role.as_str());

        info!(
            target: "quiz.actor.hub",
            quiz_code = %quiz_code,
            user_id = user_id,
            connection_id = %connection_id,
            role = role.as_str(),
            participants = room.participant_count(),
            "Connection registered"
        );

        metrics::set_active_rooms(self.rooms.len());

        let failed = self.announce(&quiz_code);
        self.drop_connections(&quiz_code, failed, DetachReason::Backpressure);

        let participant_count = self
            .rooms
            .get(&quiz_code)
            .map_or(0, Room::participant_count);

        RegisterOutcome {
            participant_count,
            superseded,
        }
    }

    fn handle_update_profile(
        &mut self,
        quiz_code: &str,
        connection_id: ConnectionId,
        profile: UserProfile,
    ) {
        let Some(entry) = self
            .rooms
            .get_mut(quiz_code)
            .and_then(|room| room.connections.get_mut(&connection_id))
        else {
            debug!(
                target: "quiz.actor.hub",
                quiz_code = %quiz_code,
                connection_id = %connection_id,
                "Profile update for unknown connection ignored"
            );
            return;
        };

        entry.user.username = profile.username;
        entry.user.email = profile.email;

        let failed = self.announce(quiz_code);
        self.drop_connections(quiz_code, failed, DetachReason::Backpressure);
    }

    /// Enqueue frames on every connection in a room. Returns connections
    /// whose queue rejected the frame.
    fn deliver_to_room(&self, quiz_code: &str, frames: &RoleFrames) -> Vec<ConnectionId> {
        let Some(room) = self.rooms.get(quiz_code) else {
            debug!(target: "quiz.actor.hub", quiz_code = %quiz_code, "Broadcast to absent room ignored");
            return Vec::new();
        };

        room.connections
            .iter()
            .filter(|(id, entry)| {
                !try_enqueue(quiz_code, **id, entry, Arc::clone(frames.for_role(entry.role)))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    fn deliver_to_user(&self, quiz_code: &str, user_id: UserId, frame: Arc<str>) -> Vec<ConnectionId> {
        let target = self.rooms.get(quiz_code).and_then(|room| {
            room.participants
                .get(&user_id)
                .and_then(|id| room.connections.get(id).map(|entry| (*id, entry)))
        });

        let Some((connection_id, entry)) = target else {
            debug!(
                target: "quiz.actor.hub",
                quiz_code = %quiz_code,
                user_id = user_id,
                "No participant connection for targeted send"
            );
            return Vec::new();
        };

        if try_enqueue(quiz_code, connection_id, entry, frame) {
            Vec::new()
        } else {
            vec![connection_id]
        }
    }

    /// Send `participant_list` then `participant_update` to a room.
    fn announce(&self, quiz_code: &str) -> Vec<ConnectionId> {
        let Some(room) = self.rooms.get(quiz_code) else {
            return Vec::new();
        };

        let participants = room.participant_profiles();
        let count = participants.len();
        let list = ServerEvent::ParticipantList {
            participants,
            count,
            host: room.host_profile(),
        };
        let update = ServerEvent::ParticipantUpdate { count };

        let mut failed = Vec::new();
        for event in [list, update] {
            match event.to_frame() {
                Ok(frame) => {
                    for id in self.deliver_to_room(quiz_code, &RoleFrames::uniform(frame)) {
                        if !failed.contains(&id) {
                            failed.push(id);
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "quiz.actor.hub", quiz_code = %quiz_code, error = %e, "Failed to encode announcement");
                }
            }
        }
        failed
    }

    /// Remove connections and re-announce until no further delivery fails.
    ///
    /// Announcing can itself hit a full queue; those connections are added
    /// to the worklist instead of recursing.
    fn drop_connections(
        &mut self,
        quiz_code: &str,
        mut pending: Vec<ConnectionId>,
        mut reason: DetachReason,
    ) {
        while !pending.is_empty() {
            let mut membership_changed = false;
            for connection_id in pending.drain(..) {
                membership_changed |= self.detach(quiz_code, connection_id, reason);
            }

            if !membership_changed {
                break;
            }
            pending = self.announce(quiz_code);
            reason = DetachReason::Backpressure;
        }

        if self
            .rooms
            .get(quiz_code)
            .is_some_and(|room| room.connections.is_empty())
        {
            self.rooms.remove(quiz_code);
            metrics::set_active_rooms(self.rooms.len());
            debug!(target: "quiz.actor.hub", quiz_code = %quiz_code, "Room closed");
        }
    }

    /// Remove one connection. Returns false if it was not registered.
    fn detach(&mut self, quiz_code: &str, connection_id: ConnectionId, reason: DetachReason) -> bool {
        let Some(room) = self.rooms.get_mut(quiz_code) else {
            return false;
        };
        let Some(entry) = room.connections.remove(&connection_id) else {
            return false;
        };

        let user_id = entry.user.user_id;
        let identity = room.identity_map(entry.role);
        let was_current = identity.get(&user_id) == Some(&connection_id);
        if was_current {
            identity.remove(&user_id);
        }

        metrics::record_connection_closed();
        if reason == DetachReason::Backpressure {
            metrics::record_backpressure_drop();
            warn!(
                target: "quiz.actor.hub",
                quiz_code = %quiz_code,
                user_id = user_id,
                connection_id = %connection_id,
                "Dropping connection: outbound queue full or closed"
            );
        } else {
            info!(
                target: "quiz.actor.hub",
                quiz_code = %quiz_code,
                user_id = user_id,
                connection_id = %connection_id,
                "Connection unregistered"
            );
        }

        if was_current && entry.role == Role::Participant {
            let departures = Arc::clone(&self.departures);
            let quiz_code = quiz_code.to_string();
            let quiz_id = room.quiz_id;
            tokio::spawn(async move {
                departures
                    .participant_left(quiz_code, quiz_id, user_id)
                    .await;
            });
        }

        // `entry` (and its sender) is dropped here, closing the queue.
        true
    }
}

/// Non-blocking enqueue. Returns false if the connection must be dropped.
fn try_enqueue(
    quiz_code: &str,
    connection_id: ConnectionId,
    entry: &ConnectionEntry,
    frame: Arc<str>,
) -> bool {
    match entry.outbound.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(
                target: "quiz.actor.hub",
                quiz_code = %quiz_code,
                connection_id = %connection_id,
                "Outbound queue full"
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
