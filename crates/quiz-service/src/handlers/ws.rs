//! WebSocket ingress and inbound message handling.
//!
//! `GET /ws/{code}` upgrades an authenticated request, registers the
//! connection with the hub and runs its pump until it closes.

use crate::actors::{
    run_connection, ClientMessage, ConnectionContext, ConnectionRegistration, HubHandle,
    InboundHandler, Role, ServerEvent,
};
use crate::auth::Claims;
use crate::errors::QuizError;
use crate::models::{Quiz, UserProfile};
use crate::routes::AppState;
use crate::session::SessionSequencer;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    Extension,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Handler for GET /ws/{code}
///
/// # Response
///
/// - 101 Switching Protocols: connection upgraded
/// - 401 Unauthorized: missing or invalid token
/// - 404 Not Found: unknown session code
#[instrument(skip_all, name = "quiz.handlers.ws", fields(quiz_code = %code))]
pub async fn quiz_socket(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(code): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, QuizError> {
    let quiz = state.catalog.lookup(&code).await?;
    let role = Role::for_user(quiz.creator_id, claims.user_id);
    let max_message_bytes = state.config.transport.max_message_bytes;

    debug!(target: "quiz.handlers", quiz_code = %quiz.code, role = role.as_str(), "Upgrading connection");

    Ok(ws
        .max_message_size(max_message_bytes)
        .on_upgrade(move |socket| serve_socket(state, socket, quiz, claims, role)))
}

async fn serve_socket(
    state: Arc<AppState>,
    socket: WebSocket,
    quiz: Quiz,
    claims: Claims,
    role: Role,
) {
    let settings = state.config.transport;
    let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_queue_capacity);

    let ctx = ConnectionContext {
        connection_id: Uuid::new_v4(),
        quiz_code: quiz.code.clone(),
        quiz_id: quiz.id,
        user_id: claims.user_id,
        username: claims.username.clone(),
        role,
    };

    let registration = ConnectionRegistration {
        connection_id: ctx.connection_id,
        quiz_code: ctx.quiz_code.clone(),
        quiz_id: quiz.id,
        user: claims.profile(),
        role,
        outbound: outbound_tx,
    };

    match state.hub.register(registration).await {
        Ok(outcome) => {
            info!(
                target: "quiz.handlers",
                quiz_code = %ctx.quiz_code,
                connection_id = %ctx.connection_id,
                participants = outcome.participant_count,
                "WebSocket connected"
            );
        }
        Err(e) => {
            warn!(target: "quiz.handlers", quiz_code = %ctx.quiz_code, error = %e, "Hub registration failed");
            return;
        }
    }

    state.sequencer.resume(&quiz, claims.user_id).await;

    let handler: Arc<dyn InboundHandler> = Arc::new(WsMessageHandler {
        hub: state.hub.clone(),
        sequencer: Arc::clone(&state.sequencer),
    });

    let (sink, stream) = socket.split();
    run_connection(
        sink,
        stream,
        outbound_rx,
        ctx,
        handler,
        state.hub.clone(),
        settings,
    )
    .await;
}

/// Applies inbound client messages to the hub and sequencer.
pub struct WsMessageHandler {
    pub hub: HubHandle,
    pub sequencer: Arc<SessionSequencer>,
}

#[async_trait::async_trait]
impl InboundHandler for WsMessageHandler {
    async fn handle(&self, ctx: &ConnectionContext, message: ClientMessage) {
        let kind = message.kind();
        let result = match message {
            ClientMessage::JoinQuiz { user } => self.join(ctx, user).await,

            ClientMessage::StartQuiz => {
                if ctx.role != Role::Host {
                    debug!(target: "quiz.handlers", user_id = ctx.user_id, "Ignoring start_quiz from participant");
                    return;
                }
                self.sequencer
                    .start(&ctx.quiz_code, ctx.user_id)
                    .await
                    .map(|_| ())
            }

            ClientMessage::AnswerSubmitted {
                question_id,
                user_id,
                ..
            } => {
                if user_id.is_some_and(|id| id != ctx.user_id) {
                    debug!(target: "quiz.handlers", user_id = ctx.user_id, "answer_submitted carries a different userId");
                }
                self.hub
                    .broadcast(
                        &ctx.quiz_code,
                        &ServerEvent::AnswerUpdate {
                            user_id: ctx.user_id,
                            question_id,
                        },
                    )
                    .await
            }

            ClientMessage::NextQuestion {
                quiz_code,
                current_index,
            } => {
                if ctx.role != Role::Host || quiz_code != ctx.quiz_code {
                    debug!(target: "quiz.handlers", user_id = ctx.user_id, "Ignoring next_question");
                    return;
                }
                self.sequencer
                    .advance(&ctx.quiz_code, ctx.user_id, current_index)
                    .await
            }
        };

        if let Err(e) = result {
            warn!(
                target: "quiz.handlers",
                quiz_code = %ctx.quiz_code,
                user_id = ctx.user_id,
                kind = kind,
                error = %e,
                "Inbound message failed"
            );
        }
    }
}

impl WsMessageHandler {
    /// Refresh the display profile. The identity stays the authenticated one.
    async fn join(&self, ctx: &ConnectionContext, user: UserProfile) -> Result<(), QuizError> {
        if user.user_id != ctx.user_id {
            warn!(
                target: "quiz.handlers",
                quiz_code = %ctx.quiz_code,
                user_id = ctx.user_id,
                "join_quiz identity does not match the connection, ignoring"
            );
            return Ok(());
        }

        let username = if user.username.trim().is_empty() {
            ctx.username.clone()
        } else {
            user.username
        };

        self.hub
            .update_profile(
                &ctx.quiz_code,
                ctx.connection_id,
                UserProfile {
                    user_id: ctx.user_id,
                    username,
                    email: user.email,
                },
            )
            .await
    }
}
