//! The room engine: one task owning every room and connection, fed by a single command queue.
//!
//! Commands are handled one at a time and each handler runs to completion without awaiting, so
//! no two operations on a room ever interleave. Timers and reconnect grace periods only post
//! commands back into the same queue.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    dto::{
        room::{
            ChatMessageSummary, ParticipantSummary, RoomStateSummary, VoteSummary,
            VotingStatsSummary, stories_summary,
        },
        validation::validate_display_name,
        ws::{ClientMessage, JOIN_FAILED, KICKED, ROOM_NOT_FOUND, ServerMessage},
    },
    state::{
        export::{ExportRow, export_rows},
        models::{
            ConnectionStatus, ParticipantId, RevealOutcome, Room, RoomId, RoomSpec,
            StorySelection,
        },
        registry::{RegistryError, RoomRegistry},
        room::RoomAggregate,
        session::{ConnectionId, Outbox, SessionTable},
        timer::{TickOutcome, spawn_ticker},
    },
};

/// Inputs of the engine.
#[derive(Debug)]
pub enum Command {
    /// A transport connection opened.
    Connect {
        connection_id: ConnectionId,
        outbox: Outbox,
    },
    /// A parsed frame arrived from a connection.
    Inbound {
        connection_id: ConnectionId,
        message: ClientMessage,
    },
    /// A transport connection closed.
    Disconnect { connection_id: ConnectionId },
    /// The reconnect window of a disconnected participant elapsed.
    GraceExpired {
        room_id: RoomId,
        participant_id: ParticipantId,
        token: u64,
    },
    /// One second elapsed for a room countdown.
    TimerTick { room_id: RoomId, generation: u64 },
    /// Register a room.
    CreateRoom {
        spec: RoomSpec,
        reply: oneshot::Sender<Result<Room, RegistryError>>,
    },
    /// Fetch a room description.
    GetRoom {
        room_id: RoomId,
        reply: oneshot::Sender<Option<Room>>,
    },
    /// Fetch the data needed to export a room backlog.
    ExportRoom {
        room_id: RoomId,
        reply: oneshot::Sender<Option<RoomExport>>,
    },
    /// Fetch engine counters.
    Stats { reply: oneshot::Sender<EngineStats> },
}

/// Backlog of a room at export time.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomExport {
    /// Room display name.
    pub room_name: String,
    /// Stories in display order.
    pub rows: Vec<ExportRow>,
}

/// Engine counters reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Live rooms.
    pub rooms: usize,
    /// Open transport connections.
    pub connections: usize,
}

/// Single-writer dispatcher owning the room registry and session table.
pub struct Dispatcher {
    config: Arc<AppConfig>,
    inbox: mpsc::UnboundedReceiver<Command>,
    /// Weak so that scheduled work never keeps the engine alive on its own.
    loopback: mpsc::WeakUnboundedSender<Command>,
    registry: RoomRegistry,
    sessions: SessionTable,
    /// Latest grace token per disconnected participant.
    pending_removals: HashMap<(RoomId, ParticipantId), u64>,
    next_token: u64,
}

impl Dispatcher {
    /// Build a dispatcher and the sender feeding it.
    pub fn new(config: Arc<AppConfig>) -> (Self, mpsc::UnboundedSender<Command>) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let dispatcher = Self {
            registry: RoomRegistry::new(config.chat_history_limit),
            config,
            inbox,
            loopback: tx.downgrade(),
            sessions: SessionTable::new(),
            pending_removals: HashMap::new(),
            next_token: 0,
        };
        (dispatcher, tx)
    }

    /// Process commands until every sender is gone.
    pub async fn run(mut self) {
        info!("room engine started");
        while let Some(command) = self.inbox.recv().await {
            self.handle(command);
        }
        info!("room engine stopped");
    }

    /// Apply one command.
    pub fn handle(&mut self, command: Command) {
        match command {
            Command::Connect {
                connection_id,
                outbox,
            } => {
                debug!(connection_id = %connection_id, "connection registered");
                self.sessions.connect(connection_id, outbox);
            }
            Command::Inbound {
                connection_id,
                message,
            } => self.handle_inbound(connection_id, message),
            Command::Disconnect { connection_id } => self.handle_disconnect(connection_id),
            Command::GraceExpired {
                room_id,
                participant_id,
                token,
            } => self.handle_grace_expired(room_id, participant_id, token),
            Command::TimerTick {
                room_id,
                generation,
            } => self.handle_timer_tick(&room_id, generation),
            Command::CreateRoom { spec, reply } => {
                let _ = reply.send(self.registry.create(spec));
            }
            Command::GetRoom { room_id, reply } => {
                let room = self.registry.get(&room_id).map(|room| room.room().clone());
                let _ = reply.send(room);
            }
            Command::ExportRoom { room_id, reply } => {
                let export = self.registry.get(&room_id).map(|room| RoomExport {
                    room_name: room.room().name.clone(),
                    rows: export_rows(room.stories()),
                });
                let _ = reply.send(export);
            }
            Command::Stats { reply } => {
                let _ = reply.send(EngineStats {
                    rooms: self.registry.len(),
                    connections: self.sessions.len(),
                });
            }
        }
    }

    fn handle_inbound(&mut self, connection_id: ConnectionId, message: ClientMessage) {
        let message = match message {
            ClientMessage::Join {
                room_id,
                participant_id,
                name,
                is_spectator,
            } => {
                self.handle_join(connection_id, room_id, participant_id, name, is_spectator);
                return;
            }
            ClientMessage::Unknown => {
                warn!(connection_id = %connection_id, "ignoring message with unknown type");
                return;
            }
            other => other,
        };

        let Some(binding) = self.sessions.binding(connection_id).cloned() else {
            debug!(
                connection_id = %connection_id,
                kind = message.kind(),
                "dropping message from connection that has not joined"
            );
            return;
        };
        let room_id = binding.room_id;
        let actor = binding.participant_id;
        let Some(room) = self.registry.get_mut(&room_id) else {
            debug!(room_id = %room_id, "dropping message for a room that no longer exists");
            return;
        };

        if requires_moderator(&message) && self.config.enforce_moderator && !room.is_moderator(&actor)
        {
            debug!(
                room_id = %room_id,
                participant_id = %actor,
                kind = message.kind(),
                "dropping moderator action from non-moderator"
            );
            return;
        }

        let sessions = &self.sessions;
        let sync_limit = self.config.sync_chat_limit;
        match message {
            ClientMessage::Vote { story_id, value } => {
                if !room.submit_vote(&actor, &story_id, value) {
                    debug!(room_id = %room_id, participant_id = %actor, "vote rejected");
                    return;
                }
                sessions.broadcast(
                    &room_id,
                    &ServerMessage::VoteReceived {
                        participant_id: actor.clone(),
                    },
                );
                if room.room().settings.auto_reveal && room.all_voted() {
                    if let Some(outcome) = room.reveal() {
                        info!(room_id = %room_id, "all voters done, revealing automatically");
                        sessions.broadcast(&room_id, &revealed_message(&outcome));
                    }
                }
            }
            ClientMessage::ClearVote => {
                if room.clear_vote(&actor) {
                    sessions.broadcast(
                        &room_id,
                        &ServerMessage::VoteCleared {
                            participant_id: actor,
                        },
                    );
                }
            }
            ClientMessage::Reveal => match room.reveal() {
                Some(outcome) => sessions.broadcast(&room_id, &revealed_message(&outcome)),
                None => debug!(room_id = %room_id, "reveal without an active round"),
            },
            ClientMessage::ResetVotes => {
                if room.reset_votes() {
                    sessions.broadcast(&room_id, &ServerMessage::VotesCleared);
                }
            }
            ClientMessage::NextStory { story_id } => {
                let Some(selection) = room.set_current_story(story_id.as_deref()) else {
                    debug!(room_id = %room_id, story_id = ?story_id, "unknown story selected");
                    return;
                };
                sessions.broadcast(&room_id, &ServerMessage::StoryChanged { story_id });
                if let StorySelection::Restored(outcome) = selection {
                    sessions.broadcast(&room_id, &revealed_message(&outcome));
                }
                sessions.broadcast(&room_id, &sync_message(room, sync_limit));
            }
            ClientMessage::AddStory { story } => {
                if story.title.trim().is_empty() {
                    debug!(room_id = %room_id, "story without title dropped");
                    return;
                }
                room.add_story(story.into());
                broadcast_stories(sessions, &room_id, room);
            }
            ClientMessage::UpdateStory { story_id, updates } => {
                if room.update_story(&story_id, updates.into()).is_some() {
                    broadcast_stories(sessions, &room_id, room);
                }
            }
            ClientMessage::DeleteStory { story_id } => {
                let was_current = room.current_story_id() == Some(story_id.as_str());
                if room.delete_story(&story_id) {
                    broadcast_stories(sessions, &room_id, room);
                    if was_current {
                        sessions.broadcast(&room_id, &ServerMessage::StoryChanged { story_id: None });
                    }
                }
            }
            ClientMessage::ReorderStories { story_ids } => {
                let had_current = room.current_story_id().is_some();
                let dropped = room.reorder_stories(&story_ids);
                if dropped > 0 {
                    warn!(
                        room_id = %room_id,
                        dropped,
                        "story order was not a permutation; missing stories were removed"
                    );
                }
                broadcast_stories(sessions, &room_id, room);
                if had_current && room.current_story_id().is_none() {
                    sessions.broadcast(&room_id, &ServerMessage::StoryChanged { story_id: None });
                }
            }
            ClientMessage::SetFinalEstimate { story_id, value } => {
                if room.set_final_estimate(&story_id, value) {
                    broadcast_stories(sessions, &room_id, room);
                }
            }
            ClientMessage::Chat { content } => {
                if content.trim().is_empty() {
                    return;
                }
                if let Some(message) = room.add_chat(&actor, &content) {
                    sessions.broadcast(
                        &room_id,
                        &ServerMessage::ChatMessage {
                            message: ChatMessageSummary::from(&message),
                        },
                    );
                }
            }
            ClientMessage::StartTimer => {
                let loopback = self.loopback.clone();
                let timer_room = room_id.clone();
                let ends_at = room.start_timer(move |generation| {
                    spawn_ticker(move || match loopback.upgrade() {
                        Some(tx) => tx
                            .send(Command::TimerTick {
                                room_id: timer_room.clone(),
                                generation,
                            })
                            .is_ok(),
                        None => false,
                    })
                });
                sessions.broadcast(
                    &room_id,
                    &ServerMessage::TimerStarted {
                        ends_at: crate::dto::format_system_time(ends_at),
                    },
                );
            }
            ClientMessage::PauseTimer => {
                if let Some(remaining) = room.pause_timer() {
                    sessions.broadcast(&room_id, &ServerMessage::TimerPaused { remaining });
                }
            }
            ClientMessage::ResetTimer => {
                room.reset_timer();
                sessions.broadcast(&room_id, &ServerMessage::TimerReset);
            }
            ClientMessage::UpdateSettings { settings } => match settings.checked() {
                Ok(update) => {
                    let settings = room.update_settings(update);
                    sessions.broadcast(&room_id, &ServerMessage::SettingsUpdated { settings });
                }
                Err(err) => {
                    debug!(room_id = %room_id, error = %err, "invalid settings update dropped");
                }
            },
            ClientMessage::KickParticipant { participant_id } => {
                self.kick(&room_id, &actor, &participant_id);
            }
            ClientMessage::PromoteModerator { participant_id } => {
                if room.promote_moderator(&participant_id) {
                    info!(room_id = %room_id, participant_id = %participant_id, "moderator promoted");
                    sessions.broadcast(&room_id, &sync_message(room, sync_limit));
                }
            }
            ClientMessage::Join { .. } | ClientMessage::Unknown => {}
        }
    }

    fn handle_join(
        &mut self,
        connection_id: ConnectionId,
        room_id: RoomId,
        participant_id: ParticipantId,
        name: String,
        is_spectator: bool,
    ) {
        if participant_id.trim().is_empty() || validate_display_name(&name).is_err() {
            self.sessions.send(
                connection_id,
                ServerMessage::error(JOIN_FAILED, "Failed to join room"),
            );
            return;
        }
        if self.registry.get(&room_id).is_none() {
            self.sessions.send(
                connection_id,
                ServerMessage::error(ROOM_NOT_FOUND, "Room not found"),
            );
            return;
        }

        let previous = self.sessions.bind(connection_id, &room_id, &participant_id);
        if let Some(previous) = previous.filter(|b| {
            b.room_id != room_id || b.participant_id != participant_id
        }) {
            self.release_participant(previous.room_id, previous.participant_id);
        }
        self.pending_removals
            .remove(&(room_id.clone(), participant_id.clone()));

        // The previous binding may have emptied and deleted the very room being joined.
        let Some(room) = self.registry.get_mut(&room_id) else {
            self.sessions.unbind(connection_id);
            self.sessions.send(
                connection_id,
                ServerMessage::error(ROOM_NOT_FOUND, "Room not found"),
            );
            return;
        };

        let moderators_before = moderator_ids(room);
        let outcome = room.join(&participant_id, &name, is_spectator);
        let sessions = &self.sessions;
        sessions.send(
            connection_id,
            sync_message(room, self.config.sync_chat_limit),
        );

        let participant = ParticipantSummary::from(&outcome.participant);
        let announcement = if outcome.rejoined {
            ServerMessage::ParticipantUpdated { participant }
        } else {
            ServerMessage::ParticipantJoined { participant }
        };
        sessions.broadcast_except(&room_id, connection_id, &announcement);
        announce_role_changes(sessions, &room_id, room, &moderators_before, &participant_id);

        let notice = room.add_system_message(&format!("{name} joined the room"));
        sessions.broadcast(
            &room_id,
            &ServerMessage::ChatMessage {
                message: ChatMessageSummary::from(&notice),
            },
        );
        info!(
            room_id = %room_id,
            participant_id = %participant_id,
            connection_id = %connection_id,
            rejoined = outcome.rejoined,
            "participant joined"
        );
    }

    fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        let Some(binding) = self.sessions.disconnect(connection_id) else {
            debug!(connection_id = %connection_id, "connection closed before joining");
            return;
        };
        info!(
            room_id = %binding.room_id,
            participant_id = %binding.participant_id,
            connection_id = %connection_id,
            "connection closed"
        );
        self.release_participant(binding.room_id, binding.participant_id);
    }

    /// Mark a participant disconnected once its last connection is gone and start the grace
    /// period before removal.
    fn release_participant(&mut self, room_id: RoomId, participant_id: ParticipantId) {
        if self
            .sessions
            .is_participant_connected(&room_id, &participant_id)
        {
            return;
        }
        let Some(room) = self.registry.get_mut(&room_id) else {
            return;
        };
        let moderators_before = moderator_ids(room);
        let Some(participant) =
            room.set_connection_status(&participant_id, ConnectionStatus::Disconnected)
        else {
            return;
        };
        self.sessions.broadcast(
            &room_id,
            &ServerMessage::ParticipantUpdated {
                participant: ParticipantSummary::from(&participant),
            },
        );
        announce_role_changes(
            &self.sessions,
            &room_id,
            room,
            &moderators_before,
            &participant_id,
        );

        self.next_token = self.next_token.wrapping_add(1);
        let token = self.next_token;
        self.pending_removals
            .insert((room_id.clone(), participant_id.clone()), token);

        let loopback = self.loopback.clone();
        let grace = self.config.reconnect_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(tx) = loopback.upgrade() {
                let _ = tx.send(Command::GraceExpired {
                    room_id,
                    participant_id,
                    token,
                });
            }
        });
    }

    fn handle_grace_expired(&mut self, room_id: RoomId, participant_id: ParticipantId, token: u64) {
        let key = (room_id, participant_id);
        if self.pending_removals.get(&key) != Some(&token) {
            return;
        }
        let (room_id, participant_id) = key;
        self.pending_removals
            .remove(&(room_id.clone(), participant_id.clone()));

        let still_gone = self.registry.get(&room_id).is_some_and(|room| {
            room.participant(&participant_id)
                .is_some_and(|p| p.connection_status == ConnectionStatus::Disconnected)
        }) && !self
            .sessions
            .is_participant_connected(&room_id, &participant_id);
        if !still_gone {
            return;
        }

        info!(
            room_id = %room_id,
            participant_id = %participant_id,
            "reconnect window elapsed, removing participant"
        );
        self.remove_and_announce(&room_id, &participant_id, true);
    }

    fn kick(&mut self, room_id: &str, actor: &str, target: &str) {
        if self
            .registry
            .get(room_id)
            .is_none_or(|room| room.participant(target).is_none())
        {
            debug!(room_id = %room_id, participant_id = %target, "kick of unknown participant");
            return;
        }

        for connection_id in self.sessions.connections_of(room_id, target) {
            self.sessions.send(
                connection_id,
                ServerMessage::error(KICKED, "You have been removed from the room"),
            );
            self.sessions.unbind(connection_id);
        }
        self.pending_removals
            .remove(&(room_id.to_string(), target.to_string()));
        info!(room_id = %room_id, participant_id = %target, kicked_by = %actor, "participant kicked");
        self.remove_and_announce(room_id, target, false);
    }

    /// Remove a participant, tell the room, and clean up if the room is gone.
    fn remove_and_announce(&mut self, room_id: &str, participant_id: &str, with_notice: bool) {
        let moderators_before = self
            .registry
            .get(room_id)
            .map(moderator_ids)
            .unwrap_or_default();
        let Some(departure) = self.registry.remove_participant(room_id, participant_id) else {
            return;
        };

        if departure.room_deleted {
            self.sessions.unbind_room(room_id);
            self.pending_removals.retain(|(room, _), _| room != room_id);
            return;
        }

        self.sessions.broadcast(
            room_id,
            &ServerMessage::ParticipantLeft {
                participant_id: participant_id.to_string(),
            },
        );
        let Some(room) = self.registry.get_mut(room_id) else {
            return;
        };
        announce_role_changes(
            &self.sessions,
            room_id,
            room,
            &moderators_before,
            participant_id,
        );
        if with_notice {
            let notice = room.add_system_message(&format!(
                "{} left the room",
                departure.participant.name
            ));
            self.sessions.broadcast(
                room_id,
                &ServerMessage::ChatMessage {
                    message: ChatMessageSummary::from(&notice),
                },
            );
        }
    }

    fn handle_timer_tick(&mut self, room_id: &str, generation: u64) {
        let Some(room) = self.registry.get_mut(room_id) else {
            return;
        };
        match room.tick_timer(generation) {
            Some(TickOutcome::Tick(remaining)) => {
                self.sessions
                    .broadcast(room_id, &ServerMessage::TimerTick { remaining });
            }
            Some(TickOutcome::Expired) => {
                self.sessions
                    .broadcast(room_id, &ServerMessage::TimerTick { remaining: 0 });
                self.sessions.broadcast(room_id, &ServerMessage::TimerExpired);
            }
            None => debug!(room_id = %room_id, generation, "stale timer tick ignored"),
        }
    }

    #[cfg(test)]
    async fn process_next(&mut self) {
        if let Some(command) = self.inbox.recv().await {
            self.handle(command);
        }
    }
}

/// Actions restricted to the room moderator.
fn requires_moderator(message: &ClientMessage) -> bool {
    matches!(
        message,
        ClientMessage::Reveal
            | ClientMessage::ResetVotes
            | ClientMessage::NextStory { .. }
            | ClientMessage::UpdateSettings { .. }
            | ClientMessage::KickParticipant { .. }
            | ClientMessage::PromoteModerator { .. }
    )
}

/// Full snapshot after repairing the moderator invariant.
fn sync_message(room: &mut RoomAggregate, chat_limit: usize) -> ServerMessage {
    room.ensure_moderator();
    ServerMessage::Sync {
        state: RoomStateSummary::from_aggregate(room, chat_limit),
    }
}

fn revealed_message(outcome: &RevealOutcome) -> ServerMessage {
    ServerMessage::VotesRevealed {
        votes: outcome.votes.iter().map(VoteSummary::from).collect(),
        stats: VotingStatsSummary::from(&outcome.stats),
    }
}

fn broadcast_stories(sessions: &SessionTable, room_id: &str, room: &RoomAggregate) {
    sessions.broadcast(
        room_id,
        &ServerMessage::StoriesUpdated {
            stories: stories_summary(room.stories()),
        },
    );
}

fn moderator_ids(room: &RoomAggregate) -> Vec<ParticipantId> {
    room.participants()
        .filter(|p| p.is_moderator)
        .map(|p| p.id.clone())
        .collect()
}

/// Broadcast `participantUpdated` for everyone whose moderator flag changed, except
/// `announced`, whose fresh record already went out.
fn announce_role_changes(
    sessions: &SessionTable,
    room_id: &str,
    room: &RoomAggregate,
    before: &[ParticipantId],
    announced: &str,
) {
    for participant in room.participants().filter(|p| p.id != announced) {
        if participant.is_moderator != before.contains(&participant.id) {
            sessions.broadcast(
                room_id,
                &ServerMessage::ParticipantUpdated {
                    participant: ParticipantSummary::from(participant),
                },
            );
        }
    }
}
