//! Server-wide state owned by the event loop.
//!
//! Users, rooms and the level cache live here and are only ever touched from
//! the single loop task, one event at a time. Opcode handling for incoming
//! messages is in [`crate::session`].

use crate::config::ServerConfig;
use crate::level_registry::{LevelRegistry, LoadOutcome, StageSource};
use crate::lobby::{LobbyRegistry, LobbySettings, TickOutcome};
use crate::network::{EventSender, ServerEvent};
use crate::sync;
use crate::user::{UserId, UserRegistry};
use log::{debug, error, info, warn};
use shared::protocol::ClientOp;
use shared::stage::{StageError, StageTemplate};
use shared::wire::Writer;
use shared::HashToken;
use std::sync::Arc;
use tokio::time::Instant;

/// Work parked on a stage load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelWaiter {
    /// Open a room for `user` once the stage is live.
    OpenLobby { user: UserId },
}

pub struct ServerState {
    pub(crate) users: UserRegistry,
    pub(crate) lobbies: LobbyRegistry,
    pub(crate) levels: LevelRegistry<LevelWaiter>,
}

impl ServerState {
    pub fn new(
        config: &ServerConfig,
        source: Arc<dyn StageSource>,
        events: EventSender,
    ) -> Result<Self, StageError> {
        let settings = LobbySettings {
            tick_period: config.tick_period(),
            countdown: config.countdown,
        };
        Ok(Self {
            users: UserRegistry::new(config.max_users),
            lobbies: LobbyRegistry::new(settings, events.clone()),
            levels: LevelRegistry::new(source, events, config.level_grace)?,
        })
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    pub fn lobbies(&self) -> &LobbyRegistry {
        &self.lobbies
    }

    pub fn levels(&self) -> &LevelRegistry<LevelWaiter> {
        &self.levels
    }

    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected { user, outbox } => {
                if !self.users.add_user(user, outbox) {
                    warn!("Rejecting {}: server full", user);
                }
            }
            ServerEvent::Message { user, payload } => {
                if let Err(e) = self.handle_message(user, &payload) {
                    error!("Protocol violation from {}: {}", user, e);
                    self.kill_user(user);
                }
            }
            ServerEvent::Disconnected { user } => self.kill_user(user),
            ServerEvent::LevelLoaded { level, result } => self.on_level_loaded(level, result),
            ServerEvent::LevelExpired { level, generation } => {
                self.levels.expire(level, generation);
            }
            ServerEvent::LobbyTick { lobby } => self.tick_lobby(lobby),
        }
    }

    /// Drops a user and detaches it from its room. Dropping the user's
    /// outbox ends its writer task, which closes the connection.
    pub fn kill_user(&mut self, user: UserId) {
        let Some(mut removed) = self.users.remove_user(user) else {
            return;
        };
        if let Some(room) = removed.clear_room() {
            self.leave_lobby(user, room);
        }
    }

    /// Takes `user` out of whatever room it is in.
    pub(crate) fn detach_user(&mut self, user: UserId) {
        let room = self.users.get_mut(user).and_then(|u| u.clear_room());
        if let Some(room) = room {
            self.leave_lobby(user, room);
        }
    }

    /// Removes `user` from the room's member list, tearing the room down
    /// when it empties.
    fn leave_lobby(&mut self, user: UserId, room: HashToken) {
        let Some(lobby) = self.lobbies.get_mut(&room) else {
            warn!("{} left unknown room {}", user, room);
            return;
        };
        info!("{} left room {}", user, room);
        if lobby.remove_user(user) > 0 {
            return;
        }
        if let Some(lobby) = self.lobbies.remove(&room) {
            self.levels.release(lobby.level());
        }
    }

    /// Creates a room around an acquired level and seats `admin` in it.
    pub(crate) fn open_lobby(
        &mut self,
        admin: UserId,
        level: HashToken,
        template: Arc<StageTemplate>,
    ) -> HashToken {
        let room = self.lobbies.create(level, template, admin);
        if let Some(user) = self.users.get_mut(admin) {
            user.lobby = Some(room);
            user.player_index = None;
        }
        room
    }

    fn on_level_loaded(&mut self, level: HashToken, result: Result<StageTemplate, StageError>) {
        match self.levels.finish_load(level, result) {
            Some(LoadOutcome::Loaded { template, waiters }) => {
                for waiter in waiters {
                    self.resume(waiter, level, Arc::clone(&template));
                }
            }
            Some(LoadOutcome::Failed { waiters }) => {
                for LevelWaiter::OpenLobby { user } in waiters {
                    warn!("Dropping room request from {}: stage {} failed", user, level);
                }
            }
            None => {}
        }
    }

    /// Hands a freshly loaded level to a parked request. A request whose
    /// user went away or already joined another room gives its reference back.
    fn resume(&mut self, waiter: LevelWaiter, level: HashToken, template: Arc<StageTemplate>) {
        match waiter {
            LevelWaiter::OpenLobby { user } => {
                let free = self.users.get(user).is_some_and(|u| u.lobby.is_none());
                if !free {
                    debug!("{} no longer waiting on stage {}", user, level);
                    self.levels.release(level);
                    return;
                }

                let room = self.open_lobby(user, level, template);
                let mut out = Writer::new();
                write_wait_room(&mut out, room, true);
                out.write_u8(ClientOp::EndMsg.into());
                self.users.send(user, out.into_bytes());
            }
        }
    }

    /// Advances one room and pushes a frame to every member still playing.
    pub(crate) fn tick_lobby(&mut self, room: HashToken) {
        let Some(lobby) = self.lobbies.get_mut(&room) else {
            return;
        };
        match lobby.advance(Instant::now()) {
            TickOutcome::Idle => return,
            TickOutcome::Advanced | TickOutcome::Finished => {}
        }

        let members = lobby.users().to_vec();
        let Some(stage) = lobby.stage_mut() else {
            return;
        };
        let shared = sync::write_shared_section(stage);
        let finished = stage.is_finished();

        for id in members {
            let Some(user) = self.users.get_mut(id) else {
                continue;
            };
            let Some(index) = user.player_index else {
                continue;
            };
            if !user.game_connection_alive {
                continue;
            }

            let mut out = Writer::new();
            sync::write_frame(&mut out, &shared, stage, index);
            out.write_u8(ClientOp::EndMsg.into());
            user.send(out.into_bytes());
            if finished {
                user.game_connection_alive = false;
            }
        }
        if finished {
            debug!("Room {} sent terminal frames", room);
        }
    }
}

pub(crate) fn write_wait_room(out: &mut Writer, room: HashToken, admin: bool) {
    out.write_u8(ClientOp::WaitRoom.into());
    out.write_token(Some(&room));
    out.write_i8(admin as i8);
}

pub(crate) fn write_start_room(out: &mut Writer, room: HashToken, index: usize) {
    out.write_u8(ClientOp::StartRoom.into());
    out.write_token(Some(&room));
    out.write_i32(index as i32);
}
