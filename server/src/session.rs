//! Server-side command dispatch.
//!
//! An incoming message is a run of `(opcode, payload)` records closed by
//! `END_MSG`. Handlers append their replies to one outbound writer, which is
//! closed and sent as a single message once the whole input was consumed.
//! A request that names an unknown room or stage is logged and produces no
//! reply. An unknown opcode or a truncated payload aborts the message and is
//! reported to the caller.

use crate::level_registry::Acquire;
use crate::state::{write_start_room, write_wait_room, LevelWaiter, ServerState};
use crate::user::UserId;
use log::{debug, info, warn};
use shared::protocol::{ClientOp, ProtocolError, ServerOp};
use shared::wire::{Reader, Writer};
use tokio::time::Instant;

impl ServerState {
    /// Decodes and runs every record in `payload` for `user`.
    pub fn handle_message(&mut self, user: UserId, payload: &[u8]) -> Result<(), ProtocolError> {
        if !self.users.contains(user) {
            debug!("Ignoring message from departed {}", user);
            return Ok(());
        }

        let mut r = Reader::new(payload);
        let mut out = Writer::new();
        loop {
            let op = ServerOp::try_from(r.read_u8()?)?;
            match op {
                ServerOp::Welcome => out.write_u8(ClientOp::Welcome.into()),
                ServerOp::AskStage => self.on_ask_stage(&mut r, &mut out)?,
                ServerOp::WaitRoom => self.on_wait_room(user, &mut r, &mut out)?,
                ServerOp::ChooseRoom => self.on_choose_room(user, &mut r, &mut out)?,
                ServerOp::CreateRoom => self.on_create_room(user, &mut r, &mut out)?,
                ServerOp::StartRoom => self.on_start_room(user, &mut r, &mut out)?,
                ServerOp::GetStartCountdown => self.on_get_countdown(user, &mut out),
                ServerOp::CreateQuit => self.detach_user(user),
                ServerOp::Play => self.on_play(user, &mut r)?,
                ServerOp::Restart => self.on_restart(user),
                ServerOp::EndMsg => break,
            }
        }

        if !out.is_empty() {
            out.write_u8(ClientOp::EndMsg.into());
            self.users.send(user, out.into_bytes());
        }
        Ok(())
    }

    fn on_ask_stage(&mut self, r: &mut Reader<'_>, out: &mut Writer) -> Result<(), ProtocolError> {
        let stage = r.read_token()?.filter(|hash| self.levels.contains(hash));
        out.write_u8(ClientOp::RoomStageInfo.into());
        out.write_token(stage.as_ref());
        Ok(())
    }

    fn on_create_room(
        &mut self,
        user: UserId,
        r: &mut Reader<'_>,
        out: &mut Writer,
    ) -> Result<(), ProtocolError> {
        let Some(level) = r.read_token()? else {
            warn!("{} asked for a room without a stage", user);
            return Ok(());
        };
        self.detach_user(user);

        match self.levels.acquire(level, LevelWaiter::OpenLobby { user }) {
            Acquire::Ready(template) => {
                let room = self.open_lobby(user, level, template);
                write_wait_room(out, room, true);
            }
            Acquire::Pending => debug!("{} waiting on stage {}", user, level),
            Acquire::Unknown => warn!("{} asked for unknown stage {}", user, level),
        }
        Ok(())
    }

    fn on_choose_room(
        &mut self,
        user: UserId,
        r: &mut Reader<'_>,
        out: &mut Writer,
    ) -> Result<(), ProtocolError> {
        let Some(room) = r.read_token()? else {
            warn!("{} chose a null room", user);
            return Ok(());
        };
        let current = self.users.get(user).and_then(|u| u.lobby);
        let Some(lobby) = self.lobbies.get(&room) else {
            warn!("{} chose unknown room {}", user, room);
            return Ok(());
        };

        if current == Some(room) {
            write_wait_room(out, room, lobby.is_admin(user));
            return Ok(());
        }
        if lobby.stage().is_some() {
            warn!("{} cannot join room {}: already started", user, room);
            return Ok(());
        }

        self.detach_user(user);
        let Some(lobby) = self.lobbies.get_mut(&room) else {
            return Ok(());
        };
        if !lobby.add_user(user) {
            warn!("{} cannot join room {}", user, room);
            return Ok(());
        }
        if let Some(u) = self.users.get_mut(user) {
            u.lobby = Some(room);
            u.player_index = None;
        }
        info!("{} joined room {}", user, room);
        write_wait_room(out, room, false);
        Ok(())
    }

    fn on_wait_room(
        &mut self,
        user: UserId,
        r: &mut Reader<'_>,
        out: &mut Writer,
    ) -> Result<(), ProtocolError> {
        let room = r.read_token()?;
        let Some(state) = self.users.get(user) else {
            return Ok(());
        };
        let Some(room) = room.filter(|room| state.lobby == Some(*room)) else {
            warn!("{} polled a room it is not in", user);
            return Ok(());
        };
        let Some(lobby) = self.lobbies.get(&room) else {
            warn!("{} polled unknown room {}", user, room);
            return Ok(());
        };

        match state.player_index {
            Some(index) => write_start_room(out, room, index),
            None => write_wait_room(out, room, lobby.is_admin(user)),
        }
        Ok(())
    }

    fn on_start_room(
        &mut self,
        user: UserId,
        r: &mut Reader<'_>,
        out: &mut Writer,
    ) -> Result<(), ProtocolError> {
        let Some(room) = r.read_token()? else {
            warn!("{} started a null room", user);
            return Ok(());
        };
        let Some(lobby) = self.lobbies.get_mut(&room) else {
            warn!("{} started unknown room {}", user, room);
            return Ok(());
        };
        if !lobby.is_admin(user) {
            warn!("{} is not the admin of room {}", user, room);
            return Ok(());
        }
        let Some(assignments) = lobby.start(Instant::now()) else {
            warn!("Room {} already started", room);
            return Ok(());
        };

        for (member, index) in assignments {
            let Some(u) = self.users.get_mut(member) else {
                continue;
            };
            u.player_index = Some(index);
            u.roster_sent = false;
            u.game_connection_alive = false;

            if member == user {
                write_start_room(out, room, index);
            } else {
                let mut notice = Writer::new();
                write_start_room(&mut notice, room, index);
                notice.write_u8(ClientOp::EndMsg.into());
                u.send(notice.into_bytes());
            }
        }
        Ok(())
    }

    /// Answers a countdown poll. The first negative answer a seated user
    /// receives opens its frame stream, since only then can it size its
    /// mirror.
    fn on_get_countdown(&mut self, user: UserId, out: &mut Writer) {
        let room = self.users.get(user).and_then(|u| u.lobby);
        let Some(lobby) = room.and_then(|room| self.lobbies.get(&room)) else {
            warn!("{} polled the countdown outside a room", user);
            return;
        };
        let value = lobby.countdown_value(Instant::now());
        out.write_u8(ClientOp::StartRoomCountdown.into());
        out.write_i32(value);

        if value >= 0 {
            return;
        }
        if let Some(u) = self.users.get_mut(user) {
            if u.player_index.is_some() && !u.roster_sent {
                debug!("{} sized for {} players, streaming frames", user, -value);
                u.roster_sent = true;
                u.game_connection_alive = true;
            }
        }
    }

    fn on_play(&mut self, user: UserId, r: &mut Reader<'_>) -> Result<(), ProtocolError> {
        let mask = r.read_u8()?;
        let Some(u) = self.users.get(user) else {
            return Ok(());
        };
        let (Some(room), Some(index)) = (u.lobby, u.player_index) else {
            debug!("{} sent input outside a running room", user);
            return Ok(());
        };
        if let Some(stage) = self.lobbies.get_mut(&room).and_then(|l| l.stage_mut()) {
            stage.set_input(index, mask);
        }
        Ok(())
    }

    fn on_restart(&mut self, user: UserId) {
        let room = self.users.get(user).and_then(|u| u.lobby);
        let Some(lobby) = room.and_then(|room| self.lobbies.get_mut(&room)) else {
            warn!("{} restarted outside a room", user);
            return;
        };
        if !lobby.restart() {
            debug!("Room {} restart ignored", lobby.id());
            return;
        }

        info!("Room {} restarted by {}", lobby.id(), user);
        for member in lobby.users().to_vec() {
            if let Some(u) = self.users.get_mut(member) {
                if u.roster_sent {
                    u.game_connection_alive = true;
                }
            }
        }
    }
}
