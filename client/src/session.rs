//! Client-side protocol session.
//!
//! The session opens with `WELCOME`. Requests made before the server echoes
//! it are parked and flushed together, in order, when the echo arrives.
//! After that, requests accumulate in one outgoing message until the
//! network loop takes it.

use crate::game::{ClientGameState, FrameStatus, MirrorError};
use bytes::Bytes;
use log::{debug, info};
use shared::protocol::{ClientOp, ProtocolError, ServerOp};
use shared::wire::{Reader, WireError, Writer};
use shared::HashToken;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("mirror desynchronised: {0}")]
    Mirror(#[from] MirrorError),
}

impl From<WireError> for SessionError {
    fn from(e: WireError) -> Self {
        SessionError::Protocol(e.into())
    }
}

/// Commands the client can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    AskStage(HashToken),
    WaitRoom(HashToken),
    ChooseRoom(HashToken),
    CreateRoom(HashToken),
    StartRoom(HashToken),
    GetStartCountdown,
    CreateQuit,
    Play(u8),
    Restart,
}

impl Request {
    fn write(&self, w: &mut Writer) {
        match self {
            Request::AskStage(stage) => {
                w.write_u8(ServerOp::AskStage.into());
                w.write_token(Some(stage));
            }
            Request::WaitRoom(room) => {
                w.write_u8(ServerOp::WaitRoom.into());
                w.write_token(Some(room));
            }
            Request::ChooseRoom(room) => {
                w.write_u8(ServerOp::ChooseRoom.into());
                w.write_token(Some(room));
            }
            Request::CreateRoom(stage) => {
                w.write_u8(ServerOp::CreateRoom.into());
                w.write_token(Some(stage));
            }
            Request::StartRoom(room) => {
                w.write_u8(ServerOp::StartRoom.into());
                w.write_token(Some(room));
            }
            Request::GetStartCountdown => w.write_u8(ServerOp::GetStartCountdown.into()),
            Request::CreateQuit => w.write_u8(ServerOp::CreateQuit.into()),
            Request::Play(mask) => {
                w.write_u8(ServerOp::Play.into());
                w.write_u8(*mask);
            }
            Request::Restart => w.write_u8(ServerOp::Restart.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    Remaining(Duration),
    /// The room is running with this many players.
    Started { player_count: usize },
}

/// Decoded server replies, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Welcome,
    StageInfo(Option<HashToken>),
    WaitRoom { room: HashToken, admin: bool },
    StartRoom { room: HashToken, player_index: usize },
    Countdown(Countdown),
    Frame(FrameStatus),
}

#[derive(Debug)]
pub struct ClientSession {
    welcomed: bool,
    pending: Vec<Request>,
    outgoing: Writer,
    game: ClientGameState,
}

impl ClientSession {
    pub fn new() -> Self {
        let mut outgoing = Writer::new();
        outgoing.write_u8(ServerOp::Welcome.into());
        Self {
            welcomed: false,
            pending: Vec::new(),
            outgoing,
            game: ClientGameState::new(),
        }
    }

    pub fn is_welcomed(&self) -> bool {
        self.welcomed
    }

    pub fn game(&self) -> &ClientGameState {
        &self.game
    }

    pub fn request(&mut self, request: Request) {
        if self.welcomed {
            request.write(&mut self.outgoing);
        } else {
            self.pending.push(request);
        }
    }

    /// Closes and returns the outgoing message, if anything was queued.
    pub fn take_outgoing(&mut self) -> Option<Bytes> {
        if self.outgoing.is_empty() {
            return None;
        }
        let mut message = std::mem::take(&mut self.outgoing);
        message.write_u8(ServerOp::EndMsg.into());
        Some(message.into_bytes())
    }

    /// Decodes one server message. A terminal frame ends decoding; whatever
    /// follows it in the message is dropped.
    pub fn handle_message(&mut self, payload: &[u8]) -> Result<Vec<ClientEvent>, SessionError> {
        let mut r = Reader::new(payload);
        let mut events = Vec::new();

        loop {
            match ClientOp::try_from(r.read_u8()?)? {
                ClientOp::Welcome => {
                    self.on_welcome();
                    events.push(ClientEvent::Welcome);
                }
                ClientOp::RoomStageInfo => events.push(ClientEvent::StageInfo(r.read_token()?)),
                ClientOp::WaitRoom => {
                    let room = read_room(&mut r)?;
                    let admin = r.read_i8()? != 0;
                    events.push(ClientEvent::WaitRoom { room, admin });
                }
                ClientOp::StartRoom => {
                    let room = read_room(&mut r)?;
                    let player_index = r.read_i32()?.max(0) as usize;
                    events.push(ClientEvent::StartRoom { room, player_index });
                }
                ClientOp::StartRoomCountdown => {
                    let value = r.read_i32()?;
                    let countdown = if value < 0 {
                        let player_count = value.unsigned_abs() as usize;
                        self.game.set_player_count(player_count);
                        Countdown::Started { player_count }
                    } else {
                        Countdown::Remaining(Duration::from_millis(value as u64))
                    };
                    events.push(ClientEvent::Countdown(countdown));
                }
                ClientOp::Play => {
                    if !self.game.is_sized() {
                        debug!("Discarding frame received before the room size");
                        break;
                    }
                    let status = self.game.apply_frame(&mut r)?;
                    events.push(ClientEvent::Frame(status));
                    if status == FrameStatus::Finished {
                        break;
                    }
                }
                ClientOp::EndMsg => break,
            }
        }
        Ok(events)
    }

    fn on_welcome(&mut self) {
        if self.welcomed {
            return;
        }
        self.welcomed = true;
        info!("Handshake complete, flushing {} requests", self.pending.len());
        for request in std::mem::take(&mut self.pending) {
            request.write(&mut self.outgoing);
        }
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

fn read_room(r: &mut Reader<'_>) -> Result<HashToken, WireError> {
    r.read_token()?
        .ok_or_else(|| WireError::InvalidToken("null room token".to_string()))
}
