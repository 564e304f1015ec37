//! Opcode tables and message-level constants.
//!
//! A physical message is a run of `(opcode, payload)` records closed by the
//! direction's `EndMsg` opcode. The numeric values below are the
//! compatibility contract; dispatch goes through the enums.

use crate::wire::WireError;
use thiserror::Error;

/// Opcodes understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerOp {
    Welcome = 0,
    AskStage = 1,
    WaitRoom = 2,
    ChooseRoom = 3,
    CreateRoom = 4,
    StartRoom = 5,
    GetStartCountdown = 6,
    CreateQuit = 7,
    Play = 8,
    Restart = 9,
    EndMsg = 10,
}

/// Opcodes understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientOp {
    Welcome = 0,
    RoomStageInfo = 1,
    WaitRoom = 2,
    StartRoom = 3,
    StartRoomCountdown = 4,
    Play = 5,
    EndMsg = 6,
}

/// Structural change entries inside a `PLAY` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum BlockEditOp {
    FullAdd = 0,
    FullRemove = 1,
    Remove = 2,
    NoOp = 3,
    Reset = 4,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown server opcode {0}")]
    UnknownServerOp(u8),

    #[error("unknown client opcode {0}")]
    UnknownClientOp(u8),

    #[error("unknown block edit opcode {0}")]
    UnknownBlockEdit(i8),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl TryFrom<u8> for ServerOp {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ServerOp::Welcome,
            1 => ServerOp::AskStage,
            2 => ServerOp::WaitRoom,
            3 => ServerOp::ChooseRoom,
            4 => ServerOp::CreateRoom,
            5 => ServerOp::StartRoom,
            6 => ServerOp::GetStartCountdown,
            7 => ServerOp::CreateQuit,
            8 => ServerOp::Play,
            9 => ServerOp::Restart,
            10 => ServerOp::EndMsg,
            other => return Err(ProtocolError::UnknownServerOp(other)),
        })
    }
}

impl TryFrom<u8> for ClientOp {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ClientOp::Welcome,
            1 => ClientOp::RoomStageInfo,
            2 => ClientOp::WaitRoom,
            3 => ClientOp::StartRoom,
            4 => ClientOp::StartRoomCountdown,
            5 => ClientOp::Play,
            6 => ClientOp::EndMsg,
            other => return Err(ProtocolError::UnknownClientOp(other)),
        })
    }
}

impl TryFrom<i8> for BlockEditOp {
    type Error = ProtocolError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => BlockEditOp::FullAdd,
            1 => BlockEditOp::FullRemove,
            2 => BlockEditOp::Remove,
            3 => BlockEditOp::NoOp,
            4 => BlockEditOp::Reset,
            other => return Err(ProtocolError::UnknownBlockEdit(other)),
        })
    }
}

impl From<ServerOp> for u8 {
    fn from(op: ServerOp) -> Self {
        op as u8
    }
}

impl From<ClientOp> for u8 {
    fn from(op: ClientOp) -> Self {
        op as u8
    }
}

impl From<BlockEditOp> for i8 {
    fn from(op: BlockEditOp) -> Self {
        op as i8
    }
}

/// Frame status announcing that the simulation reached its terminal state.
pub const TERMINAL_STATUS: i32 = -1;

/// Closes the block-edit list of a frame (any negative opcode is accepted).
pub const EDIT_LIST_END: i8 = -1;

/// Closes the block-info loop of a frame (any negative id is accepted).
pub const BLOCK_LIST_END: i32 = -1;

/// Bits of the `PLAY` input byte.
pub mod input_bits {
    pub const LEFT: u8 = 1 << 0;
    pub const RIGHT: u8 = 1 << 1;
    pub const UP: u8 = 1 << 2;
    pub const DOWN: u8 = 1 << 3;
    pub const GOAL_RESET: u8 = 1 << 4;
}
