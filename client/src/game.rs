//! Local mirror of the server's room simulation.
//!
//! The client does not simulate. Every `PLAY` frame carries the full player
//! state, which overwrites the mirror unconditionally, plus the block edits
//! and block module states the server decided this client should see.

use log::debug;
use shared::protocol::{BlockEditOp, ProtocolError, TERMINAL_STATUS};
use shared::stage::{ModuleState, Rect};
use shared::wire::{Reader, WireError};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    /// The server sent module state for a block this mirror never saw
    /// created. Client and server views have diverged.
    #[error("block {0} is not in the local mirror")]
    UnknownBlock(i32),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerView {
    pub x: f32,
    pub y: f32,
    pub hp: f32,
    pub jump: f32,
    pub respawn_counter: i8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockView {
    pub id: u32,
    pub rect: Rect,
    pub module: ModuleState,
    /// Cleared by a `remove` edit; the block comes back on the next reset.
    pub shown: bool,
}

/// Header of an applied frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Running { progress: i32 },
    Finished,
}

#[derive(Debug, Clone, Default)]
pub struct ClientGameState {
    players: Vec<PlayerView>,
    blocks: BTreeMap<u32, BlockView>,
    progress: i32,
    respawn_count: i8,
    chrono: f32,
    finished: bool,
    frames_applied: u64,
}

impl ClientGameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the player list. Frames cannot be decoded before this, since
    /// they carry no player count of their own.
    pub fn set_player_count(&mut self, count: usize) {
        if self.players.len() != count {
            debug!("Mirror sized for {} players", count);
            self.players.resize(count, PlayerView::default());
        }
    }

    pub fn is_sized(&self) -> bool {
        !self.players.is_empty()
    }

    /// Decodes one frame body (everything after the `PLAY` opcode) into the
    /// mirror. A terminal status stops decoding right after the status.
    pub fn apply_frame(&mut self, r: &mut Reader<'_>) -> Result<FrameStatus, MirrorError> {
        let status = r.read_i32()?;
        if status == TERMINAL_STATUS {
            self.finished = true;
            self.frames_applied += 1;
            return Ok(FrameStatus::Finished);
        }

        for player in &mut self.players {
            player.x = r.read_f32()?;
            player.y = r.read_f32()?;
            player.hp = r.read_f32()?;
            player.jump = r.read_f32()?;
            player.respawn_counter = r.read_i8()?;
        }
        self.respawn_count = r.read_i8()?;
        self.chrono = r.read_f32()?;

        self.apply_block_edits(r)?;
        self.apply_block_states(r)?;

        self.progress = status;
        self.finished = false;
        self.frames_applied += 1;
        Ok(FrameStatus::Running { progress: status })
    }

    fn apply_block_edits(&mut self, r: &mut Reader<'_>) -> Result<(), MirrorError> {
        loop {
            let op = r.read_i8()?;
            if op < 0 {
                return Ok(());
            }
            match BlockEditOp::try_from(op)? {
                BlockEditOp::FullAdd => {
                    let id = r.read_i32()? as u32;
                    let rect = Rect::new(r.read_f32()?, r.read_f32()?, r.read_f32()?, r.read_f32()?);
                    self.blocks.insert(
                        id,
                        BlockView {
                            id,
                            rect,
                            module: ModuleState::default(),
                            shown: true,
                        },
                    );
                }
                BlockEditOp::FullRemove => {
                    let id = r.read_i32()? as u32;
                    if self.blocks.remove(&id).is_none() {
                        debug!("Full removal of unknown block {}", id);
                    }
                }
                BlockEditOp::Remove => {
                    let id = r.read_i32()? as u32;
                    if let Some(block) = self.blocks.get_mut(&id) {
                        block.shown = false;
                    }
                }
                BlockEditOp::NoOp => {}
                BlockEditOp::Reset => self.blocks.clear(),
            }
        }
    }

    fn apply_block_states(&mut self, r: &mut Reader<'_>) -> Result<(), MirrorError> {
        loop {
            let id = r.read_i32()?;
            if id < 0 {
                return Ok(());
            }
            let module = ModuleState::read(r)?;
            let block = self
                .blocks
                .get_mut(&(id as u32))
                .ok_or(MirrorError::UnknownBlock(id))?;
            block.module = module;
        }
    }

    pub fn players(&self) -> &[PlayerView] {
        &self.players
    }

    /// Blocks currently shown, in id order.
    pub fn blocks(&self) -> impl Iterator<Item = &BlockView> {
        self.blocks.values().filter(|b| b.shown)
    }

    pub fn block(&self, id: u32) -> Option<&BlockView> {
        self.blocks.get(&id)
    }

    pub fn progress(&self) -> i32 {
        self.progress
    }

    pub fn respawn_count(&self) -> i8 {
        self.respawn_count
    }

    pub fn chrono(&self) -> f32 {
        self.chrono
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn frames_applied(&self) -> u64 {
        self.frames_applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::protocol::{BLOCK_LIST_END, EDIT_LIST_END};
    use shared::wire::Writer;

    fn header(w: &mut Writer, status: i32, players: &[(f32, f32)]) {
        w.write_i32(status);
        for (x, y) in players {
            w.write_f32(*x);
            w.write_f32(*y);
            w.write_f32(100.0);
            w.write_f32(2.0);
            w.write_i8(0);
        }
        w.write_i8(3);
        w.write_f32(1.5);
    }

    fn full_add(w: &mut Writer, id: i32) {
        w.write_i8(BlockEditOp::FullAdd.into());
        w.write_i32(id);
        for v in [10.0, 20.0, 30.0, 40.0] {
            w.write_f32(v);
        }
    }

    fn apply(state: &mut ClientGameState, w: &Writer) -> Result<FrameStatus, MirrorError> {
        state.apply_frame(&mut Reader::new(w.as_slice()))
    }

    #[test]
    fn test_frame_overwrites_mirror() {
        let mut state = ClientGameState::new();
        state.set_player_count(2);

        let mut w = Writer::new();
        header(&mut w, 42, &[(1.0, 2.0), (3.0, 4.0)]);
        w.write_i8(BlockEditOp::Reset.into());
        full_add(&mut w, 7);
        full_add(&mut w, 9);
        w.write_i8(EDIT_LIST_END);
        w.write_i32(9);
        ModuleState {
            timer: 0.25,
            active: true,
        }
        .write(&mut w);
        w.write_i32(BLOCK_LIST_END);

        assert_eq!(
            apply(&mut state, &w).unwrap(),
            FrameStatus::Running { progress: 42 }
        );
        assert_approx_eq!(state.players()[1].x, 3.0);
        assert_eq!(state.respawn_count(), 3);
        assert_approx_eq!(state.chrono(), 1.5);
        assert_eq!(state.blocks().count(), 2);
        assert!(state.block(9).unwrap().module.active);
        assert!(!state.block(7).unwrap().module.active);
    }

    #[test]
    fn test_remove_hides_and_reset_clears() {
        let mut state = ClientGameState::new();
        state.set_player_count(1);

        let mut w = Writer::new();
        header(&mut w, 1, &[(0.0, 0.0)]);
        full_add(&mut w, 1);
        full_add(&mut w, 2);
        w.write_i8(BlockEditOp::Remove.into());
        w.write_i32(1);
        w.write_i8(BlockEditOp::FullRemove.into());
        w.write_i32(2);
        w.write_i8(BlockEditOp::NoOp.into());
        w.write_i8(EDIT_LIST_END);
        w.write_i32(BLOCK_LIST_END);
        apply(&mut state, &w).unwrap();

        assert_eq!(state.blocks().count(), 0);
        assert!(state.block(1).is_some());
        assert!(state.block(2).is_none());
    }

    #[test]
    fn test_terminal_status_short_circuits() {
        let mut state = ClientGameState::new();
        state.set_player_count(1);

        let mut w = Writer::new();
        w.write_i32(TERMINAL_STATUS);
        w.write_u8(0xAB);
        let mut r = Reader::new(w.as_slice());
        assert_eq!(state.apply_frame(&mut r).unwrap(), FrameStatus::Finished);
        assert_eq!(r.remaining(), 1);
        assert!(state.is_finished());
    }

    #[test]
    fn test_unknown_block_state_is_fatal() {
        let mut state = ClientGameState::new();
        state.set_player_count(1);

        let mut w = Writer::new();
        header(&mut w, 5, &[(0.0, 0.0)]);
        w.write_i8(EDIT_LIST_END);
        w.write_i32(99);
        ModuleState::default().write(&mut w);
        w.write_i32(BLOCK_LIST_END);

        assert!(matches!(
            apply(&mut state, &w),
            Err(MirrorError::UnknownBlock(99))
        ));
    }

    #[test]
    fn test_bad_edit_opcode() {
        let mut state = ClientGameState::new();
        state.set_player_count(1);

        let mut w = Writer::new();
        header(&mut w, 5, &[(0.0, 0.0)]);
        w.write_i8(42);
        assert!(matches!(
            apply(&mut state, &w),
            Err(MirrorError::Protocol(ProtocolError::UnknownBlockEdit(42)))
        ));
    }
}
