//! Stage templates and the deterministic per-room simulation.
//!
//! A [`StageTemplate`] is the immutable, shareable description of a level.
//! [`Stage::generate`] turns it into an independent simulation instance whose
//! players, blocks and edit logs are owned by that instance alone, so any
//! number of rooms can run off the same template.

use crate::protocol::input_bits;
use crate::wire::{Reader, WireError, Writer};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

pub const GRAVITY: f32 = 980.0;
pub const PLAYER_SPEED: f32 = 300.0;
pub const JUMP_VELOCITY: f32 = -400.0;
pub const PLAYER_SIZE: f32 = 32.0;
pub const FAST_FALL_FACTOR: f32 = 2.0;
pub const MAX_HP: f32 = 100.0;
pub const MAX_JUMP: f32 = 2.0;
pub const JUMP_REGEN_PER_SEC: f32 = 6.0;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("duplicate block id {0}")]
    DuplicateBlock(u32),

    /// Block ids travel as non-negative i32; negative values end the
    /// block lists of a frame.
    #[error("block id {0} does not fit the wire format")]
    BlockIdOutOfRange(u32),

    #[error("room size must be positive, got {0}x{1}")]
    InvalidRoomSize(f32, f32),

    #[error("unknown stage {0}")]
    UnknownStage(String),

    #[error("stage encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    /// Overlap test; rectangles that only share an edge do not intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.right() <= other.x
            || other.right() <= self.x
            || self.bottom() <= other.y
            || other.bottom() <= self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BlockKind {
    Solid,
    /// Disappears `delay` seconds after first being stood on. A permanent
    /// crumble is announced as a full removal rather than a hide.
    Crumbling { delay: f32, permanent: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub id: u32,
    pub rect: Rect,
    pub kind: BlockKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTemplate {
    pub name: String,
    pub room_width: f32,
    pub room_height: f32,
    pub spawn: (f32, f32),
    pub goal: Rect,
    /// Players falling below this line lose all hp.
    pub kill_y: f32,
    pub blocks: Vec<BlockTemplate>,
}

impl StageTemplate {
    pub fn validate(&self) -> Result<(), StageError> {
        if self.room_width <= 0.0 || self.room_height <= 0.0 {
            return Err(StageError::InvalidRoomSize(self.room_width, self.room_height));
        }
        let mut ids = HashSet::new();
        for block in &self.blocks {
            if i32::try_from(block.id).is_err() {
                return Err(StageError::BlockIdOutOfRange(block.id));
            }
            if !ids.insert(block.id) {
                return Err(StageError::DuplicateBlock(block.id));
            }
        }
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StageError> {
        let template: StageTemplate = bincode::deserialize(bytes)?;
        template.validate()?;
        Ok(template)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StageError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn room_of(&self, x: f32, y: f32) -> (i32, i32) {
        (
            (x / self.room_width).floor() as i32,
            (y / self.room_height).floor() as i32,
        )
    }

    /// A small three-room course: floor, a few platforms, two crumbling
    /// blocks and a goal at the far right.
    pub fn demo(name: &str) -> Self {
        let mut blocks = vec![BlockTemplate {
            id: 1,
            rect: Rect::new(0.0, 550.0, 2400.0, 50.0),
            kind: BlockKind::Solid,
        }];
        for i in 0..6u32 {
            blocks.push(BlockTemplate {
                id: 10 + i,
                rect: Rect::new(200.0 + 350.0 * i as f32, 450.0 - 40.0 * (i % 3) as f32, 120.0, 20.0),
                kind: BlockKind::Solid,
            });
        }
        blocks.push(BlockTemplate {
            id: 30,
            rect: Rect::new(900.0, 380.0, 80.0, 20.0),
            kind: BlockKind::Crumbling {
                delay: 0.5,
                permanent: false,
            },
        });
        blocks.push(BlockTemplate {
            id: 31,
            rect: Rect::new(1700.0, 380.0, 80.0, 20.0),
            kind: BlockKind::Crumbling {
                delay: 0.5,
                permanent: true,
            },
        });

        Self {
            name: name.to_string(),
            room_width: 800.0,
            room_height: 600.0,
            spawn: (100.0, 550.0 - PLAYER_SIZE),
            goal: Rect::new(2300.0, 450.0, 60.0, 100.0),
            kill_y: 1200.0,
            blocks,
        }
    }
}

/// State carried by a block's gameplay module. Its encoding is opaque to the
/// frame protocol, which only forwards it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModuleState {
    pub timer: f32,
    pub active: bool,
}

impl ModuleState {
    pub fn write(&self, w: &mut Writer) {
        w.write_f32(self.timer);
        w.write_i8(self.active as i8);
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            timer: r.read_f32()?,
            active: r.read_i8()? != 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: u32,
    pub rect: Rect,
    pub kind: BlockKind,
    pub module: ModuleState,
}

impl Block {
    fn from_template(template: &BlockTemplate) -> Self {
        let timer = match template.kind {
            BlockKind::Solid => 0.0,
            BlockKind::Crumbling { delay, .. } => delay,
        };
        Self {
            id: template.id,
            rect: template.rect,
            kind: template.kind,
            module: ModuleState {
                timer,
                active: false,
            },
        }
    }
}

/// Structural change queued for one recipient until its next frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockEdit {
    FullAdd { id: u32, rect: Rect },
    FullRemove(u32),
    Remove(u32),
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub hp: f32,
    pub jump: f32,
    pub respawn_counter: i8,
    pub on_ground: bool,
    input: u8,
    up_latched: bool,
    reset_requested: bool,
}

impl Player {
    fn spawn_at(spawn: (f32, f32)) -> Self {
        Self {
            x: spawn.0,
            y: spawn.1,
            vel_x: 0.0,
            vel_y: 0.0,
            hp: MAX_HP,
            jump: MAX_JUMP,
            respawn_counter: 0,
            on_ground: false,
            input: 0,
            up_latched: false,
            reset_requested: false,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, PLAYER_SIZE, PLAYER_SIZE)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + PLAYER_SIZE / 2.0, self.y + PLAYER_SIZE / 2.0)
    }

    pub fn input(&self) -> u8 {
        self.input
    }

    fn respawn(&mut self, spawn: (f32, f32)) {
        self.x = spawn.0;
        self.y = spawn.1;
        self.vel_x = 0.0;
        self.vel_y = 0.0;
        self.hp = MAX_HP;
        self.jump = MAX_JUMP;
        self.on_ground = false;
        self.respawn_counter = self.respawn_counter.wrapping_add(1);
    }

    fn apply_input(&mut self, dt: f32) {
        let input = self.input;
        let held = |bit: u8| input & bit != 0;

        self.vel_x = 0.0;
        if held(input_bits::LEFT) {
            self.vel_x -= PLAYER_SPEED;
        }
        if held(input_bits::RIGHT) {
            self.vel_x += PLAYER_SPEED;
        }

        let up = held(input_bits::UP);
        if up && !self.up_latched && self.jump >= 1.0 {
            self.vel_y = JUMP_VELOCITY;
            self.jump -= 1.0;
            self.on_ground = false;
        }
        self.up_latched = up;

        let gravity = if held(input_bits::DOWN) {
            GRAVITY * FAST_FALL_FACTOR
        } else {
            GRAVITY
        };
        self.vel_y += gravity * dt;
    }

    /// Integrates one step against the live blocks and returns the block the
    /// player ended up standing on, if any.
    fn integrate(&mut self, blocks: &[Block], dt: f32) -> Option<u32> {
        self.x += self.vel_x * dt;
        for block in blocks {
            if self.rect().intersects(&block.rect) {
                if self.vel_x > 0.0 {
                    self.x = block.rect.x - PLAYER_SIZE;
                } else if self.vel_x < 0.0 {
                    self.x = block.rect.right();
                }
            }
        }

        self.y += self.vel_y * dt;
        self.on_ground = false;
        let mut standing = None;
        for block in blocks {
            if self.rect().intersects(&block.rect) {
                if self.vel_y > 0.0 {
                    self.y = block.rect.y - PLAYER_SIZE;
                    self.vel_y = 0.0;
                    self.on_ground = true;
                    standing = Some(block.id);
                } else if self.vel_y < 0.0 {
                    self.y = block.rect.bottom();
                    self.vel_y = 0.0;
                }
            }
        }

        if self.on_ground {
            self.jump = (self.jump + JUMP_REGEN_PER_SEC * dt).min(MAX_JUMP);
        }
        standing
    }
}

/// One running simulation instance.
#[derive(Debug, Clone)]
pub struct Stage {
    template: Arc<StageTemplate>,
    players: Vec<Player>,
    blocks: Vec<Block>,
    edit_logs: Vec<Vec<BlockEdit>>,
    tick: u32,
    chrono: f32,
    respawn_count: i8,
    finished: bool,
}

impl Stage {
    /// Builds a fresh simulation for `player_count` players. Every player's
    /// edit log starts with a reset followed by the full block set.
    pub fn generate(template: Arc<StageTemplate>, player_count: usize) -> Self {
        let mut stage = Self {
            template,
            players: Vec::new(),
            blocks: Vec::new(),
            edit_logs: vec![Vec::new(); player_count],
            tick: 0,
            chrono: 0.0,
            respawn_count: 0,
            finished: false,
        };
        stage.players = vec![Player::spawn_at(stage.template.spawn); player_count];
        stage.reset();
        stage
    }

    pub fn reset(&mut self) {
        let spawn = self.template.spawn;
        for player in &mut self.players {
            *player = Player::spawn_at(spawn);
        }

        let mut blocks: Vec<Block> = self
            .template
            .blocks
            .iter()
            .map(Block::from_template)
            .collect();
        blocks.sort_by_key(|b| b.id);
        self.blocks = blocks;

        for log in &mut self.edit_logs {
            log.clear();
            log.push(BlockEdit::Reset);
            log.extend(self.blocks.iter().map(|b| BlockEdit::FullAdd {
                id: b.id,
                rect: b.rect,
            }));
        }

        self.tick = 0;
        self.chrono = 0.0;
        self.respawn_count = 0;
        self.finished = false;
    }

    /// Stores the input byte for one player. Returns false for an unknown index.
    pub fn set_input(&mut self, index: usize, mask: u8) -> bool {
        let Some(player) = self.players.get_mut(index) else {
            return false;
        };
        player.input = mask & !input_bits::GOAL_RESET;
        if mask & input_bits::GOAL_RESET != 0 {
            player.reset_requested = true;
        }
        true
    }

    pub fn step(&mut self, dt: f32) {
        if self.finished {
            return;
        }
        self.tick = self.tick.wrapping_add(1);
        self.chrono += dt;

        let spawn = self.template.spawn;
        let kill_y = self.template.kill_y;
        let mut stood_on = Vec::new();
        let mut respawns = 0u8;

        for player in &mut self.players {
            if player.reset_requested {
                player.reset_requested = false;
                player.respawn(spawn);
                respawns = respawns.wrapping_add(1);
                continue;
            }

            player.apply_input(dt);
            if let Some(id) = player.integrate(&self.blocks, dt) {
                stood_on.push(id);
            }

            if player.y > kill_y {
                player.hp = 0.0;
            }
            if player.hp <= 0.0 {
                player.respawn(spawn);
                respawns = respawns.wrapping_add(1);
            }
        }
        self.respawn_count = self.respawn_count.wrapping_add(respawns as i8);

        self.update_blocks(&stood_on, dt);

        let goal = self.template.goal;
        if self.players.iter().any(|p| p.rect().intersects(&goal)) {
            debug!("Stage {} finished at tick {}", self.template.name, self.tick);
            self.finished = true;
        }
    }

    fn update_blocks(&mut self, stood_on: &[u32], dt: f32) {
        let mut crumbled = Vec::new();
        for block in &mut self.blocks {
            if let BlockKind::Crumbling { permanent, .. } = block.kind {
                if !block.module.active && stood_on.contains(&block.id) {
                    block.module.active = true;
                }
                if block.module.active {
                    block.module.timer -= dt;
                    if block.module.timer <= 0.0 {
                        crumbled.push((block.id, permanent));
                    }
                }
            }
        }

        for (id, permanent) in crumbled {
            if permanent {
                self.destroy_block(id);
            } else {
                self.remove_block(id);
            }
        }
    }

    fn take_block(&mut self, id: u32) -> bool {
        match self.blocks.iter().position(|b| b.id == id) {
            Some(pos) => {
                self.blocks.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Hides a block until the next reset.
    pub fn remove_block(&mut self, id: u32) -> bool {
        let removed = self.take_block(id);
        if removed {
            for log in &mut self.edit_logs {
                log.push(BlockEdit::Remove(id));
            }
        }
        removed
    }

    /// Deletes a block outright.
    pub fn destroy_block(&mut self, id: u32) -> bool {
        let removed = self.take_block(id);
        if removed {
            for log in &mut self.edit_logs {
                log.push(BlockEdit::FullRemove(id));
            }
        }
        removed
    }

    /// Drains the recipient's pending structural edits.
    pub fn take_block_edits(&mut self, recipient: usize) -> Vec<BlockEdit> {
        self.edit_logs
            .get_mut(recipient)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Blocks in the recipient's room and the rooms around it.
    pub fn visible_blocks(&self, recipient: usize) -> impl Iterator<Item = &Block> + '_ {
        let room = self.players.get(recipient).map(|p| {
            let (cx, cy) = p.center();
            self.template.room_of(cx, cy)
        });

        self.blocks.iter().filter(move |block| match room {
            Some((rx, ry)) => {
                let (bx, by) = self.template.room_of(block.rect.x, block.rect.y);
                (bx - rx).abs() <= 1 && (by - ry).abs() <= 1
            }
            None => false,
        })
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player_mut(&mut self, index: usize) -> Option<&mut Player> {
        self.players.get_mut(index)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn template(&self) -> &Arc<StageTemplate> {
        &self.template
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Public progress value reported in frame headers.
    pub fn progress(&self) -> i32 {
        (self.tick & i32::MAX as u32) as i32
    }

    pub fn chrono(&self) -> f32 {
        self.chrono
    }

    pub fn respawn_count(&self) -> i8 {
        self.respawn_count
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
