//! Per-recipient `PLAY` frames.
//!
//! A frame is the shared section (status, every player, global counters)
//! followed by the recipient's drained block-edit queue and the blocks
//! visible from its room. The shared section is identical for all
//! recipients of a tick, so it is encoded once and spliced into each frame.

use shared::protocol::{BlockEditOp, ClientOp, BLOCK_LIST_END, EDIT_LIST_END, TERMINAL_STATUS};
use shared::stage::{BlockEdit, Stage};
use shared::wire::Writer;

/// Status, player states, respawn counter and chrono for the current tick.
pub fn write_shared_section(stage: &Stage) -> Writer {
    let mut w = Writer::new();
    let status = if stage.is_finished() {
        TERMINAL_STATUS
    } else {
        stage.progress()
    };
    w.write_i32(status);

    for player in stage.players() {
        w.write_f32(player.x);
        w.write_f32(player.y);
        w.write_f32(player.hp);
        w.write_f32(player.jump);
        w.write_i8(player.respawn_counter);
    }

    w.write_i8(stage.respawn_count());
    w.write_f32(stage.chrono());
    w
}

pub fn write_block_edit(w: &mut Writer, edit: &BlockEdit) {
    match edit {
        BlockEdit::FullAdd { id, rect } => {
            w.write_i8(BlockEditOp::FullAdd.into());
            w.write_i32(*id as i32);
            w.write_f32(rect.x);
            w.write_f32(rect.y);
            w.write_f32(rect.w);
            w.write_f32(rect.h);
        }
        BlockEdit::FullRemove(id) => {
            w.write_i8(BlockEditOp::FullRemove.into());
            w.write_i32(*id as i32);
        }
        BlockEdit::Remove(id) => {
            w.write_i8(BlockEditOp::Remove.into());
            w.write_i32(*id as i32);
        }
        BlockEdit::Reset => w.write_i8(BlockEditOp::Reset.into()),
    }
}

/// Appends one `PLAY` record for `recipient`, draining its edit queue.
/// The caller closes the message with `END_MSG`.
pub fn write_frame(out: &mut Writer, shared: &Writer, stage: &mut Stage, recipient: usize) {
    out.write_u8(ClientOp::Play.into());
    out.append(shared);

    for edit in stage.take_block_edits(recipient) {
        write_block_edit(out, &edit);
    }
    out.write_i8(EDIT_LIST_END);

    for block in stage.visible_blocks(recipient) {
        out.write_i32(block.id as i32);
        block.module.write(out);
    }
    out.write_i32(BLOCK_LIST_END);
}
