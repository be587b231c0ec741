//! Planning block ring.
//!
//! Moves wait in a fixed ring of planning blocks between the planner
//! (mainline) and the segment executor (software interrupt). The ring
//! linkage is a relation, not ownership: blocks live in a flat array and
//! `next`/`prev` are index arithmetic, while three separate role indices
//! track the next block to hand to a writer, the next commit slot, and the
//! block being run. A block belongs to exactly one role at a time,
//! according to its `state`.
//!
//! The `Loading → Queued` transition is the commit point that makes a block
//! visible to the executor; it is ordered after all field writes with a
//! release fence.

use crate::{fp, AXIS_COUNT};
use core::sync::atomic::{fence, Ordering};

/// Number of blocks in the ring. Power of two.
pub const POOL_SIZE: usize = 8;

/// Queueing lifecycle of one block.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BlockState {
    #[default]
    Empty,
    /// Checked out by the planner, being written.
    Loading,
    /// Committed, waiting its turn.
    Queued,
    /// Next in line to run.
    Pending,
    /// Being executed.
    Running,
}

/// What kind of move a block carries. Committed exactly once, at queueing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MoveType {
    #[default]
    Null,
    /// Acceleration-planned line.
    Aline,
}

/// Execution state of a move, shared by blocks and the executor runtime.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MoveState {
    #[default]
    Off,
    New,
    Run,
    Run2,
    /// Acceleration section.
    Head,
    /// Cruise section.
    Body,
    /// Deceleration section.
    Tail,
    /// Block too short to execute; runtime drops it.
    Skip,
}

/// One planned move. Velocities are user units per minute, lengths user
/// units. The `…_vmax` family is what planning may use; the plain velocity
/// fields are what planning chose.
#[derive(Copy, Clone, Debug, Default)]
pub struct Block {
    pub state: BlockState,
    pub move_type: MoveType,
    pub move_state: MoveState,
    /// Whether later planning passes may still adjust this block.
    pub replannable: bool,

    pub target: [f64; AXIS_COUNT],
    pub unit: [f64; AXIS_COUNT],
    /// Per-axis direction flags; `true` reverses the motor.
    pub reverse: [bool; AXIS_COUNT],

    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,
    pub length: f64,

    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,

    pub entry_vmax: f64,
    pub cruise_vmax: f64,
    pub exit_vmax: f64,
    /// Velocity gained by accelerating at max jerk over the whole length.
    pub delta_vmax: f64,
    pub braking_velocity: f64,

    pub jerk: f64,
    /// 1/jerk, cached for planning.
    pub reciprocal_jerk: f64,
    /// cbrt(jerk), cached for planning.
    pub cube_root_jerk: f64,
}

/// The ring and its role indices.
pub struct BlockPool {
    blocks: [Block; POOL_SIZE],
    available: u8,
    /// Next block a writer may claim.
    write: usize,
    /// Next claimed block to commit.
    queued_write: usize,
    /// The running (or next-to-run) block.
    run: usize,
}

impl Default for BlockPool {
    fn default() -> Self {
        BlockPool {
            blocks: [Block::default(); POOL_SIZE],
            available: POOL_SIZE as u8,
            write: 0,
            queued_write: 0,
            run: 0,
        }
    }
}

pub fn next_index(i: usize) -> usize {
    (i + 1) % POOL_SIZE
}

pub fn prev_index(i: usize) -> usize {
    (i + POOL_SIZE - 1) % POOL_SIZE
}

impl BlockPool {
    /// Drops every block and resets the role indices. Used at init and by
    /// the clear command.
    pub fn reset(&mut self) {
        *self = BlockPool::default();
    }

    pub fn available(&self) -> usize {
        usize::from(self.available)
    }

    /// Claims the next empty block for writing, zeroing its contents.
    pub fn get_write_buffer(&mut self) -> Option<usize> {
        let idx = self.write;
        if self.blocks[idx].state != BlockState::Empty {
            return None;
        }
        self.blocks[idx] = Block {
            state: BlockState::Loading,
            ..Block::default()
        };
        self.available -= 1;
        self.write = next_index(idx);
        Some(idx)
    }

    /// Commits the oldest claimed block to the queue. This is the only
    /// place `move_type` is set, and the release fence orders every field
    /// write before the state change that publishes the block.
    pub fn queue_write_buffer(&mut self, move_type: MoveType) {
        let idx = self.queued_write;
        let block = &mut self.blocks[idx];
        block.move_type = move_type;
        block.move_state = MoveState::New;
        fence(Ordering::Release);
        block.state = BlockState::Queued;
        self.queued_write = next_index(idx);
    }

    /// Returns the running block, promoting a queued or pending block to
    /// running. `None` when nothing is queued; calling again before
    /// `free_run_buffer` returns the same block, which is what lets the
    /// executor iterate one segment at a time.
    pub fn run_buffer(&mut self) -> Option<usize> {
        let block = &mut self.blocks[self.run];
        if block.state == BlockState::Queued || block.state == BlockState::Pending {
            block.state = BlockState::Running;
        }
        if block.state == BlockState::Running {
            Some(self.run)
        } else {
            None
        }
    }

    /// Releases the running block back to the pool and advances to the
    /// next, marking it pending if it is already committed.
    pub fn free_run_buffer(&mut self) {
        self.clear_block(self.run);
        self.run = next_index(self.run);
        if self.blocks[self.run].state == BlockState::Queued {
            self.blocks[self.run].state = BlockState::Pending;
        }
        self.available += 1;
    }

    /// First planned block, i.e. the running one.
    pub fn first(&mut self) -> Option<usize> {
        self.run_buffer()
    }

    /// Last planned block: walks forward from the running block to the
    /// final block whose move is still live.
    pub fn last(&mut self) -> Option<usize> {
        let first = self.run_buffer()?;
        let mut bp = first;
        loop {
            let nx = next_index(bp);
            if self.blocks[nx].move_state == MoveState::Off || nx == first {
                return Some(bp);
            }
            bp = nx;
            if bp == first {
                return Some(bp);
            }
        }
    }

    /// Zeroes a block in place. Ring position is index-derived, so nothing
    /// needs preserving.
    pub fn clear_block(&mut self, idx: usize) {
        self.blocks[idx] = Block::default();
    }

    /// Copies `src`'s contents over `dst`. Used by hold replanning to
    /// shuffle the queue down a slot.
    pub fn copy_block(&mut self, dst: usize, src: usize) {
        self.blocks[dst] = self.blocks[src];
    }
}

impl core::ops::Index<usize> for BlockPool {
    type Output = Block;
    fn index(&self, idx: usize) -> &Block {
        &self.blocks[idx]
    }
}

impl core::ops::IndexMut<usize> for BlockPool {
    fn index_mut(&mut self, idx: usize) -> &mut Block {
        &mut self.blocks[idx]
    }
}

impl Block {
    /// Whether this block's planned length is effectively zero.
    pub fn is_empty_move(&self) -> bool {
        fp::fp_zero(self.length)
    }
}
