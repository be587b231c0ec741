//! Constant-jerk acceleration-line planning.
//!
//! A queued move is shaped into a velocity trapezoid whose ramps are jerk
//! limited S-curves: `head` accelerates from the entry velocity to cruise,
//! `body` holds cruise, `tail` decelerates to the exit velocity. Planning
//! works over the whole ring: committing a new block runs a backward pass
//! that raises the braking velocity available to each predecessor, then a
//! forward pass that chooses entry/exit velocities and refits every still
//! replannable trapezoid. Blocks whose exit velocity has reached its
//! optimum are frozen so the passes touch only the live end of the queue.
//!
//! Two closed forms carry all of the jerk math. For maximum jerk `J`,
//! the length needed to change between velocities `Vi` and `Vt` is
//! `L = |Vi-Vt| * sqrt(|Vi-Vt|/J)`, and the velocity reachable from `Vi`
//! over length `L` is `Vt = L^(2/3) * cbrt(J) + Vi`.
//!
//! The planner also owns the *hold* machinery that brings motion to a
//! controlled stop along the already planned path, replanning the queue
//! down to zero velocity and back up from zero (see `plan_hold_callback`).
//!
//! All math is in user units and minutes, double precision.

use crate::block::{next_index, prev_index, Block, BlockPool, MoveState, POOL_SIZE};
use crate::fp;
use crate::{Axis, AXIS_COUNT};
use proto::Status;

/// Nominal segment duration handed to the step generator.
pub(crate) const NOM_SEGMENT_USEC: f64 = 5000.0;
/// Segments shorter than this are not worth running; the block is skipped.
pub(crate) const MIN_SEGMENT_USEC: f64 = 2500.0;
pub(crate) const MIN_SEGMENT_TIME: f64 = MIN_SEGMENT_USEC / fp::MICROSECONDS_PER_MINUTE;

/// Jerk values closer than this reuse the cached 1/J and cbrt(J) terms.
const JERK_MATCH_PRECISION: f64 = 1000.0;

/// Relative cruise-velocity convergence for the asymmetric rate-limited fit.
const TRAPEZOID_ITERATION_ERROR: f64 = 0.001;
/// Allowable length error when deciding whether a move exactly fits.
const TRAPEZOID_LENGTH_FIT_TOLERANCE: f64 = 0.0001;

/// Overall motion state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MotionState {
    #[default]
    Stop,
    Run,
    Hold,
}

/// Progress of a hold. See `plan_hold_callback`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum HoldState {
    #[default]
    Off,
    /// Waiting for the executor to finish the segment in flight.
    Sync,
    /// Mainline must replan the queue for the stop.
    Plan,
    /// Decelerating along the replanned tail.
    Decel,
    /// Stopped; motion resumes via `end_hold`.
    Hold,
}

/// Planner runtime: the parameters of the currently running block, copied
/// out of the ring when execution starts so later replanning cannot disturb
/// a move in flight, plus per-segment bookkeeping for the executor.
#[derive(Default)]
pub struct Planner {
    pub(crate) move_state: MoveState,
    pub(crate) section_state: MoveState,

    /// Final target of the running block, used to erase accumulated
    /// rounding on its last segment.
    pub(crate) endpoint: [f64; AXIS_COUNT],
    pub(crate) position: [f64; AXIS_COUNT],
    pub(crate) target: [f64; AXIS_COUNT],
    /// Where the last planned block ends; newly queued blocks chain their
    /// targets from here.
    planned_target: [f64; AXIS_COUNT],
    pub(crate) unit: [f64; AXIS_COUNT],
    pub(crate) reverse: [bool; AXIS_COUNT],
    pub(crate) pulses_per_unit: [f64; AXIS_COUNT],

    pub(crate) head_length: f64,
    pub(crate) body_length: f64,
    pub(crate) tail_length: f64,
    pub(crate) entry_velocity: f64,
    pub(crate) cruise_velocity: f64,
    pub(crate) exit_velocity: f64,

    pub(crate) move_time: f64,
    pub(crate) midpoint_velocity: f64,
    pub(crate) jerk: f64,

    /// Segments per section half (head/tail) or section (body).
    pub(crate) segments: f64,
    pub(crate) segment_count: u32,
    pub(crate) segment_move_time: f64,
    pub(crate) microseconds: f64,
    pub(crate) segment_velocity: f64,
    pub(crate) forward_diff_1: f64,
    pub(crate) forward_diff_2: f64,

    previous_jerk: f64,
    previous_reciprocal_jerk: f64,
    previous_cube_root_jerk: f64,

    pub(crate) motion_state: MotionState,
    pub(crate) hold_state: HoldState,
}

/// Length required to change from `vi` to `vt` at maximum jerk.
pub(crate) fn target_length(vi: f64, vt: f64, reciprocal_jerk: f64) -> f64 {
    libm::fabs(vi - vt) * libm::sqrt(libm::fabs(vi - vt) * reciprocal_jerk)
}

/// Velocity reachable from `vi` over `length` at maximum jerk.
pub(crate) fn target_velocity(vi: f64, length: f64, cube_root_jerk: f64) -> f64 {
    libm::pow(length, 2.0 / 3.0) * cube_root_jerk + vi
}

impl Planner {
    /// Overwrites the tracked position of one axis. Every move is planned
    /// relative, so the controller zeroes both axes before each motion.
    pub fn set_axis_position(&mut self, axis: Axis, position: f64) {
        self.position[axis.index()] = position;
        self.planned_target[axis.index()] = position;
    }

    /// Updates the cached step rate for one axis. Must be called whenever
    /// a setting that feeds the derivation changes.
    pub fn set_pulses_per_unit(&mut self, axis: Axis, value: f64) {
        self.pulses_per_unit[axis.index()] = value;
    }

    pub fn motion_state(&self) -> MotionState {
        self.motion_state
    }

    pub fn hold_state(&self) -> HoldState {
        self.hold_state
    }

    /// Plans one accelerated line into the ring.
    ///
    /// `distances` must be non-negative with exactly one axis non-zero;
    /// direction travels separately in `reverse`. On success the block is
    /// written and planned but not yet committed; the caller queues it,
    /// which is what publishes it to the executor.
    pub fn plan_acceleration_line(
        &mut self,
        pool: &mut BlockPool,
        distances: [f64; AXIS_COUNT],
        reverse: [bool; AXIS_COUNT],
        speed: f64,
        max_jerk: f64,
    ) -> Result<(), Status> {
        // Identify the moving axis before claiming a block so a degenerate
        // request cannot strand a claimed-but-never-queued buffer.
        let axis = if fp::fp_nonzero(distances[Axis::Z.index()]) {
            Axis::Z
        } else if fp::fp_nonzero(distances[Axis::R.index()]) {
            Axis::R
        } else {
            return Err(Status::MoveLengthTooSmall);
        };

        let idx = pool
            .get_write_buffer()
            .ok_or(Status::PlannerBufferFull)?;

        self.planned_target[axis.index()] += distances[axis.index()];
        let planned = self.planned_target;
        let bf = &mut pool[idx];
        bf.jerk = max_jerk;
        bf.cruise_vmax = speed;
        bf.reverse = reverse;
        bf.length = distances[axis.index()];
        bf.unit[axis.index()] = 1.0;
        bf.target = planned;

        if libm::fabs(bf.jerk - self.previous_jerk) < JERK_MATCH_PRECISION {
            bf.cube_root_jerk = self.previous_cube_root_jerk;
            bf.reciprocal_jerk = self.previous_reciprocal_jerk;
        } else {
            bf.cube_root_jerk = libm::cbrt(bf.jerk);
            bf.reciprocal_jerk = 1.0 / bf.jerk;
            self.previous_jerk = bf.jerk;
            self.previous_cube_root_jerk = bf.cube_root_jerk;
            self.previous_reciprocal_jerk = bf.reciprocal_jerk;
        }

        // Assume continuous path control until planning proves otherwise.
        bf.replannable = true;

        bf.entry_vmax = bf.cruise_vmax;
        bf.delta_vmax = target_velocity(0.0, bf.length, bf.cube_root_jerk);
        bf.exit_vmax = bf.cruise_vmax.min(bf.delta_vmax);
        bf.braking_velocity = bf.delta_vmax;

        self.motion_state = MotionState::Run;

        let mut runtime_flag = false;
        self.plan_block_list(pool, idx, &mut runtime_flag);
        Ok(())
    }

    /// Plans all blocks between the start of the replannable run and `bf`
    /// (the newest block, last in time).
    ///
    /// The backward pass walks from `bf` toward the running block,
    /// accumulating how much velocity each block could shed if everything
    /// after it braked at max jerk. The forward pass then fixes entry and
    /// exit velocities and refits each trapezoid, pruning blocks from
    /// future replanning once their exit velocity is provably optimal.
    ///
    /// `runtime_flag` pins the first forward block's entry velocity to its
    /// entry vmax; hold replanning uses that to account for the runtime's
    /// in-flight velocity.
    fn plan_block_list(&mut self, pool: &mut BlockPool, bf: usize, runtime_flag: &mut bool) {
        let mut bp = bf;

        // Backward pass. Ends with bp on the first buffer before the
        // replannable list.
        loop {
            bp = prev_index(bp);
            if bp == bf || !pool[bp].replannable {
                break;
            }
            let nx = next_index(bp);
            pool[bp].braking_velocity =
                pool[nx].entry_vmax.min(pool[nx].braking_velocity) + pool[bp].delta_vmax;
        }

        // Forward pass: recompute the trapezoids up to (not including) bf.
        loop {
            bp = next_index(bp);
            if bp == bf {
                break;
            }
            let pv = prev_index(bp);
            let nx = next_index(bp);

            pool[bp].entry_velocity = if pv == bf || *runtime_flag {
                *runtime_flag = false;
                pool[bp].entry_vmax
            } else {
                pool[pv].exit_velocity
            };

            pool[bp].cruise_velocity = pool[bp].cruise_vmax;
            pool[bp].exit_velocity = fp::min4(
                pool[bp].exit_vmax,
                pool[nx].braking_velocity,
                pool[nx].entry_vmax,
                pool[bp].entry_velocity + pool[bp].delta_vmax,
            );

            calculate_trapezoid(&mut pool[bp]);

            // Only exit conditions need checking for optimal planning.
            if pool[bp].exit_velocity == pool[bp].exit_vmax
                || pool[bp].exit_velocity == pool[nx].entry_vmax
                || (!pool[pv].replannable
                    && pool[bp].exit_velocity
                        == pool[bp].entry_velocity + pool[bp].delta_vmax)
            {
                pool[bp].replannable = false;
            }
        }

        // Finish up the newest block: it always plans to a stop.
        let pv = prev_index(bp);
        pool[bp].entry_velocity = pool[pv].exit_velocity;
        pool[bp].cruise_velocity = pool[bp].cruise_vmax;
        pool[bp].exit_velocity = 0.0;
        calculate_trapezoid(&mut pool[bp]);
    }

    /// Marks every live block replannable so a hold can recompute the
    /// whole queue.
    fn reset_replannable_list(&mut self, pool: &mut BlockPool) {
        let first = match pool.first() {
            Some(idx) => idx,
            None => return,
        };
        let mut bp = first;
        loop {
            pool[bp].replannable = true;
            let nx = next_index(bp);
            if nx == first || pool[nx].move_state == MoveState::Off {
                break;
            }
            bp = nx;
        }
    }

    /// Velocity of the segment the executor would run next.
    pub(crate) fn compute_next_segment_velocity(&self) -> f64 {
        if self.move_state == MoveState::Body {
            self.segment_velocity
        } else {
            self.segment_velocity + self.forward_diff_1
        }
    }

    /// Initiates a hold. The executor finishes the segment in flight, then
    /// hands control here via the `Plan` state.
    pub fn begin_hold(&mut self) {
        self.motion_state = MotionState::Hold;
        self.hold_state = HoldState::Sync;
    }

    /// Releases a hold. Returns `Status::Success` when buffered moves
    /// remain (the caller must request execution) and `Status::Noop` when
    /// the queue is empty.
    pub fn end_hold(&mut self, pool: &mut BlockPool) -> Status {
        self.hold_state = HoldState::Off;
        if pool.run_buffer().is_none() {
            self.motion_state = MotionState::Stop;
            Status::Noop
        } else {
            self.motion_state = MotionState::Run;
            Status::Success
        }
    }

    /// Clears motion state after the queue drains or is cleared.
    pub fn end_move(&mut self) {
        self.motion_state = MotionState::Stop;
        self.hold_state = HoldState::Off;
        self.segment_velocity = 0.0;
    }

    /// Replans the queue to decelerate to zero for a hold. Runs from the
    /// mainline, keyed off the `Plan` hold state the executor sets after
    /// finishing the in-flight segment.
    ///
    /// Case 1: the stopping distance fits inside what remains of the
    /// running block. The runtime is retargeted as a pure tail to zero and
    /// the running block's ring slot is reused as the hold point, drawing
    /// whatever length is left over; everything behind it is replanned to
    /// accelerate from zero.
    ///
    /// Case 2: the stop spans block boundaries. The runtime sheds what it
    /// can over its remaining length, then the queue is walked forward,
    /// shedding velocity through each block until the deceleration fits;
    /// that block is split into a decel-to-zero and an accel-from-zero
    /// pair. The walk shuffles each block's contents down a slot, reusing
    /// the running block's slot as scratch.
    pub fn plan_hold_callback(&mut self, pool: &mut BlockPool) -> Status {
        if self.hold_state != HoldState::Plan {
            return Status::Noop;
        }

        let mut bp = match pool.run_buffer() {
            Some(idx) => idx,
            None => return Status::Noop,
        };

        // Tell the replan below to respect the runtime's entry velocity.
        let mut runtime_flag = true;

        let dz = self.endpoint[Axis::Z.index()] - self.position[Axis::Z.index()];
        let dr = self.endpoint[Axis::R.index()] - self.position[Axis::R.index()];
        let available_runtime_length = libm::sqrt(dz * dz + dr * dr);

        let mut braking_velocity = self.compute_next_segment_velocity();
        let mut braking_length =
            target_length(braking_velocity, 0.0, pool[bp].reciprocal_jerk);

        // Perfect-fit decelerations (homing does this) would otherwise land
        // in case 2 with a zero-length remainder; clamp them into case 1.
        if braking_length > available_runtime_length && fp::fp_zero(pool[bp].exit_velocity) {
            braking_length = available_runtime_length;
        }

        if braking_length <= available_runtime_length {
            // Case 1: deceleration fits entirely in the runtime.
            self.exit_velocity = 0.0;
            self.tail_length = braking_length;
            self.cruise_velocity = braking_velocity;
            self.move_state = MoveState::Tail;
            self.section_state = MoveState::New;

            // Reuse the running block's slot as the hold point, drawing the
            // remaining length.
            let bf = &mut pool[bp];
            bf.length = available_runtime_length - braking_length;
            bf.delta_vmax = target_velocity(0.0, bf.length, bf.cube_root_jerk);
            bf.entry_vmax = 0.0;
            bf.move_state = MoveState::New; // tell the executor to rerun it

            self.reset_replannable_list(pool);
            if let Some(last) = pool.last() {
                self.plan_block_list(pool, last, &mut runtime_flag);
            }
            self.hold_state = HoldState::Decel;
            return Status::Success;
        }

        // Case 2: deceleration exceeds the runtime's remaining length.
        // First, replan the runtime to the minimum non-zero exit velocity
        // its length allows.
        self.move_state = MoveState::Tail;
        self.section_state = MoveState::New;
        self.tail_length = available_runtime_length;
        self.cruise_velocity = braking_velocity;
        self.exit_velocity = braking_velocity
            - target_velocity(0.0, available_runtime_length, pool[bp].cube_root_jerk);

        braking_velocity = self.exit_velocity;
        pool[bp].move_state = MoveState::New;

        // Walk forward to the block where the deceleration reaches zero.
        // Bounded by the pool size as a wraparound safety.
        for _ in 0..POOL_SIZE {
            let nx = next_index(bp);
            pool.copy_block(bp, nx);

            if pool[bp].move_type != crate::block::MoveType::Aline {
                bp = nx;
                continue;
            }

            pool[bp].entry_vmax = braking_velocity;
            braking_length = target_length(braking_velocity, 0.0, pool[bp].reciprocal_jerk);

            if braking_length > pool[bp].length {
                // Still does not fit; shed what this block can.
                pool[bp].exit_vmax = braking_velocity
                    - target_velocity(0.0, pool[bp].length, pool[bp].cube_root_jerk);
                braking_velocity = pool[bp].exit_vmax;
                bp = nx;
                continue;
            }
            break;
        }

        // The deceleration fits in bp: split it into a decel-to-zero block
        // and an accel-from-zero block (the pair started out identical).
        pool[bp].length = braking_length;
        pool[bp].exit_vmax = 0.0;

        bp = next_index(bp);
        pool[bp].entry_vmax = 0.0;
        pool[bp].length -= braking_length;
        pool[bp].delta_vmax = target_velocity(0.0, pool[bp].length, pool[bp].cube_root_jerk);
        pool[bp].exit_vmax = pool[bp].delta_vmax;

        self.reset_replannable_list(pool);
        if let Some(last) = pool.last() {
            self.plan_block_list(pool, last, &mut runtime_flag);
        }
        self.hold_state = HoldState::Decel;
        Status::Success
    }
}

fn min_head_length(bf: &Block) -> f64 {
    MIN_SEGMENT_TIME * (bf.cruise_velocity + bf.entry_velocity)
}

fn min_tail_length(bf: &Block) -> f64 {
    MIN_SEGMENT_TIME * (bf.cruise_velocity + bf.exit_velocity)
}

fn min_body_length(bf: &Block) -> f64 {
    MIN_SEGMENT_TIME * bf.cruise_velocity
}

/// Splits a block's length into head/body/tail for the requested entry,
/// cruise and exit velocities.
///
/// Section lengths must stay accurate, since they are what the executor
/// integrates, so degraded fits adjust velocities instead of lengths, and
/// always err slow. Requires `entry <= cruise >= exit` on entry.
///
/// Cases, in the order tested:
/// - too short to change between entry and exit: degrade the faster end,
///   run as a pure tail or head, fall back to a one-segment body, or mark
///   the block skipped if even that is too short;
/// - rate limited (head + tail exceed the length): split symmetrically
///   when entry and exit are close, otherwise iterate head/tail
///   proportions to convergence on a reachable cruise velocity;
/// - requested fit: the remainder becomes the body; a sub-minimum body is
///   folded into the ramps, and a standalone body runs at the entry
///   velocity to remove any velocity discontinuity.
pub(crate) fn calculate_trapezoid(bf: &mut Block) {
    bf.head_length = 0.0;
    bf.body_length = 0.0;
    bf.tail_length = 0.0;

    // Adaptive velocity tolerance for the symmetric rate-limited test.
    let velocity_tolerance = 2.0f64.max(bf.entry_velocity / 100.0);

    let minimum_length = target_length(bf.entry_velocity, bf.exit_velocity, bf.reciprocal_jerk);

    if bf.length <= minimum_length + min_body_length(bf) {
        if bf.entry_velocity > bf.exit_velocity {
            // Tail cases.
            if bf.length < minimum_length - TRAPEZOID_LENGTH_FIT_TOLERANCE {
                // Degraded: entry cannot be met in this length.
                bf.entry_velocity =
                    target_velocity(bf.exit_velocity, bf.length, bf.cube_root_jerk);
            }
            bf.cruise_velocity = bf.entry_velocity;

            if bf.length >= min_tail_length(bf) {
                // Run as a two-or-more segment tail.
                bf.tail_length = bf.length;
            } else if bf.length > min_body_length(bf) {
                // Run as a single segment body.
                bf.body_length = bf.length;
            } else {
                bf.move_state = MoveState::Skip;
            }
            return;
        }

        if bf.entry_velocity < bf.exit_velocity {
            // Head cases.
            if bf.length < minimum_length - TRAPEZOID_LENGTH_FIT_TOLERANCE {
                // Degraded: exit cannot be met in this length.
                bf.exit_velocity =
                    target_velocity(bf.entry_velocity, bf.length, bf.cube_root_jerk);
            }
            bf.cruise_velocity = bf.exit_velocity;

            if bf.length >= min_head_length(bf) {
                bf.head_length = bf.length;
            } else if bf.length > min_body_length(bf) {
                bf.body_length = bf.length;
            } else {
                bf.move_state = MoveState::Skip;
            }
            return;
        }
    }

    // Set tentative ramp lengths for the requested velocities.
    bf.head_length = target_length(bf.entry_velocity, bf.cruise_velocity, bf.reciprocal_jerk);
    bf.tail_length = target_length(bf.exit_velocity, bf.cruise_velocity, bf.reciprocal_jerk);
    if bf.head_length < min_head_length(bf) {
        bf.head_length = 0.0;
    }
    if bf.tail_length < min_tail_length(bf) {
        bf.tail_length = 0.0;
    }

    if bf.length < bf.head_length + bf.tail_length {
        // Rate limited: the requested cruise velocity is unreachable.

        if libm::fabs(bf.entry_velocity - bf.exit_velocity) < velocity_tolerance {
            // Symmetric: split the length and recompute cruise.
            bf.head_length = bf.length / 2.0;
            bf.tail_length = bf.head_length;
            bf.cruise_velocity = bf.cruise_vmax.min(target_velocity(
                bf.entry_velocity,
                bf.head_length,
                bf.cube_root_jerk,
            ));
            return;
        }

        // Asymmetric: iterate head/tail proportions to a reachable cruise.
        // Relatively expensive, but rarely hit.
        let mut computed_velocity = bf.cruise_vmax;
        loop {
            bf.cruise_velocity = computed_velocity;
            bf.head_length =
                target_length(bf.entry_velocity, bf.cruise_velocity, bf.reciprocal_jerk);
            bf.tail_length =
                target_length(bf.exit_velocity, bf.cruise_velocity, bf.reciprocal_jerk);

            if bf.head_length > bf.tail_length {
                bf.head_length =
                    (bf.head_length / (bf.head_length + bf.tail_length)) * bf.length;
                computed_velocity =
                    target_velocity(bf.entry_velocity, bf.head_length, bf.cube_root_jerk);
            } else {
                bf.tail_length =
                    (bf.tail_length / (bf.head_length + bf.tail_length)) * bf.length;
                computed_velocity =
                    target_velocity(bf.exit_velocity, bf.tail_length, bf.cube_root_jerk);
            }
            if libm::fabs(bf.cruise_velocity - computed_velocity) / computed_velocity
                <= TRAPEZOID_ITERATION_ERROR
            {
                break;
            }
        }

        bf.cruise_velocity = computed_velocity;
        bf.head_length =
            target_length(bf.entry_velocity, bf.cruise_velocity, bf.reciprocal_jerk);
        bf.tail_length = bf.length - bf.head_length;

        if bf.head_length < min_head_length(bf) {
            // Clip to an all-tail move.
            bf.tail_length = bf.length;
            bf.head_length = 0.0;
        }
        if bf.tail_length < min_tail_length(bf) {
            // ... or an all-head move.
            bf.head_length = bf.length;
            bf.tail_length = 0.0;
        }
        return;
    }

    // Requested fit: the remainder is the body.
    bf.body_length = bf.length - bf.head_length - bf.tail_length;

    if bf.body_length < min_body_length(bf) && fp::fp_nonzero(bf.body_length) {
        // A non-zero body below the minimum is folded into the ramps. The
        // small velocity error this creates is acceptable; the distance
        // stays exact.
        if fp::fp_nonzero(bf.head_length) {
            if fp::fp_nonzero(bf.tail_length) {
                // HBT reduces to HT.
                bf.head_length += bf.body_length / 2.0;
                bf.tail_length += bf.body_length / 2.0;
            } else {
                // HB reduces to H.
                bf.head_length += bf.body_length;
            }
        } else {
            // BT reduces to T.
            bf.tail_length += bf.body_length;
        }
        bf.body_length = 0.0;
    } else if fp::fp_zero(bf.head_length) && fp::fp_zero(bf.tail_length) {
        // Standalone body: run at the entry velocity so there is no
        // velocity step at either end.
        bf.cruise_velocity = bf.entry_velocity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockPool, MoveType};

    const JERK: f64 = 100_000.0 * 1e6;
    const SPEED: f64 = 12_000.0;

    /// Plans and commits one Z line. A fresh pool hands out slots
    /// sequentially from zero, so callers track indices by call order.
    fn plan(pool: &mut BlockPool, planner: &mut Planner, length: f64) {
        planner
            .plan_acceleration_line(pool, [length, 0.0], [false, false], SPEED, JERK)
            .unwrap();
        pool.queue_write_buffer(MoveType::Aline);
    }

    #[test]
    fn closed_forms_are_inverses() {
        let reciprocal = 1.0 / JERK;
        let cube_root = libm::cbrt(JERK);
        for &dv in &[10.0, 500.0, 12_000.0] {
            let len = target_length(0.0, dv, reciprocal);
            let back = target_velocity(0.0, len, cube_root);
            assert!((back - dv).abs() / dv < 1e-9, "dv {} -> {}", dv, back);
        }
    }

    #[test]
    fn single_block_plans_to_rest() {
        let mut pool = BlockPool::default();
        let mut planner = Planner::default();
        plan(&mut pool, &mut planner, 5000.0);

        let bf = &pool[0];
        assert_eq!(bf.entry_velocity, 0.0);
        assert_eq!(bf.exit_velocity, 0.0);
        assert!(bf.cruise_velocity <= SPEED + 1e-9);
        let total = bf.head_length + bf.body_length + bf.tail_length;
        assert!(
            (total - 5000.0).abs() < 1e-3,
            "sections sum to {} not 5000",
            total
        );
    }

    #[test]
    fn planner_rejects_zero_length_moves() {
        let mut pool = BlockPool::default();
        let mut planner = Planner::default();
        let err = planner
            .plan_acceleration_line(&mut pool, [0.0, 0.0], [false, false], SPEED, JERK)
            .unwrap_err();
        assert_eq!(err, Status::MoveLengthTooSmall);
        assert_eq!(pool.available(), POOL_SIZE);
    }

    #[test]
    fn planner_buffer_exhaustion_reports_full() {
        let mut pool = BlockPool::default();
        let mut planner = Planner::default();
        for _ in 0..POOL_SIZE {
            plan(&mut pool, &mut planner, 100.0);
        }
        let err = planner
            .plan_acceleration_line(&mut pool, [100.0, 0.0], [false, false], SPEED, JERK)
            .unwrap_err();
        assert_eq!(err, Status::PlannerBufferFull);
    }

    #[test]
    fn chained_blocks_satisfy_monotonic_safety() {
        let mut pool = BlockPool::default();
        let mut planner = Planner::default();

        let lengths = [400.0, 2500.0, 90.0, 5000.0, 30.0, 1200.0];
        for &len in &lengths {
            plan(&mut pool, &mut planner, len);
        }

        for i in 0..lengths.len() - 1 {
            let j = i + 1;
            let exit = pool[i].exit_velocity;
            let bound = fp::min4(
                pool[i].exit_vmax,
                pool[j].entry_vmax,
                pool[j].braking_velocity,
                pool[i].entry_velocity + pool[i].delta_vmax,
            );
            assert!(
                exit <= bound + 1e-6,
                "block {} exit {} exceeds bound {}",
                i,
                exit,
                bound
            );
        }
        // The newest block always plans to a stop.
        assert_eq!(pool[lengths.len() - 1].exit_velocity, 0.0);
    }

    #[test]
    fn trapezoid_sections_sum_to_length() {
        let cases = [
            // (entry, cruise, exit, length)
            (0.0, SPEED, 0.0, 5000.0),  // full trapezoid
            (0.0, SPEED, 0.0, 120.0),   // rate-limited symmetric
            (0.0, SPEED, 3000.0, 900.0),
            (3000.0, SPEED, 0.0, 900.0),
            (2000.0, SPEED, 2000.0, 2500.0),
        ];
        for &(entry, cruise, exit, length) in &cases {
            let mut bf = Block {
                entry_velocity: entry,
                cruise_velocity: cruise,
                exit_velocity: exit,
                cruise_vmax: cruise,
                length,
                jerk: JERK,
                reciprocal_jerk: 1.0 / JERK,
                cube_root_jerk: libm::cbrt(JERK),
                ..Block::default()
            };
            calculate_trapezoid(&mut bf);
            if bf.move_state == MoveState::Skip {
                continue;
            }
            let total = bf.head_length + bf.body_length + bf.tail_length;
            assert!(
                (total - length).abs() < 1e-4,
                "case {:?}: sections sum {} != {}",
                (entry, cruise, exit, length),
                total,
                length
            );
            // Velocity errors must land on the slow side.
            assert!(bf.cruise_velocity <= cruise + 1e-9);
        }
    }

    #[test]
    fn degraded_tail_lowers_entry() {
        // A block far too short to shed its entry velocity degrades entry
        // down to what the length affords, exit held.
        let mut bf = Block {
            entry_velocity: SPEED,
            cruise_velocity: SPEED,
            exit_velocity: 0.0,
            cruise_vmax: SPEED,
            length: 1.0,
            jerk: JERK,
            reciprocal_jerk: 1.0 / JERK,
            cube_root_jerk: libm::cbrt(JERK),
            ..Block::default()
        };
        calculate_trapezoid(&mut bf);
        assert!(bf.entry_velocity < SPEED);
        assert_eq!(bf.entry_velocity, bf.cruise_velocity);
    }

    #[test]
    fn unplannable_scraps_are_skipped() {
        let mut bf = Block {
            entry_velocity: SPEED,
            cruise_velocity: SPEED,
            exit_velocity: 0.0,
            cruise_vmax: SPEED,
            length: 1e-7,
            jerk: JERK,
            reciprocal_jerk: 1.0 / JERK,
            cube_root_jerk: libm::cbrt(JERK),
            ..Block::default()
        };
        calculate_trapezoid(&mut bf);
        assert_eq!(bf.move_state, MoveState::Skip);
    }

    #[test]
    fn jerk_terms_are_cached_across_matching_moves() {
        let mut pool = BlockPool::default();
        let mut planner = Planner::default();
        plan(&mut pool, &mut planner, 1000.0);
        let recip = pool[0].reciprocal_jerk;

        // A jerk within the match precision reuses the cached terms
        // verbatim rather than recomputing them.
        planner
            .plan_acceleration_line(&mut pool, [1000.0, 0.0], [false, false], SPEED, JERK + 1.0)
            .unwrap();
        assert_eq!(pool[1].reciprocal_jerk, recip);

        // A jerk outside the precision recomputes.
        planner
            .plan_acceleration_line(&mut pool, [1000.0, 0.0], [false, false], SPEED, JERK / 2.0)
            .unwrap();
        assert!((pool[2].reciprocal_jerk - 2.0 / JERK).abs() < 1e-18);
    }
}
