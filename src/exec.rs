//! Segment execution for accelerated lines.
//!
//! Runs from the exec software interrupt. Each invocation stages *one and
//! only one* segment: `Eagain` means the block has more segments, `Success`
//! means the block finished (and was freed), `Noop` means there was nothing
//! to do. The interrupt sequencing depends on that contract precisely: a
//! routine that staged two segments, or reported done with one pending,
//! would corrupt the prep handoff in ways that are miserable to debug.
//!
//! A block executes as head → body → tail. The ramp sections are S-curves
//! traced with forward differences over two quadratic halves: for segment
//! count `n` per half, `h = 1/n`, and with the control point equal to the
//! start point the usual `Ah² + Bh` initialization collapses to
//! `fd1 = fd2/2 = (v_end − v_start)·h²`. At the half's midpoint only the
//! sign of `fd2` flips. The body runs at constant cruise velocity but is
//! still chopped into segments so a hold can engage mid-line with bounded
//! latency.
//!
//! Once the runtime is initialized from a block, the block's contents no
//! longer affect execution; hold replanning exploits that by rewriting the
//! block ring underneath a running move.

use crate::block::{next_index, MoveState, MoveType};
use crate::fp::{self, usec};
use crate::motion::{Motion, Signals};
use crate::planner::{HoldState, MotionState, MIN_SEGMENT_USEC, NOM_SEGMENT_USEC};
use crate::AXIS_COUNT;
use proto::Status;

impl Motion {
    /// Dispatches the running block to its executor.
    pub(crate) fn execute_run_buffer(&mut self, signals: &mut Signals) -> Status {
        let bf = match self.pool.run_buffer() {
            Some(idx) => idx,
            None => return Status::Noop, // nothing is running
        };
        match self.pool[bf].move_type {
            MoveType::Aline => self.exec_aline(bf, signals),
            // Only alines are ever queued; anything else is corruption.
            MoveType::Null => Status::InternalError,
        }
    }

    fn exec_aline(&mut self, bf: usize, signals: &mut Signals) -> Status {
        if self.pool[bf].move_state == MoveState::Off {
            return Status::Noop;
        }

        if self.planner.move_state == MoveState::Off {
            if self.planner.hold_state == HoldState::Hold {
                // Holding; stage nothing until the hold ends.
                return Status::Noop;
            }

            // Initialization to process the new incoming block.
            self.pool[bf].replannable = false;

            if self.pool[bf].is_empty_move() {
                self.planner.move_state = MoveState::Off;
                self.planner.section_state = MoveState::Off;
                // Prevent overplanning the successor of a vanished move.
                let nx = next_index(bf);
                self.pool[nx].replannable = false;
                self.stepper.set_next_segment_null(); // keep the loader in lockstep
                self.pool.free_run_buffer();
                return Status::Noop;
            }

            self.pool[bf].move_state = MoveState::Run;
            let block = self.pool[bf];
            let p = &mut self.planner;
            p.move_state = MoveState::Head;
            p.section_state = MoveState::New;
            p.jerk = block.jerk;
            p.head_length = block.head_length;
            p.body_length = block.body_length;
            p.tail_length = block.tail_length;
            p.entry_velocity = block.entry_velocity;
            p.cruise_velocity = block.cruise_velocity;
            p.exit_velocity = block.exit_velocity;
            p.unit = block.unit;
            p.reverse = block.reverse;
            // The final target, used to erase rounding on the last segment.
            p.endpoint = block.target;
        }

        // From here on the block's contents do not affect execution.
        let status = match self.planner.move_state {
            MoveState::Head => self.exec_aline_head(signals),
            MoveState::Body => self.exec_aline_body(signals),
            MoveState::Tail => self.exec_aline_tail(signals),
            MoveState::Skip => Status::Success,
            // Only the section states above are reachable once running.
            _ => Status::Success,
        };

        // Hold processing. The segment just staged is the last pre-hold
        // segment: promoting Sync to Plan here guarantees the mainline
        // replans before anything past it runs.
        if self.planner.hold_state == HoldState::Sync {
            self.planner.hold_state = HoldState::Plan;
        }

        // End of the hold deceleration: park.
        if self.planner.hold_state == HoldState::Decel && status == Status::Success {
            self.planner.hold_state = HoldState::Hold;
            self.planner.motion_state = MotionState::Hold;
        }

        // Three possibilities now:
        //   Eagain                    more segments to run in this block
        //   Success, block Run        block and runtime both done: free it
        //   Success, block New        runtime done; block was rewritten by
        //                             hold planning and must run again
        if status != Status::Eagain {
            self.planner.move_state = MoveState::Off;
            self.planner.section_state = MoveState::Off;
            let nx = next_index(bf);
            self.pool[nx].replannable = false;
            if self.pool[bf].move_state == MoveState::Run {
                self.pool.free_run_buffer();
            }
        }

        status
    }

    /// Acceleration section.
    fn exec_aline_head(&mut self, signals: &mut Signals) -> Status {
        if self.planner.section_state == MoveState::New {
            if fp::fp_zero(self.planner.head_length) {
                self.planner.move_state = MoveState::Body;
                return self.exec_aline_body(signals); // skip ahead
            }

            let p = &mut self.planner;
            p.midpoint_velocity = (p.entry_velocity + p.cruise_velocity) / 2.0;
            p.move_time = p.head_length / p.midpoint_velocity;
            // Segment count per *half* of the S-curve.
            p.segments = libm::ceil(usec(p.move_time) / (2.0 * NOM_SEGMENT_USEC));
            p.segment_move_time = p.move_time / (2.0 * p.segments);
            p.segment_count = p.segments as u32;

            p.microseconds = usec(p.segment_move_time);
            if p.microseconds < MIN_SEGMENT_USEC {
                // Too short to interpolate; drop without advancing position.
                return Status::BlockSkipped;
            }

            let (entry, midpoint) = (p.entry_velocity, p.midpoint_velocity);
            p.init_forward_diffs(entry, midpoint);
            p.section_state = MoveState::Run;
        }

        if self.planner.section_state == MoveState::Run {
            // Concave half of the S.
            self.planner.segment_velocity += self.planner.forward_diff_1;
            if self.exec_aline_segment(false) == Status::Complete {
                // Set up the convex half: it continues from where the
                // concave half ended, and only fd2 changes sign.
                self.planner.segment_count = self.planner.segments as u32;
                self.planner.section_state = MoveState::Run2;
                self.planner.forward_diff_2 = -self.planner.forward_diff_2;
            } else {
                self.planner.forward_diff_1 += self.planner.forward_diff_2;
            }
            return Status::Eagain;
        }

        if self.planner.section_state == MoveState::Run2 {
            // Convex half of the S.
            self.planner.segment_velocity += self.planner.forward_diff_1;
            self.planner.forward_diff_1 += self.planner.forward_diff_2;
            if self.exec_aline_segment(false) == Status::Complete {
                if fp::fp_zero(self.planner.body_length) && fp::fp_zero(self.planner.tail_length)
                {
                    return Status::Success; // move ends here
                }
                self.planner.move_state = MoveState::Body;
                self.planner.section_state = MoveState::New;
            }
        }

        Status::Eagain
    }

    /// Cruise section. Chopped into segments despite the constant velocity
    /// so holds can engage mid-line with bounded latency.
    fn exec_aline_body(&mut self, signals: &mut Signals) -> Status {
        if self.planner.section_state == MoveState::New {
            if fp::fp_zero(self.planner.body_length) {
                self.planner.move_state = MoveState::Tail;
                signals.deceleration_started = true;
                return self.exec_aline_tail(signals); // skip ahead
            }

            let p = &mut self.planner;
            p.move_time = p.body_length / p.cruise_velocity;
            p.segments = libm::ceil(usec(p.move_time) / NOM_SEGMENT_USEC);
            p.segment_move_time = p.move_time / p.segments;
            p.segment_velocity = p.cruise_velocity;
            p.segment_count = p.segments as u32;

            p.microseconds = usec(p.segment_move_time);
            if p.microseconds < MIN_SEGMENT_USEC {
                return Status::BlockSkipped;
            }

            p.section_state = MoveState::Run;
        }

        if self.planner.section_state == MoveState::Run
            && self.exec_aline_segment(false) == Status::Complete
        {
            if fp::fp_zero(self.planner.tail_length) {
                return Status::Success;
            }
            self.planner.move_state = MoveState::Tail;
            signals.deceleration_started = true;
            self.planner.section_state = MoveState::New;
        }

        Status::Eagain
    }

    /// Deceleration section: the head mirrored, running cruise → exit.
    fn exec_aline_tail(&mut self, _signals: &mut Signals) -> Status {
        if self.planner.section_state == MoveState::New {
            if fp::fp_zero(self.planner.tail_length) {
                return Status::Success;
            }

            let p = &mut self.planner;
            p.midpoint_velocity = (p.cruise_velocity + p.exit_velocity) / 2.0;
            p.move_time = p.tail_length / p.midpoint_velocity;
            p.segments = libm::ceil(usec(p.move_time) / (2.0 * NOM_SEGMENT_USEC));
            p.segment_move_time = p.move_time / (2.0 * p.segments);
            p.segment_count = p.segments as u32;

            p.microseconds = usec(p.segment_move_time);
            if p.microseconds < MIN_SEGMENT_USEC {
                return Status::BlockSkipped;
            }

            let (cruise, midpoint) = (p.cruise_velocity, p.midpoint_velocity);
            p.init_forward_diffs(cruise, midpoint);
            p.section_state = MoveState::Run;
        }

        if self.planner.section_state == MoveState::Run {
            // Convex half of the deceleration.
            self.planner.segment_velocity += self.planner.forward_diff_1;
            if self.exec_aline_segment(false) == Status::Complete {
                self.planner.segment_count = self.planner.segments as u32;
                self.planner.section_state = MoveState::Run2;
                self.planner.forward_diff_2 = -self.planner.forward_diff_2;
            } else {
                self.planner.forward_diff_1 += self.planner.forward_diff_2;
            }
            return Status::Eagain;
        }

        if self.planner.section_state == MoveState::Run2 {
            // Concave half; the last segment carries endpoint correction.
            self.planner.segment_velocity += self.planner.forward_diff_1;
            self.planner.forward_diff_1 += self.planner.forward_diff_2;
            if self.exec_aline_segment(true) == Status::Complete {
                return Status::Success;
            }
        }

        Status::Eagain
    }

    /// Stages one segment: computes the segment's per-axis step counts and
    /// duration, hands them to the stepper, and advances the runtime
    /// position. `Complete` when the section has run all its segments.
    fn exec_aline_segment(&mut self, correction: bool) -> Status {
        let Motion {
            planner: p,
            stepper,
            ..
        } = self;

        if correction && p.segment_count == 1 && p.motion_state == MotionState::Run {
            // Last segment of the move: land exactly on the endpoint,
            // absorbing the rounding accumulated across segments.
            p.target = p.endpoint;
        } else {
            let travel = p.segment_velocity * p.segment_move_time;
            for i in 0..AXIS_COUNT {
                p.target[i] = p.position[i] + p.unit[i] * travel;
            }
        }

        let mut steps = [0.0; AXIS_COUNT];
        for i in 0..AXIS_COUNT {
            steps[i] = p.pulses_per_unit[i] * (p.target[i] - p.position[i]);
        }

        if stepper.set_next_segment(steps, p.reverse, p.microseconds) == Status::Success {
            p.position = p.target;
        }

        p.segment_count -= 1;
        if p.segment_count == 0 {
            Status::Complete // section has run all its segments
        } else {
            Status::Eagain
        }
    }
}

impl crate::planner::Planner {
    /// Initializes the forward differences for one quadratic half.
    ///
    /// With three control points T0, T1, T2 and T1 == T0, the quadratic
    /// coefficients reduce so that `fd1 = A·h²` and `fd2 = 2·A·h²` where
    /// `A = T2 − T0` and `h = 1/segments`.
    pub(crate) fn init_forward_diffs(&mut self, t0: f64, t2: f64) {
        let h = 1.0 / self.segments;
        let ah_squared = (t2 - t0) * h * h;
        self.forward_diff_1 = ah_squared;
        self.forward_diff_2 = 2.0 * ah_squared;
        self.segment_velocity = t0;
    }
}
