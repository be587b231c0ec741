//! Step pulse generation.
//!
//! Three execution levels cooperate here, highest priority first:
//!
//! - the DDA timer interrupt runs `dda_tick` at a fixed 40 kHz, emitting
//!   step pulses for both axes from integer phase accumulators;
//! - the load software interrupt copies a prepared segment into the DDA's
//!   private runtime when the previous segment's downcount reaches zero;
//! - the exec software interrupt asks the planner for the next segment,
//!   which lands in the prep buffer via `set_next_segment`.
//!
//! The prep buffer is double-buffered against the DDA runtime with a single
//! ownership flag: the executor prepares while it owns the buffer, flips
//! ownership to the loader and requests a load; the loader copies, flips it
//! back and requests the next prep. That flag is the only synchronizer, so
//! it is an acquire/release atomic.
//!
//! Step counts arrive as floats and are scaled by a large substep factor
//! before truncation, so per-segment fractional steps carry across segment
//! boundaries in the accumulators instead of being lost.

use crate::block::MoveType;
use crate::fp;
use crate::priority;
use crate::{Axis, AXES, AXIS_COUNT};
use core::sync::atomic::{AtomicU8, Ordering};
use proto::Status;
use smart_default::SmartDefault;

/// DDA timer frequency in Hz.
pub const F_DDA: f64 = 40_000.0;

/// Substep scaling factor: fractional steps are carried to five decimal
/// places of integer accumulator resolution. Lowering this costs real
/// positional accuracy.
pub const SUBSTEPS: f64 = 100_000.0;

/// If a new segment has fewer than 1/this of the previous segment's ticks,
/// the accumulators are preset rather than carried, at the cost of pulse
/// phase. Carrying them across that large a velocity jump risks stalls.
const ACCUMULATOR_RESET_FACTOR: u32 = 2;

/// Who may touch the prep buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExecutionState {
    /// A segment is staged; the loader may copy it out.
    OwnedByLoader = 0,
    /// The executor may stage the next segment.
    OwnedByExec = 1,
}

/// Hardware the step generator drives. The driver implements this over
/// GPIO; tests implement it over counters.
pub trait StepPins {
    /// Emits one full step pulse (rising and falling edge) on an axis.
    fn step(&mut self, axis: Axis);
    /// Latches the direction for an axis before its next pulse.
    fn set_direction(&mut self, axis: Axis, reverse: bool);
}

#[derive(Copy, Clone, Debug, Default)]
struct PrepMotor {
    /// Steps for the segment times the substep factor.
    phase_increment: u32,
    reverse: bool,
}

/// Staging buffer written by the executor, read by the loader.
#[derive(SmartDefault)]
pub struct PrepBuffer {
    move_type: MoveType,
    /// A segment is staged and ready. Cleared by the loader.
    armed: bool,
    #[default(AtomicU8::new(ExecutionState::OwnedByExec as u8))]
    execution_state: AtomicU8,
    /// Preset the accumulators instead of carrying them.
    reset_flag: bool,
    previous_ticks: u32,
    dda_ticks: u32,
    dda_ticks_x_substeps: u32,
    motors: [PrepMotor; AXIS_COUNT],
}

impl PrepBuffer {
    pub fn execution_state(&self) -> ExecutionState {
        if self.execution_state.load(Ordering::Acquire) == ExecutionState::OwnedByExec as u8 {
            ExecutionState::OwnedByExec
        } else {
            ExecutionState::OwnedByLoader
        }
    }

    fn set_execution_state(&self, state: ExecutionState) {
        self.execution_state.store(state as u8, Ordering::Release);
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct RunMotor {
    phase_increment: i32,
    phase_accumulator: i32,
}

/// DDA runtime, private to the step timer interrupt.
#[derive(Default)]
struct RunState {
    dda_ticks_downcount: i32,
    dda_ticks_x_substeps: i32,
    motors: [RunMotor; AXIS_COUNT],
}

/// The whole step generation subsystem.
#[derive(Default)]
pub struct Stepper {
    prep: PrepBuffer,
    run: RunState,
    /// Pending software-interrupt requests. The driver maps these onto its
    /// one-shot timers; the test harness polls them.
    exec_requested: bool,
    load_requested: bool,
}

impl Stepper {
    /// Whether a segment is mid-flight in the DDA.
    pub fn busy(&self) -> bool {
        self.run.dda_ticks_downcount != 0
    }

    pub fn prep(&self) -> &PrepBuffer {
        &self.prep
    }

    /// Requests an executor pass, if the executor owns the prep buffer.
    /// Otherwise a pass is already staged and the loader will re-request.
    pub fn request_exec(&mut self) {
        if self.prep.execution_state() == ExecutionState::OwnedByExec {
            self.exec_requested = true;
        }
    }

    /// Requests a load, if the DDA is idle. A busy DDA loads on its own at
    /// segment exhaustion, so interrupting it would find nothing to do.
    pub fn request_load(&mut self) {
        if !self.busy() {
            self.load_requested = true;
        }
    }

    /// Consumes a pending exec request. Driver/test glue only.
    pub fn take_exec_request(&mut self) -> bool {
        core::mem::replace(&mut self.exec_requested, false)
    }

    /// Consumes a pending load request. Driver/test glue only.
    pub fn take_load_request(&mut self) -> bool {
        core::mem::replace(&mut self.load_requested, false)
    }

    /// Hands the prep buffer to the loader. Called by the exec interrupt
    /// once the planner has staged a segment.
    pub fn release_to_loader(&mut self) {
        self.prep.set_execution_state(ExecutionState::OwnedByLoader);
    }

    /// Stages the next segment for the loader.
    ///
    /// `steps` are signed relative motion in steps and may be fractional;
    /// `microseconds` is how long the segment runs. Fails with
    /// `InternalError` if called while the loader owns the prep buffer.
    pub fn set_next_segment(
        &mut self,
        steps: [f64; AXIS_COUNT],
        reverse: [bool; AXIS_COUNT],
        microseconds: f64,
    ) -> Status {
        if self.prep.execution_state() != ExecutionState::OwnedByExec {
            return Status::InternalError;
        }
        if !microseconds.is_finite() {
            return Status::MoveLengthTooSmall;
        }
        if microseconds < fp::EPSILON {
            return Status::MoveTimeTooSmall;
        }

        self.prep.reset_flag = false;

        for axis in AXES.iter() {
            let i = axis.index();
            self.prep.motors[i].reverse = reverse[i];
            self.prep.motors[i].phase_increment = libm::fabs(steps[i] * SUBSTEPS) as u32;
        }

        self.prep.dda_ticks = ((microseconds / 1e6) * F_DDA) as u32;
        self.prep.dda_ticks_x_substeps = self.prep.dda_ticks * SUBSTEPS as u32;

        // Anti-stall: if the velocity jump between segments is too great,
        // the carried accumulator phase would delay pulses unacceptably.
        if self.prep.dda_ticks * ACCUMULATOR_RESET_FACTOR < self.prep.previous_ticks {
            self.prep.reset_flag = true;
        }
        self.prep.previous_ticks = self.prep.dda_ticks;

        self.prep.move_type = MoveType::Aline;
        self.prep.armed = true;
        Status::Success
    }

    /// Stages a do-nothing entry so the loader stays in lockstep when a
    /// block produces no motion.
    pub fn set_next_segment_null(&mut self) {
        self.prep.move_type = MoveType::Null;
        self.prep.armed = true;
    }

    /// The loader: copies the staged segment into the DDA runtime and
    /// starts the timer.
    ///
    /// Callable only at or above the DDA's priority (the DDA calls it
    /// directly at segment exhaustion; the load software interrupt is the
    /// path for everyone else). `OutOfMoves` means nothing was staged
    /// (the queue has drained), which the caller surfaces as motion
    /// complete.
    #[must_use]
    pub fn load_move(&mut self, pins: &mut dyn StepPins, _prio: &priority::Swi) -> LoadOutcome {
        if self.busy() {
            return LoadOutcome::StillRunning;
        }
        if self.prep.execution_state() != ExecutionState::OwnedByLoader {
            // There are no more staged segments.
            return LoadOutcome::OutOfMoves;
        }

        if self.prep.move_type == MoveType::Aline && self.prep.armed {
            self.run.dda_ticks_downcount = self.prep.dda_ticks as i32;
            self.run.dda_ticks_x_substeps = self.prep.dda_ticks_x_substeps as i32;

            for axis in AXES.iter() {
                let i = axis.index();
                self.run.motors[i].phase_increment = self.prep.motors[i].phase_increment as i32;

                if self.prep.reset_flag {
                    // Align pulse phase to the new segment.
                    self.run.motors[i].phase_accumulator = -self.run.dda_ticks_downcount;
                }

                if self.run.motors[i].phase_increment != 0 {
                    pins.set_direction(*axis, self.prep.motors[i].reverse);
                }
            }
        }

        // Null loads and aline loads alike: hand the prep buffer back and
        // ask for the next segment. Freeing the finished planning block is
        // the executor's job, never ours.
        self.prep.set_execution_state(ExecutionState::OwnedByExec);
        self.prep.armed = false;
        self.request_exec();
        LoadOutcome::Loaded
    }

    /// One DDA timer tick: advance both phase accumulators, pulse any axis
    /// whose accumulator crosses zero, and load the next segment when this
    /// one's downcount expires.
    pub fn dda_tick(
        &mut self,
        pins: &mut dyn StepPins,
        _prio: &priority::Step,
    ) -> DdaOutcome {
        for axis in AXES.iter() {
            let m = &mut self.run.motors[axis.index()];
            m.phase_accumulator += m.phase_increment;
            if m.phase_accumulator > 0 {
                pins.step(*axis);
                m.phase_accumulator -= self.run.dda_ticks_x_substeps;
            }
        }

        self.run.dda_ticks_downcount -= 1;
        if self.run.dda_ticks_downcount == 0 {
            // Segment exhausted; the timer stops and the next segment loads
            // inline at this priority.
            let outcome = self.load_move(pins, unsafe { &priority::Swi::new() });
            DdaOutcome::SegmentDone(outcome)
        } else {
            DdaOutcome::Running
        }
    }
}

/// Result of a load attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A segment (or null) was taken from the prep buffer.
    Loaded,
    /// The current segment has not finished; nothing was done.
    StillRunning,
    /// Nothing staged: the move queue has drained.
    OutOfMoves,
}

/// Result of one DDA tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DdaOutcome {
    Running,
    /// The segment's downcount expired and a load was attempted.
    SegmentDone(LoadOutcome),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingPins {
        pulses: [u32; AXIS_COUNT],
        reverse: [bool; AXIS_COUNT],
    }

    impl StepPins for CountingPins {
        fn step(&mut self, axis: Axis) {
            self.pulses[axis.index()] += 1;
        }
        fn set_direction(&mut self, axis: Axis, reverse: bool) {
            self.reverse[axis.index()] = reverse;
        }
    }

    fn swi() -> priority::Swi {
        unsafe { priority::Swi::new() }
    }

    fn step_prio() -> priority::Step {
        unsafe { priority::Step::new() }
    }

    /// Runs the loaded segment to completion, returning the final outcome.
    fn run_segment(stepper: &mut Stepper, pins: &mut CountingPins) -> LoadOutcome {
        loop {
            match stepper.dda_tick(pins, &step_prio()) {
                DdaOutcome::Running => continue,
                DdaOutcome::SegmentDone(outcome) => return outcome,
            }
        }
    }

    #[test]
    fn prep_handoff_flips_ownership() {
        let mut stepper = Stepper::default();
        assert_eq!(stepper.prep().execution_state(), ExecutionState::OwnedByExec);

        let status = stepper.set_next_segment([10.0, 0.0], [false, false], 5000.0);
        assert_eq!(status, Status::Success);

        // The executor flips ownership after prepping (modeled here by the
        // caller, as the exec interrupt does).
        stepper.release_to_loader();
        assert_eq!(
            stepper.set_next_segment([10.0, 0.0], [false, false], 5000.0),
            Status::InternalError
        );

        let mut pins = CountingPins::default();
        assert_eq!(stepper.load_move(&mut pins, &swi()), LoadOutcome::Loaded);
        assert_eq!(stepper.prep().execution_state(), ExecutionState::OwnedByExec);
        // A load leaves an exec request behind to refill the prep buffer.
        assert!(stepper.take_exec_request());
    }

    #[test]
    fn rejects_degenerate_segments() {
        let mut stepper = Stepper::default();
        assert_eq!(
            stepper.set_next_segment([1.0, 0.0], [false, false], f64::INFINITY),
            Status::MoveLengthTooSmall
        );
        assert_eq!(
            stepper.set_next_segment([1.0, 0.0], [false, false], 0.0),
            Status::MoveTimeTooSmall
        );
    }

    #[test]
    fn segment_emits_expected_pulse_count() {
        let mut stepper = Stepper::default();
        let mut pins = CountingPins::default();

        // 40 steps over 5 ms: 200 DDA ticks.
        stepper
            .set_next_segment([40.0, 0.0], [false, false], 5000.0)
            ;
        stepper.release_to_loader();
        assert_eq!(stepper.load_move(&mut pins, &swi()), LoadOutcome::Loaded);
        assert!(stepper.busy());

        let outcome = run_segment(&mut stepper, &mut pins);
        assert_eq!(outcome, LoadOutcome::OutOfMoves);
        assert_eq!(pins.pulses[Axis::Z.index()], 40);
        assert_eq!(pins.pulses[Axis::R.index()], 0);
        assert!(!stepper.busy());
    }

    #[test]
    fn fractional_steps_carry_between_segments() {
        let mut stepper = Stepper::default();
        let mut pins = CountingPins::default();

        // Two segments of 12.5 steps each: 25 pulses total, even though
        // neither segment holds a whole number of steps.
        for _ in 0..2 {
            stepper
                .set_next_segment([12.5, 0.0], [false, false], 5000.0)
                ;
            stepper.release_to_loader();
            assert_eq!(stepper.load_move(&mut pins, &swi()), LoadOutcome::Loaded);
            run_segment(&mut stepper, &mut pins);
        }
        assert_eq!(pins.pulses[Axis::Z.index()], 25);
    }

    #[test]
    fn direction_pins_set_only_for_moving_axes() {
        let mut stepper = Stepper::default();
        let mut pins = CountingPins::default();
        pins.reverse = [false, false];

        stepper
            .set_next_segment([0.0, 30.0], [true, true], 5000.0)
            ;
        stepper.release_to_loader();
        assert_eq!(stepper.load_move(&mut pins, &swi()), LoadOutcome::Loaded);

        // Z has zero steps, so its direction latch is untouched.
        assert!(!pins.reverse[Axis::Z.index()]);
        assert!(pins.reverse[Axis::R.index()]);
    }

    #[test]
    fn large_velocity_drop_resets_accumulators() {
        let mut stepper = Stepper::default();
        stepper
            .set_next_segment([100.0, 0.0], [false, false], 5000.0)
            ;
        assert!(!stepper.prep.reset_flag);
        stepper.prep.previous_ticks = 200;

        // A segment with less than half the ticks of its predecessor
        // trips the reset.
        stepper
            .set_next_segment([1.0, 0.0], [false, false], 2000.0)
            ;
        assert!(stepper.prep.reset_flag);
    }
}
