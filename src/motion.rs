//! The assembled motion kernel.
//!
//! `Motion` owns the three cooperating pieces (block ring, planner
//! runtime, stepper) and provides the entry points the driver's interrupt
//! handlers (or the test harness) call into. The pieces never reach around
//! each other: commands flow planner → ring → executor → prep buffer → DDA,
//! and completions flow back as `Signals` flags that the mainline turns
//! into state machine events.

use crate::block::{BlockPool, MoveType};
use crate::planner::Planner;
use crate::priority;
use crate::stepper::{DdaOutcome, ExecutionState, LoadOutcome, StepPins, Stepper};
use crate::AXIS_COUNT;
use proto::Status;

/// Flags raised by interrupt-context code for the mainline to translate
/// into state machine events. Each is a one-shot: the mainline consumes it
/// and dispatches the corresponding event.
#[derive(Debug, Default)]
pub struct Signals {
    /// The planning queue drained and the last segment finished.
    pub motion_complete: bool,
    /// The running block entered its tail.
    pub deceleration_started: bool,
    /// Homing found the axis already sitting on its limit switch.
    pub axis_at_limit: bool,
    /// A limit switch pin-change fired.
    pub limit_hit: bool,
    /// A fault was recorded in `status`; raise `ErrorEncountered`.
    pub error: bool,
    /// Full controller reinitialization requested.
    pub reset: bool,
    /// Last status, exposed through the bus status register.
    pub status: Status,
}

impl Signals {
    pub fn raise_error(&mut self, status: Status) {
        self.status = status;
        self.error = true;
    }
}

/// Planner, ring and stepper as one unit.
#[derive(Default)]
pub struct Motion {
    pub pool: BlockPool,
    pub planner: Planner,
    pub stepper: Stepper,
}

impl Motion {
    /// Plans one accelerated line, commits it to the ring and pokes the
    /// executor if it is idle.
    pub fn queue_line(
        &mut self,
        distances: [f64; AXIS_COUNT],
        reverse: [bool; AXIS_COUNT],
        speed: f64,
        max_jerk: f64,
    ) -> Result<(), Status> {
        self.planner
            .plan_acceleration_line(&mut self.pool, distances, reverse, speed, max_jerk)?;
        self.pool.queue_write_buffer(MoveType::Aline);
        self.stepper.request_exec();
        Ok(())
    }

    /// Exec software interrupt: stages exactly one segment of the running
    /// block into the prep buffer, then hands the buffer to the loader.
    pub fn exec_isr(&mut self, signals: &mut Signals, _prio: &priority::Swi) {
        if self.stepper.prep().execution_state() != ExecutionState::OwnedByExec {
            return;
        }

        let status = self.execute_run_buffer(signals);
        if status == Status::InternalError {
            signals.raise_error(status);
        } else if status != Status::Noop {
            self.stepper.release_to_loader();
            // Only fire the loader if the current segment has finished; a
            // busy DDA loads on its own at exhaustion.
            self.stepper.request_load();
        }
    }

    /// Load software interrupt: copies the staged segment into the DDA.
    pub fn load_isr(
        &mut self,
        signals: &mut Signals,
        pins: &mut dyn StepPins,
        prio: &priority::Swi,
    ) {
        if self.stepper.load_move(pins, prio) == LoadOutcome::OutOfMoves {
            signals.motion_complete = true;
        }
    }

    /// DDA timer interrupt: one tick of step generation.
    pub fn dda_isr(
        &mut self,
        signals: &mut Signals,
        pins: &mut dyn StepPins,
        prio: &priority::Step,
    ) {
        if let DdaOutcome::SegmentDone(LoadOutcome::OutOfMoves) =
            self.stepper.dda_tick(pins, prio)
        {
            signals.motion_complete = true;
        }
    }

    pub fn begin_hold(&mut self) {
        self.planner.begin_hold();
    }

    /// Releases a hold and restarts execution if moves remain queued.
    pub fn end_hold(&mut self) {
        if self.planner.end_hold(&mut self.pool) == Status::Success {
            self.stepper.request_exec();
        }
    }

    /// Mainline hook that performs hold replanning when the executor has
    /// synchronized. See the planner for the two cases.
    pub fn plan_hold(&mut self) -> Status {
        self.planner.plan_hold_callback(&mut self.pool)
    }

    /// Drops the queue and motion runtime. The stepper is left alone: any
    /// deceleration already handed to it completes safely.
    pub fn end_motion(&mut self) {
        self.pool.reset();
        self.planner.end_move();
    }
}
