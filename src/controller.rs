//! Controller mainline.
//!
//! `Controller` holds everything the state machine table acts on: the
//! per-axis settings, the deferred-event queue, and the machine state
//! itself. It does not own the pieces that interrupt handlers write: the
//! motion kernel, the raised-flag `Signals` and the command buffer are
//! passed in by whoever owns them (the driver's shared statics on
//! hardware, plain locals in tests).
//!
//! `poll` is one pass of the main loop: translate raised flags into state
//! machine events, run the hold-plan callback, then dispatch one deferred
//! event or one newly received command frame. Deferred events drain before
//! new frames so commands are handled in the order the controller received
//! them.

use crate::command::CommandBuffer;
use crate::command_map;
use crate::event_queue::EventQueue;
use crate::machine::{self, Action, Event, EventData, State};
use crate::motion::{Motion, Signals};
use crate::settings::AxisSettings;
use crate::Axis;
use proto::Status;

/// Board facilities the controller drives directly: motor driver chips,
/// limit switches, and the interrupt line back to the host.
pub trait MachineIo {
    fn enable_drivers(&mut self);
    fn disable_drivers(&mut self);
    /// Applies a validated microstepping mode (1..=6) to the driver chips.
    fn set_microstepping(&mut self, mode: u8);
    /// Pulses the host interrupt line low for the protocol's 50 ms.
    fn generate_interrupt(&mut self);
    /// Samples a limit switch.
    fn axis_at_limit(&self, axis: Axis) -> bool;
    /// Arms the pin-change interrupt for one axis while it homes.
    fn arm_limit_interrupt(&mut self, axis: Axis);
    /// Disarms both pin-change interrupts.
    fn disarm_limit_interrupts(&mut self);
}

pub struct Controller {
    state: State,
    z_settings: AxisSettings,
    r_settings: AxisSettings,
    event_queue: EventQueue,
    /// Event dequeued by a `DequeueEvent` action, dispatched on the next
    /// poll so it runs against the post-transition state.
    queued_event: Option<(Event, EventData)>,
}

impl Default for Controller {
    fn default() -> Self {
        Controller {
            state: State::Disabled,
            z_settings: AxisSettings::default(),
            r_settings: AxisSettings::default(),
            event_queue: EventQueue::default(),
            queued_event: None,
        }
    }
}

impl Controller {
    pub fn state(&self) -> State {
        self.state
    }

    pub fn settings(&self, axis: Axis) -> &AxisSettings {
        match axis {
            Axis::Z => &self.z_settings,
            Axis::R => &self.r_settings,
        }
    }

    /// One pass of the main loop.
    pub fn poll(
        &mut self,
        motion: &mut Motion,
        signals: &mut Signals,
        commands: &mut CommandBuffer,
        io: &mut dyn MachineIo,
    ) {
        // Reset takes effect before any pending command is looked at.
        if signals.reset {
            self.reinitialize(motion, signals, commands, io);
        }

        if signals.error {
            signals.error = false;
            self.dispatch(Event::ErrorEncountered, EventData::default(), motion, signals, io);
        }

        // A full command buffer means the host is ahead of us and frames
        // are being dropped; no forward progress is possible.
        if commands.is_full() {
            signals.status = Status::CommandBufferFull;
            self.dispatch(Event::ErrorEncountered, EventData::default(), motion, signals, io);
        }

        if signals.limit_hit {
            signals.limit_hit = false;
            self.dispatch(Event::AxisLimitReached, EventData::default(), motion, signals, io);
        }

        motion.plan_hold();

        if signals.motion_complete {
            signals.motion_complete = false;
            self.dispatch(Event::MotionComplete, EventData::default(), motion, signals, io);
        }

        if signals.axis_at_limit {
            signals.axis_at_limit = false;
            self.dispatch(Event::AxisAtLimit, EventData::default(), motion, signals, io);
        }

        if signals.deceleration_started {
            signals.deceleration_started = false;
            self.dispatch(Event::DecelerationStarted, EventData::default(), motion, signals, io);
        }

        // Drain deferred events before looking at new frames, so commands
        // are handled in arrival order.
        if let Some((event, data)) = self.queued_event.take() {
            self.dispatch(event, data, motion, signals, io);
            return;
        }

        if let Some(frame) = commands.take_frame() {
            match command_map::event_for(frame.register, frame.action) {
                Some(event) => {
                    let data = EventData {
                        command: frame.action,
                        parameter: frame.parameter,
                    };
                    self.dispatch(event, data, motion, signals, io);
                }
                None => signals.raise_error(Status::CommandUnknown),
            }
        }
    }

    /// Runs one event through the transition table.
    pub fn dispatch(
        &mut self,
        event: Event,
        data: EventData,
        motion: &mut Motion,
        signals: &mut Signals,
        io: &mut dyn MachineIo,
    ) {
        let transition = machine::transition(self.state, event);
        if let Some(next) = transition.next {
            self.state = next;
        }
        for &action in transition.actions {
            self.perform(action, event, data, motion, signals, io);
        }
    }

    fn perform(
        &mut self,
        action: Action,
        event: Event,
        data: EventData,
        motion: &mut Motion,
        signals: &mut Signals,
        io: &mut dyn MachineIo,
    ) {
        let result = match action {
            Action::SetResetFlag => {
                signals.reset = true;
                Ok(())
            }
            Action::EnableMotorDrivers => {
                io.enable_drivers();
                Ok(())
            }
            Action::DisableMotorDrivers => {
                io.disable_drivers();
                Ok(())
            }
            Action::BeginHold => {
                motion.begin_hold();
                Ok(())
            }
            Action::EndHold => {
                motion.end_hold();
                Ok(())
            }
            Action::EndMotion => {
                motion.end_motion();
                Ok(())
            }
            Action::EnqueueEvent => self.event_queue.add(event, data),
            Action::DequeueEvent => {
                if let Some(entry) = self.event_queue.remove() {
                    self.queued_event = Some(entry);
                }
                Ok(())
            }
            Action::ClearEventQueue => {
                self.event_queue.clear();
                Ok(())
            }
            Action::GenerateInterrupt => {
                io.generate_interrupt();
                Ok(())
            }
            Action::HomeZAxis => self.home_axis(Axis::Z, data.parameter, motion, signals, io),
            Action::HomeRAxis => self.home_axis(Axis::R, data.parameter, motion, signals, io),
            Action::MoveZAxis => self.move_axis(Axis::Z, data.parameter, motion),
            Action::MoveRAxis => self.move_axis(Axis::R, data.parameter, motion),
            Action::SetZAxisSetting => self.update_settings(Axis::Z, data, motion, io),
            Action::SetRAxisSetting => self.update_settings(Axis::R, data, motion, io),
        };

        if let Err(status) = result {
            signals.raise_error(status);
        }
    }

    /// Applies one settings command to an axis, refreshing the planner's
    /// cached step rate whenever a geometry setting changes.
    fn update_settings(
        &mut self,
        axis: Axis,
        data: EventData,
        motion: &mut Motion,
        io: &mut dyn MachineIo,
    ) -> Result<(), Status> {
        let settings = match axis {
            Axis::Z => &mut self.z_settings,
            Axis::R => &mut self.r_settings,
        };

        match data.command {
            proto::SET_STEP_ANGLE => {
                settings.set_step_angle(data.parameter)?;
                motion.planner.set_pulses_per_unit(axis, settings.pulses_per_unit());
            }
            proto::SET_UNITS_PER_REV => {
                settings.set_units_per_revolution(data.parameter)?;
                motion.planner.set_pulses_per_unit(axis, settings.pulses_per_unit());
            }
            proto::SET_MICROSTEPPING => {
                settings.set_microstepping_mode(data.parameter)?;
                io.set_microstepping(data.parameter as u8);
                motion.planner.set_pulses_per_unit(axis, settings.pulses_per_unit());
            }
            proto::SET_JERK => settings.set_max_jerk(data.parameter)?,
            proto::SET_SPEED => settings.set_speed(data.parameter)?,
            _ => return Err(Status::SettingCommandUnknown),
        }
        Ok(())
    }

    /// Queues a relative move on one axis. Every move is planned from a
    /// zeroed position; sign becomes a direction flag because the planner
    /// works in non-negative lengths.
    fn move_axis(&mut self, axis: Axis, distance: i32, motion: &mut Motion) -> Result<(), Status> {
        let settings = self.settings(axis);
        settings.validate()?;

        motion.planner.set_axis_position(Axis::Z, 0.0);
        motion.planner.set_axis_position(Axis::R, 0.0);

        let mut distances = [0.0; crate::AXIS_COUNT];
        distances[axis.index()] = f64::from(distance);

        let reverse = [distances[0] < 0.0, distances[1] < 0.0];
        distances[axis.index()] = libm::fabs(distances[axis.index()]);

        let speed = settings.speed();
        let max_jerk = settings.max_jerk();
        motion.queue_line(distances, reverse, speed, max_jerk)
    }

    /// Starts homing one axis: if the limit switch is already made, raise
    /// the at-limit flag and skip motion entirely; otherwise arm the
    /// switch's interrupt and move toward it.
    fn home_axis(
        &mut self,
        axis: Axis,
        distance: i32,
        motion: &mut Motion,
        signals: &mut Signals,
        io: &mut dyn MachineIo,
    ) -> Result<(), Status> {
        if io.axis_at_limit(axis) {
            signals.axis_at_limit = true;
            return Ok(());
        }
        io.arm_limit_interrupt(axis);
        self.move_axis(axis, distance, motion)
    }

    /// Full reinitialization, preserving only the machine state (the reset
    /// transition has already parked it in `Disabled`).
    fn reinitialize(
        &mut self,
        motion: &mut Motion,
        signals: &mut Signals,
        commands: &mut CommandBuffer,
        io: &mut dyn MachineIo,
    ) {
        let state = self.state;
        *self = Controller::default();
        self.state = state;

        *motion = Motion::default();
        *signals = Signals::default();
        *commands = CommandBuffer::default();

        io.disable_drivers();
        io.disarm_limit_interrupts();
    }
}
