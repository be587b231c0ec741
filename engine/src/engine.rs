//! The print engine: owns the print state machine and everything it acts
//! on.
//!
//! Events arrive one at a time from the event loop; `handle` reacts by
//! moving between states, and `enter` performs each state's entry actions
//! (motor batches, projector calls, timers). A status snapshot goes to the
//! sink after every transition.
//!
//! Excursions (door openings and cancel confirmations) leave the
//! closed-door hierarchy from any leaf and must come back to exactly that
//! leaf. The engine keeps that deep-history leaf explicitly, pauses the
//! motion controller on the way out, and re-creates time-based context
//! (remaining exposure, remaining motor watchdog) on the way back.

use crate::event::{PrintEvent, TimerKind, Timers};
use crate::layer::{CurrentLayerSettings, LayerKind};
use crate::motor::{Motor, Transport, TransportError};
use crate::overlay::{LayerParams, Overlay};
use crate::settings::{self as keys, Settings};
use crate::state::PrinterState;
use crate::status::PrinterStatus;
use proto::Status;

/// Receives each layer's slice image, or black between exposures. Image
/// decoding and scaling happen on the other side of this trait.
pub trait ImageSink {
    fn show_layer(&mut self, layer: i32);
    fn show_black(&mut self);
}

/// Receives status snapshots on every state change.
pub trait StatusSink {
    fn send(&mut self, status: &PrinterStatus);
}

pub struct PrintEngine<T, I, S> {
    state: PrinterState,
    /// Deep-history leaf for door/cancel excursions.
    history: Option<PrinterState>,

    motor: Motor<T>,
    image: I,
    status_sink: S,

    params: LayerParams,
    cls: CurrentLayerSettings,

    job_name: String,
    layer: i32,
    total_layers: i32,
    /// Build head position in microns relative to home; negative while
    /// printing.
    z_position: i32,

    temperature: f64,
    pause_requested: bool,
    /// The rotation sensor fired since separation began.
    got_rotation: bool,
    jam_retries: i32,

    /// Exposure seconds left when an excursion interrupted `Exposing`.
    remaining_exposure_sec: f64,
    /// Motor watchdog seconds left when an excursion paused motion.
    remaining_motor_timeout_sec: f64,
    /// A motion completion that arrived mid-excursion, delivered on
    /// return.
    pending_motion_complete: bool,

    timers: Timers,
    last_error: Option<String>,
}

impl<T: Transport, I: ImageSink, S: StatusSink> PrintEngine<T, I, S> {
    pub fn new(transport: T, image: I, status_sink: S, settings: Settings) -> Self {
        PrintEngine {
            state: PrinterState::Initializing,
            history: None,
            motor: Motor::new(transport),
            image,
            status_sink,
            params: LayerParams::new(settings, Overlay::default()),
            cls: CurrentLayerSettings::default(),
            job_name: String::new(),
            layer: 0,
            total_layers: 0,
            z_position: 0,
            temperature: 0.0,
            pause_requested: false,
            got_rotation: false,
            jam_retries: 0,
            remaining_exposure_sec: 0.0,
            remaining_motor_timeout_sec: 0.0,
            pending_motion_complete: false,
            timers: Timers::default(),
            last_error: None,
        }
    }

    pub fn state(&self) -> PrinterState {
        self.state
    }

    pub fn current_layer(&self) -> &CurrentLayerSettings {
        &self.cls
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut Timers {
        &mut self.timers
    }

    /// Installs the loaded job: name, slice count and any per-layer
    /// override sheet it carried.
    pub fn set_print_data(&mut self, job_name: &str, total_layers: i32, overlay: Overlay) {
        self.job_name = job_name.to_string();
        self.total_layers = total_layers;
        self.params.overlay = overlay;
    }

    /// Startup: resets and configures the motion controller, then waits in
    /// `Initializing` for the host's `Initialized` event (or a door
    /// event, if the printer woke up open).
    pub fn begin(&mut self) {
        self.enter(PrinterState::Initializing);
    }

    pub fn handle(&mut self, event: PrintEvent) {
        match event {
            PrintEvent::TemperatureRead(t) => {
                self.temperature = t;
                if t > self.params.base.get_double(keys::MAX_TEMPERATURE) {
                    self.fatal(format!("printer overheated: {:.1} C", t));
                }
            }

            PrintEvent::RotationSensed => self.got_rotation = true,

            PrintEvent::MotorInterrupt(byte) => {
                self.timers.clear(TimerKind::MotorTimeout);
                match Status::from_byte(byte) {
                    Some(status) if !status.is_error() => self.motion_completed(),
                    Some(status) => {
                        self.fatal(format!("motor controller reported {:?}", status))
                    }
                    None => self.fatal(format!("unintelligible motor status {:#04x}", byte)),
                }
            }

            PrintEvent::MotorTimeout => {
                self.fatal("motor controller timed out".to_string());
            }

            PrintEvent::DoorOpened => self.door_opened(),
            PrintEvent::DoorClosed => self.door_closed(),

            PrintEvent::Initialized => {
                if self.state == PrinterState::Initializing {
                    self.enter(PrinterState::Homing);
                }
            }

            PrintEvent::DelayEnded => match self.state {
                PrinterState::PressDelay => self.enter(PrinterState::Unpressing),
                PrinterState::PreExposureDelay => self.enter(PrinterState::Exposing),
                _ => {}
            },

            PrintEvent::ExposureEnded => {
                if self.state == PrinterState::Exposing {
                    self.enter(PrinterState::Separating);
                }
            }

            PrintEvent::StartPrint => {
                if self.state == PrinterState::Home {
                    self.start_print();
                }
            }

            PrintEvent::RequestPause => {
                if self.state.in_printing_layer() {
                    // Honored at the next layer boundary.
                    self.pause_requested = true;
                }
            }

            PrintEvent::Resume => match self.state {
                PrinterState::Paused => self.enter(PrinterState::MovingToResume),
                PrinterState::Jammed => {
                    // The user freed the tray by hand; try the recovery
                    // rotation again with a fresh retry budget.
                    self.jam_retries = self.params.base.get_int(keys::JAM_RECOVERY_RETRIES);
                    self.enter(PrinterState::Unjamming);
                }
                PrinterState::ConfirmCancel => self.return_from_excursion(),
                _ => {}
            },

            PrintEvent::Cancel => {
                if self.state.printing() || self.state.in_printing_layer() {
                    self.leave_for_excursion(PrinterState::ConfirmCancel);
                }
            }

            PrintEvent::CancelConfirmed => {
                if self.state == PrinterState::ConfirmCancel {
                    self.history = None;
                    self.enter(PrinterState::AwaitingCancelation);
                }
            }

            PrintEvent::Dismiss => match self.state {
                PrinterState::GettingFeedback => self.enter(PrinterState::Home),
                PrinterState::Error => {
                    // Recovery path: reinitialize and rehome.
                    self.last_error = None;
                    self.enter(PrinterState::Initializing);
                }
                _ => {}
            },

            PrintEvent::ShowVersion => {
                if self.state == PrinterState::Home {
                    self.enter(PrinterState::ShowingVersion);
                }
            }

            PrintEvent::DismissVersion => {
                if self.state == PrinterState::ShowingVersion {
                    self.enter(PrinterState::Home);
                }
            }

            PrintEvent::EnterDemoMode => {
                // Only from idle states; stays until a restart.
                if matches!(self.state, PrinterState::Initializing | PrinterState::Home) {
                    if let Err(e) = self.motor.enable() {
                        self.fatal(e.to_string());
                        return;
                    }
                    self.enter(PrinterState::DemoMode);
                }
            }

            PrintEvent::Shutdown => {}
        }
    }

    /// Reacts to a completed motor batch, per the waiting state.
    fn motion_completed(&mut self) {
        if self.state == PrinterState::DoorOpen || self.state == PrinterState::ConfirmCancel {
            // Completion raced the excursion; deliver it on return.
            self.pending_motion_complete = true;
            return;
        }

        match self.state {
            PrinterState::Homing => self.enter(PrinterState::Home),

            PrinterState::MovingToStartPosition => {
                self.advance_layer();
                self.enter(PrinterState::Pressing);
            }

            PrinterState::Pressing => self.enter(PrinterState::PressDelay),
            PrinterState::Unpressing => self.enter(PrinterState::PreExposureDelay),

            PrinterState::Separating => {
                if self.got_rotation {
                    self.enter(PrinterState::Approaching);
                } else {
                    // The tray never turned: it jammed against the print.
                    log::warn!("no tray rotation seen during separation; attempting recovery");
                    self.jam_retries = self.params.base.get_int(keys::JAM_RECOVERY_RETRIES);
                    self.enter(PrinterState::Unjamming);
                }
            }

            PrinterState::Unjamming => {
                if self.got_rotation {
                    self.enter(PrinterState::Approaching);
                } else if self.jam_retries > 0 {
                    self.enter(PrinterState::Unjamming);
                } else {
                    self.enter(PrinterState::Jammed);
                }
            }

            PrinterState::Approaching => self.layer_finished(),

            PrinterState::MovingToPause => self.enter(PrinterState::Paused),

            PrinterState::MovingToResume => {
                self.advance_layer();
                self.enter(PrinterState::Pressing);
            }

            PrinterState::AwaitingCancelation => {
                // The controller has flushed its queue; park the hardware.
                self.clear_current_print();
                self.enter(PrinterState::Homing);
            }

            PrinterState::GettingFeedback => {
                // The end-of-print homing finished while the feedback
                // screen is up; nothing further to do.
            }

            other => log::debug!("motion completed ignored in {:?}", other),
        }
    }

    /// End of a layer's approach: advance, pause, or finish the print.
    fn layer_finished(&mut self) {
        self.z_position += self.cls.layer_thickness_microns;

        if self.layer >= self.total_layers {
            log::info!("print {:?} complete after {} layers", self.job_name, self.layer);
            let result = self.motor.go_home(&self.params.base, true, false);
            self.armed_motion(result);
            self.enter(PrinterState::GettingFeedback);
        } else if self.pause_requested {
            self.pause_requested = false;
            self.enter(PrinterState::MovingToPause);
        } else {
            self.advance_layer();
            self.enter(PrinterState::Pressing);
        }
    }

    fn start_print(&mut self) {
        if self.total_layers == 0 {
            log::warn!("start requested with no print data loaded");
            return;
        }
        self.layer = 0;
        self.z_position = 0;
        self.pause_requested = false;
        self.enter(PrinterState::MovingToStartPosition);
    }

    /// Moves to the next layer and resolves its effective settings.
    fn advance_layer(&mut self) {
        self.layer += 1;
        self.cls = CurrentLayerSettings::resolve(&self.params, self.layer, self.z_position);
    }

    /// Performs a state's entry actions, then publishes the change.
    fn enter(&mut self, state: PrinterState) {
        self.state = state;

        match state {
            PrinterState::Initializing => {
                if let Err(e) = self.motor.initialize(&self.params.base) {
                    self.fatal(e.to_string());
                    return;
                }
            }

            PrinterState::Homing => {
                let result = self.motor.go_home(&self.params.base, true, false);
                self.armed_motion(result);
            }

            PrinterState::Home => {
                self.timers.clear_all();
            }

            PrinterState::MovingToStartPosition => {
                self.z_position = self.params.base.get_int(keys::Z_START_PRINT_POSITION);
                let result = self.motor.go_to_start_position(&self.params.base);
                self.armed_motion(result);
            }

            PrinterState::Pressing => {
                if self.cls.press_micros == 0 {
                    // No tray deflection configured for this layer.
                    self.enter(PrinterState::PreExposureDelay);
                    return;
                }
                let result = self.motor.press(&self.cls);
                self.armed_motion(result);
            }

            PrinterState::PressDelay => {
                let wait_sec = f64::from(self.cls.press_wait_ms) / 1000.0;
                if wait_sec <= 0.0 {
                    self.enter(PrinterState::Unpressing);
                    return;
                }
                self.timers.start(TimerKind::Delay, wait_sec);
            }

            PrinterState::Unpressing => {
                let result = self.motor.unpress(&self.cls);
                self.armed_motion(result);
            }

            PrinterState::PreExposureDelay => {
                let delay = self.cls.pre_exposure_delay_sec;
                if delay <= 0.0 {
                    self.enter(PrinterState::Exposing);
                    return;
                }
                self.timers.start(TimerKind::Delay, delay);
            }

            PrinterState::Exposing => {
                let seconds = if self.remaining_exposure_sec > 0.0 {
                    std::mem::replace(&mut self.remaining_exposure_sec, 0.0)
                } else {
                    self.cls.exposure_sec
                };
                self.image.show_layer(self.layer);
                self.timers.start(TimerKind::Exposure, seconds);
            }

            PrinterState::Separating => {
                self.image.show_black();
                self.got_rotation = false;
                let result = self.motor.separate(&self.cls);
                self.armed_motion(result);
            }

            PrinterState::Approaching => {
                let result = self.motor.approach(&self.cls, &self.params.base, false);
                self.armed_motion(result);
            }

            PrinterState::Unjamming => {
                self.jam_retries -= 1;
                let result = self.motor.unjam(&self.cls, true);
                self.armed_motion(result);
            }

            PrinterState::Jammed => {
                self.timers.clear(TimerKind::MotorTimeout);
            }

            PrinterState::MovingToPause => {
                let result = self.motor.pause_and_inspect(&self.cls, &self.params.base);
                self.armed_motion(result);
            }

            PrinterState::MovingToResume => {
                let result = self.motor.resume_from_inspect(&self.cls, &self.params.base);
                self.armed_motion(result);
            }

            PrinterState::AwaitingCancelation => {
                if let Err(e) = self.motor.clear_pending(true) {
                    self.fatal(e.to_string());
                    return;
                }
                let min = self.params.base.get_double(keys::MIN_MOTOR_TIMEOUT_SEC);
                self.timers.start(TimerKind::MotorTimeout, min);
            }

            PrinterState::Paused
            | PrinterState::ConfirmCancel
            | PrinterState::GettingFeedback
            | PrinterState::DoorOpen
            | PrinterState::Error
            | PrinterState::ShowingVersion
            | PrinterState::DemoMode => {}
        }

        self.send_status();
    }

    /// Arms the motor watchdog for a batch's expected duration, or
    /// escalates a transport failure.
    fn armed_motion(&mut self, result: Result<f64, TransportError>) {
        match result {
            Ok(seconds) => {
                let factor = self.params.base.get_double(keys::MOTOR_TIMEOUT_FACTOR);
                let min = self.params.base.get_double(keys::MIN_MOTOR_TIMEOUT_SEC);
                self.timers
                    .start(TimerKind::MotorTimeout, (seconds * factor).max(min));
            }
            Err(e) => self.fatal(e.to_string()),
        }
    }

    fn door_opened(&mut self) {
        if !self.state.in_door_closed() {
            return;
        }
        self.leave_for_excursion(PrinterState::DoorOpen);
    }

    fn door_closed(&mut self) {
        if self.state == PrinterState::DoorOpen {
            self.return_from_excursion();
        }
    }

    /// Leaves the closed-door hierarchy for `excursion`, remembering the
    /// current leaf and suspending anything time-based.
    fn leave_for_excursion(&mut self, excursion: PrinterState) {
        self.history = Some(self.state);

        if self.state == PrinterState::Exposing {
            self.remaining_exposure_sec = self
                .timers
                .remaining(TimerKind::Exposure)
                .unwrap_or(self.cls.exposure_sec);
            self.image.show_black();
        }
        self.remaining_motor_timeout_sec = self
            .timers
            .remaining(TimerKind::MotorTimeout)
            .unwrap_or(0.0);
        self.timers.clear_all();

        // Hold any motion in flight; harmless when the controller is idle.
        if let Err(e) = self.motor.pause() {
            self.fatal(e.to_string());
            return;
        }
        self.enter(excursion);
    }

    /// Restores the remembered leaf and resumes whatever was suspended.
    fn return_from_excursion(&mut self) {
        let leaf = match self.history.take() {
            Some(leaf) => leaf,
            None => PrinterState::Home,
        };

        if let Err(e) = self.motor.resume() {
            self.fatal(e.to_string());
            return;
        }
        if self.remaining_motor_timeout_sec > 0.0 {
            let seconds = std::mem::replace(&mut self.remaining_motor_timeout_sec, 0.0);
            self.timers.start(TimerKind::MotorTimeout, seconds);
        }

        match leaf {
            // Re-enter properly so the slice is shown again and the timer
            // restarts with the remaining time.
            PrinterState::Exposing => self.enter(PrinterState::Exposing),
            // Delay timers were dropped on the way out; restart them.
            PrinterState::PressDelay | PrinterState::PreExposureDelay => self.enter(leaf),
            _ => {
                self.state = leaf;
                self.send_status();
            }
        }

        if std::mem::replace(&mut self.pending_motion_complete, false) {
            self.motion_completed();
        }
    }

    /// Unrecoverable problem: park the hardware and wait for the user.
    /// Print errors clear the current print but never reset the
    /// controller.
    fn fatal(&mut self, message: String) {
        log::error!("fatal: {}", message);
        self.last_error = Some(message);
        self.clear_current_print();
        let _ = self.motor.disable();
        self.enter(PrinterState::Error);
    }

    /// Stops exposure and motion and forgets print progress.
    fn clear_current_print(&mut self) {
        self.timers.clear_all();
        self.image.show_black();
        self.layer = 0;
        self.total_layers = 0;
        self.pause_requested = false;
        self.remaining_exposure_sec = 0.0;
        self.history = None;
    }

    /// Rough whole-print time for one layer of a class, for the remaining
    /// time estimate.
    fn layer_time_sec(&self, kind: LayerKind) -> f64 {
        let base = &self.params.base;
        let exposure = match kind {
            LayerKind::First => base.get_double(keys::FIRST_EXPOSURE),
            LayerKind::BurnIn => base.get_double(keys::BURN_IN_EXPOSURE),
            LayerKind::Model => base.get_double(keys::MODEL_EXPOSURE),
        };
        // Separation and approach dominate the motion time; a flat
        // overhead stands in for the rest.
        const MOTION_OVERHEAD_SEC: f64 = 6.0;
        exposure + MOTION_OVERHEAD_SEC
    }

    fn seconds_remaining(&self) -> i32 {
        if self.total_layers == 0 {
            return 0;
        }
        let burn_in = self.params.base.get_int(keys::BURN_IN_LAYER_COUNT);
        let mut seconds = 0.0;
        for layer in self.layer.max(1)..=self.total_layers {
            seconds += self.layer_time_sec(LayerKind::of(layer, burn_in));
        }
        seconds as i32
    }

    fn send_status(&mut self) {
        let mut status = PrinterStatus::new(self.state);
        status.error = self.last_error.clone();
        status.is_error = self.state == PrinterState::Error;
        status.layer = self.layer;
        status.total_layers = self.total_layers;
        status.seconds_remaining = self.seconds_remaining();
        status.temperature = self.temperature;
        status.job_name = self.job_name.clone();
        self.status_sink.send(&status);
    }
}
