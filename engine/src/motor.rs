//! Motor command batches.
//!
//! High-level motions (home, press, separate…) each expand into a batch of
//! motion-controller command frames: settings writes, one or more actions,
//! and normally a trailing interrupt request so the controller signals when
//! the whole batch has executed. Every method returns the batch's expected
//! motion time; the engine arms its motor watchdog from that.
//!
//! Z speeds are configured in microns per second and rotation speeds in
//! RPM; the controller wants user units per minute, hence the two speed
//! factors.

use crate::layer::CurrentLayerSettings;
use crate::settings::{self as keys, Settings};
use proto::Frame;

/// Microns-per-second to microns-per-minute.
const Z_SPEED_FACTOR: i32 = 60;
/// RPM to millidegrees-per-minute.
const R_SPEED_FACTOR: i32 = 360_000;
/// One full tray rotation, used as the travel bound for rotational homing.
const UNITS_PER_REVOLUTION: i32 = 360_000;

/// Time allowed after a reset before the controller accepts commands.
pub const RESET_SETTLE_MS: u64 = 500;

#[derive(Debug, thiserror::Error)]
#[error("motor controller bus: {0}")]
pub struct TransportError(pub String);

/// Where command frames go. The real implementation writes to the I2C
/// master device; tests capture the frames.
pub trait Transport {
    fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;
}

/// One batch under construction: frames plus a running estimate of how
/// long its motions take, using whichever speed was last set per axis.
struct Batch {
    frames: Vec<Frame>,
    z_speed: f64,
    r_speed: f64,
    seconds: f64,
}

impl Batch {
    fn new() -> Self {
        Batch {
            frames: Vec::new(),
            z_speed: 0.0,
            r_speed: 0.0,
            seconds: 0.0,
        }
    }

    fn push(&mut self, register: u8, action: u8, parameter: i32) {
        self.frames.push(Frame::new(register, action, parameter));
    }

    fn set_z_jerk(&mut self, jerk: i32) {
        self.push(proto::Z_SETTINGS_REG, proto::SET_JERK, jerk);
    }

    fn set_r_jerk(&mut self, jerk: i32) {
        self.push(proto::R_SETTINGS_REG, proto::SET_JERK, jerk);
    }

    /// Sets the Z speed from a microns-per-second value.
    fn set_z_speed(&mut self, microns_per_sec: i32) {
        self.z_speed = f64::from(microns_per_sec);
        self.push(
            proto::Z_SETTINGS_REG,
            proto::SET_SPEED,
            microns_per_sec * Z_SPEED_FACTOR,
        );
    }

    /// Sets the rotation speed from an RPM value.
    fn set_r_speed(&mut self, rpm: i32) {
        self.r_speed = f64::from(rpm * R_SPEED_FACTOR) / 60.0;
        self.push(proto::R_SETTINGS_REG, proto::SET_SPEED, rpm * R_SPEED_FACTOR);
    }

    fn move_z(&mut self, microns: i32) {
        self.seconds += f64::from(microns.abs()) / self.z_speed;
        self.push(proto::Z_ACTION_REG, proto::ACTION_MOVE, microns);
    }

    fn move_r(&mut self, milli_degrees: i32) {
        self.seconds += f64::from(milli_degrees.abs()) / self.r_speed;
        self.push(proto::R_ACTION_REG, proto::ACTION_MOVE, milli_degrees);
    }

    fn home_z(&mut self, max_microns: i32) {
        self.seconds += f64::from(max_microns.abs()) / self.z_speed;
        self.push(proto::Z_ACTION_REG, proto::ACTION_HOME, max_microns);
    }

    fn home_r(&mut self, max_milli_degrees: i32) {
        self.seconds += f64::from(max_milli_degrees.abs()) / self.r_speed;
        self.push(proto::R_ACTION_REG, proto::ACTION_HOME, max_milli_degrees);
    }

    fn interrupt(&mut self) {
        self.frames.push(Frame::general(proto::CMD_INTERRUPT));
    }
}

/// The motion controller, seen from the host side.
pub struct Motor<T> {
    transport: T,
}

impl<T: Transport> Motor<T> {
    pub fn new(transport: T) -> Self {
        Motor { transport }
    }

    fn send(&mut self, batch: Batch) -> Result<f64, TransportError> {
        for frame in batch.frames {
            self.transport.write_frame(frame)?;
        }
        Ok(batch.seconds)
    }

    fn general(&mut self, command: u8) -> Result<(), TransportError> {
        self.transport.write_frame(Frame::general(command))
    }

    /// Resets the controller, waits out the reset, then writes the axis
    /// calibration that applies to every subsequent motion and enables the
    /// drivers. No interrupt: nothing here moves.
    pub fn initialize(&mut self, settings: &Settings) -> Result<(), TransportError> {
        self.general(proto::CMD_RESET)?;

        // Commands sent during the reset would be erased by it.
        std::thread::sleep(std::time::Duration::from_millis(RESET_SETTLE_MS));

        let mut batch = Batch::new();
        batch.push(
            proto::Z_SETTINGS_REG,
            proto::SET_STEP_ANGLE,
            settings.get_int(keys::Z_STEP_ANGLE),
        );
        batch.push(
            proto::Z_SETTINGS_REG,
            proto::SET_UNITS_PER_REV,
            settings.get_int(keys::Z_MICRONS_PER_REV),
        );
        batch.push(
            proto::Z_SETTINGS_REG,
            proto::SET_MICROSTEPPING,
            settings.get_int(keys::MICRO_STEPS_MODE),
        );
        batch.push(
            proto::R_SETTINGS_REG,
            proto::SET_STEP_ANGLE,
            settings.get_int(keys::R_STEP_ANGLE),
        );
        batch.push(
            proto::R_SETTINGS_REG,
            proto::SET_UNITS_PER_REV,
            settings.get_int(keys::R_MILLIDEGREES_PER_REV),
        );
        batch.push(
            proto::R_SETTINGS_REG,
            proto::SET_MICROSTEPPING,
            settings.get_int(keys::MICRO_STEPS_MODE),
        );
        batch.frames.push(Frame::general(proto::CMD_ENABLE));
        self.send(batch).map(|_| ())
    }

    pub fn enable(&mut self) -> Result<(), TransportError> {
        self.general(proto::CMD_ENABLE)
    }

    pub fn disable(&mut self) -> Result<(), TransportError> {
        self.general(proto::CMD_DISABLE)
    }

    pub fn pause(&mut self) -> Result<(), TransportError> {
        self.general(proto::CMD_PAUSE)
    }

    pub fn resume(&mut self) -> Result<(), TransportError> {
        self.general(proto::CMD_RESUME)
    }

    /// Clears pending commands; used when canceling after a pause. The
    /// interrupt is requested when the controller may still be finishing
    /// the pause deceleration, so the host knows when the clear landed.
    pub fn clear_pending(&mut self, with_interrupt: bool) -> Result<(), TransportError> {
        self.general(proto::CMD_CLEAR)?;
        if with_interrupt {
            self.general(proto::CMD_INTERRUPT)?;
        }
        Ok(())
    }

    /// Moves both axes to their home positions. `stay_open` leaves the
    /// tray window open instead of rotating back over the resin.
    pub fn go_home(
        &mut self,
        settings: &Settings,
        with_interrupt: bool,
        stay_open: bool,
    ) -> Result<f64, TransportError> {
        let mut batch = Batch::new();

        batch.set_r_jerk(settings.get_int(keys::R_HOMING_JERK));
        batch.set_r_speed(settings.get_int(keys::R_HOMING_SPEED));
        // Rotate to the home sensor, but no more than one full rotation.
        batch.home_r(UNITS_PER_REVOLUTION);

        let home_angle = settings.get_int(keys::R_HOMING_ANGLE);
        if home_angle != 0 && !stay_open {
            // Rotate back to cover the resin tray.
            batch.move_r(home_angle);
        }

        batch.set_z_jerk(settings.get_int(keys::Z_HOMING_JERK));
        batch.set_z_speed(settings.get_int(keys::Z_HOMING_SPEED));
        // Up to the Z limit switch, but no more than twice the full build
        // column.
        batch.home_z(-2 * settings.get_int(keys::Z_START_PRINT_POSITION));

        if with_interrupt {
            batch.interrupt();
        }
        self.send(batch)
    }

    /// Homes, then lowers the build head to the start-of-print position.
    /// One interrupt at the end covers the whole excursion.
    pub fn go_to_start_position(&mut self, settings: &Settings) -> Result<f64, TransportError> {
        self.enable()?;
        let mut seconds = self.go_home(settings, false, false)?;

        let mut batch = Batch::new();
        batch.set_r_jerk(settings.get_int(keys::R_START_PRINT_JERK));
        batch.set_r_speed(settings.get_int(keys::R_START_PRINT_SPEED));
        let start_angle = settings.get_int(keys::R_START_PRINT_ANGLE);
        if start_angle != 0 {
            batch.move_r(start_angle);
        }

        batch.set_z_jerk(settings.get_int(keys::Z_START_PRINT_JERK));
        batch.set_z_speed(settings.get_int(keys::Z_START_PRINT_SPEED));
        batch.move_z(settings.get_int(keys::Z_START_PRINT_POSITION));
        batch.interrupt();

        seconds += self.send(batch)?;
        Ok(seconds)
    }

    /// Presses the build head down to deflect the tray below its rest
    /// position. Reuses the approach jerk still in effect.
    pub fn press(&mut self, cls: &CurrentLayerSettings) -> Result<f64, TransportError> {
        let mut batch = Batch::new();
        batch.set_z_speed(cls.press_microns_per_sec);
        if cls.press_micros != 0 {
            batch.move_z(-cls.press_micros);
        }
        batch.interrupt();
        self.send(batch)
    }

    /// Lifts the head back up a full layer height so resin can flow in.
    pub fn unpress(&mut self, cls: &CurrentLayerSettings) -> Result<f64, TransportError> {
        let mut batch = Batch::new();
        batch.set_z_speed(cls.unpress_microns_per_sec);
        if cls.press_micros != 0 {
            batch.move_z(cls.press_micros);
        }
        batch.interrupt();
        self.send(batch)
    }

    /// Peels the freshly cured layer off the tray: rotate the tray out
    /// from under it while lifting the build head.
    pub fn separate(&mut self, cls: &CurrentLayerSettings) -> Result<f64, TransportError> {
        let mut batch = Batch::new();

        batch.set_r_jerk(cls.separation_rot_jerk);
        batch.set_r_speed(cls.separation_rpm);
        if cls.rotation_milli_degrees != 0 {
            batch.move_r(-cls.rotation_milli_degrees);
        }

        batch.set_z_jerk(cls.separation_z_jerk);
        batch.set_z_speed(cls.separation_microns_per_sec);
        if cls.z_lift_microns != 0 {
            batch.move_z(cls.z_lift_microns);
        }

        batch.interrupt();
        self.send(batch)
    }

    /// Moves into exposure position for the next layer, optionally
    /// running the jam-recovery rotation first.
    pub fn approach(
        &mut self,
        cls: &CurrentLayerSettings,
        settings: &Settings,
        unjam_first: bool,
    ) -> Result<f64, TransportError> {
        let mut seconds = 0.0;
        if unjam_first {
            seconds += self.unjam(cls, false)?;
        }

        let mut batch = Batch::new();
        batch.set_r_jerk(cls.approach_rot_jerk);
        batch.set_r_speed(cls.approach_rpm);
        if cls.rotation_milli_degrees != 0 {
            if settings.get_int(keys::HOME_ON_APPROACH) != 0 {
                // Homing on approach absorbs any drag (partial jam) that
                // kept the separation rotation short.
                batch.home_r(2 * cls.rotation_milli_degrees);
            } else {
                batch.move_r(cls.rotation_milli_degrees);
            }
        }

        batch.set_z_jerk(cls.approach_z_jerk);
        batch.set_z_speed(cls.approach_microns_per_sec);
        let delta_z = cls.layer_thickness_microns - cls.z_lift_microns;
        if delta_z != 0 {
            batch.move_z(delta_z);
        }

        batch.interrupt();
        seconds += self.send(batch)?;
        Ok(seconds)
    }

    /// Rotates the tray to block stray projector light and, if allowed,
    /// lifts the head so the print can be inspected.
    pub fn pause_and_inspect(
        &mut self,
        cls: &CurrentLayerSettings,
        settings: &Settings,
    ) -> Result<f64, TransportError> {
        let mut batch = Batch::new();

        // Already separated, so homing speeds are appropriate.
        batch.set_r_jerk(settings.get_int(keys::R_HOMING_JERK));
        batch.set_r_speed(settings.get_int(keys::R_HOMING_SPEED));
        if cls.rotation_milli_degrees != 0 {
            batch.move_r(-cls.rotation_milli_degrees);
        }

        if cls.can_inspect {
            batch.set_z_jerk(settings.get_int(keys::Z_HOMING_JERK));
            batch.set_z_speed(settings.get_int(keys::Z_HOMING_SPEED));
            batch.move_z(cls.inspection_height_microns);
        }

        batch.interrupt();
        self.send(batch)
    }

    /// Undoes `pause_and_inspect` to resume printing.
    pub fn resume_from_inspect(
        &mut self,
        cls: &CurrentLayerSettings,
        settings: &Settings,
    ) -> Result<f64, TransportError> {
        let mut batch = Batch::new();

        batch.set_r_jerk(settings.get_int(keys::R_START_PRINT_JERK));
        batch.set_r_speed(settings.get_int(keys::R_START_PRINT_SPEED));
        if cls.rotation_milli_degrees != 0 {
            batch.move_r(cls.rotation_milli_degrees);
        }

        if cls.can_inspect {
            batch.set_z_jerk(settings.get_int(keys::Z_START_PRINT_JERK));
            batch.set_z_speed(settings.get_int(keys::Z_START_PRINT_SPEED));
            batch.move_z(-cls.inspection_height_microns);
        }

        batch.interrupt();
        self.send(batch)
    }

    /// Attempts to recover from a jam by homing the tray rotation. The
    /// caller decides whether the attempt worked by watching the rotation
    /// sensor. Speed and jerk are whatever separation last set.
    pub fn unjam(
        &mut self,
        cls: &CurrentLayerSettings,
        with_interrupt: bool,
    ) -> Result<f64, TransportError> {
        let mut batch = Batch::new();
        batch.r_speed = f64::from(cls.separation_rpm * R_SPEED_FACTOR) / 60.0;

        batch.home_r(UNITS_PER_REVOLUTION);
        if cls.rotation_milli_degrees != 0 {
            batch.move_r(-cls.rotation_milli_degrees);
        }
        if with_interrupt {
            batch.interrupt();
        }
        self.send(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture(Vec<Frame>);

    impl Transport for &mut Capture {
        fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
            self.0.push(frame);
            Ok(())
        }
    }

    fn cls() -> CurrentLayerSettings {
        CurrentLayerSettings {
            press_micros: 1500,
            press_microns_per_sec: 5000,
            press_wait_ms: 500,
            unpress_microns_per_sec: 3000,
            pre_exposure_delay_sec: 1.0,
            exposure_sec: 2.5,
            separation_rot_jerk: 100_000,
            separation_rpm: 12,
            rotation_milli_degrees: 60_000,
            separation_z_jerk: 100_000,
            separation_microns_per_sec: 3000,
            z_lift_microns: 2000,
            approach_rot_jerk: 100_000,
            approach_rpm: 12,
            approach_z_jerk: 100_000,
            approach_microns_per_sec: 3000,
            layer_thickness_microns: 25,
            inspection_height_microns: 60_000,
            can_inspect: true,
        }
    }

    #[test]
    fn separate_composes_settings_actions_and_interrupt() {
        let mut capture = Capture::default();
        let seconds = Motor::new(&mut capture).separate(&cls()).unwrap();

        let frames = &capture.0;
        assert_eq!(frames.len(), 6);
        assert_eq!(
            (frames[0].register, frames[0].action, frames[0].parameter),
            (proto::R_SETTINGS_REG, proto::SET_JERK, 100_000)
        );
        assert_eq!(
            (frames[1].register, frames[1].action, frames[1].parameter),
            (proto::R_SETTINGS_REG, proto::SET_SPEED, 12 * R_SPEED_FACTOR)
        );
        // The tray rotates backward out from under the layer.
        assert_eq!(
            (frames[2].register, frames[2].action, frames[2].parameter),
            (proto::R_ACTION_REG, proto::ACTION_MOVE, -60_000)
        );
        assert_eq!(
            (frames[4].register, frames[4].action, frames[4].parameter),
            (proto::Z_ACTION_REG, proto::ACTION_MOVE, 2000)
        );
        assert_eq!(
            (frames[5].register, frames[5].action),
            (proto::GENERAL_REG, proto::CMD_INTERRUPT)
        );

        // 60 deg at 12 RPM is 5/6 s, plus 2 mm at 3 mm/s.
        assert!((seconds - (60_000.0 / (12.0 * 6000.0) + 2000.0 / 3000.0)).abs() < 1e-9);
    }

    #[test]
    fn press_skips_the_move_when_depth_is_zero() {
        let mut capture = Capture::default();
        let mut settings = cls();
        settings.press_micros = 0;
        Motor::new(&mut capture).press(&settings).unwrap();

        // Speed setting and interrupt only; no move frame.
        assert!(capture
            .0
            .iter()
            .all(|f| f.register != proto::Z_ACTION_REG));
    }

    #[test]
    fn press_moves_down_and_unpress_moves_up() {
        let mut capture = Capture::default();
        Motor::new(&mut capture).press(&cls()).unwrap();
        let down = capture
            .0
            .iter()
            .find(|f| f.register == proto::Z_ACTION_REG)
            .unwrap()
            .parameter;
        assert_eq!(down, -1500);

        let mut capture = Capture::default();
        Motor::new(&mut capture).unpress(&cls()).unwrap();
        let up = capture
            .0
            .iter()
            .find(|f| f.register == proto::Z_ACTION_REG)
            .unwrap()
            .parameter;
        assert_eq!(up, 1500);
    }

    #[test]
    fn approach_homes_the_rotation_when_configured() {
        let mut settings = Settings::default();
        settings.set(keys::HOME_ON_APPROACH, 1.0);

        let mut capture = Capture::default();
        Motor::new(&mut capture)
            .approach(&cls(), &settings, false)
            .unwrap();
        let home = capture
            .0
            .iter()
            .find(|f| f.register == proto::R_ACTION_REG)
            .unwrap();
        assert_eq!(home.action, proto::ACTION_HOME);
        assert_eq!(home.parameter, 120_000);
    }

    #[test]
    fn unjam_prefix_runs_before_the_approach_motion() {
        let mut capture = Capture::default();
        Motor::new(&mut capture)
            .approach(&cls(), &Settings::default(), true)
            .unwrap();

        // The first rotation command is the recovery home.
        let first_r = capture
            .0
            .iter()
            .find(|f| f.register == proto::R_ACTION_REG)
            .unwrap();
        assert_eq!(first_r.action, proto::ACTION_HOME);
        assert_eq!(first_r.parameter, UNITS_PER_REVOLUTION);
        // And exactly one interrupt, at the very end.
        let interrupts = capture
            .0
            .iter()
            .filter(|f| f.register == proto::GENERAL_REG && f.action == proto::CMD_INTERRUPT)
            .count();
        assert_eq!(interrupts, 1);
        assert_eq!(
            capture.0.last().unwrap().action,
            proto::CMD_INTERRUPT
        );
    }

    #[test]
    fn go_home_can_hold_the_tray_open() {
        let settings = Settings::default();
        let mut capture = Capture::default();
        Motor::new(&mut capture)
            .go_home(&settings, true, true)
            .unwrap();
        // No rotate-back move when staying open.
        assert!(capture
            .0
            .iter()
            .all(|f| !(f.register == proto::R_ACTION_REG && f.action == proto::ACTION_MOVE)));
    }

    #[test]
    fn inspection_lift_is_omitted_when_not_allowed() {
        let mut no_inspect = cls();
        no_inspect.can_inspect = false;

        let mut capture = Capture::default();
        Motor::new(&mut capture)
            .pause_and_inspect(&no_inspect, &Settings::default())
            .unwrap();
        assert!(capture
            .0
            .iter()
            .all(|f| f.register != proto::Z_ACTION_REG));
    }
}
