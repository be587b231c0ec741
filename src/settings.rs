//! Per-axis calibration settings and derived step rates.

use proto::Status;

/// Calibration for one axis, populated by settings commands from the host.
///
/// All five values start unset and must be written (with valid contents)
/// before the axis may move; `validate` gates every motion command on that.
#[derive(Copy, Clone, Debug, Default)]
pub struct AxisSettings {
    /// Rotation per motor step, degrees.
    step_angle: f64,
    /// User units of travel per motor revolution (microns for Z,
    /// millidegrees for R).
    units_per_revolution: f64,
    /// Maximum jerk, user units per minute cubed.
    max_jerk: f64,
    /// Target speed for moves, user units per minute.
    speed: f64,
    /// Microsteps per full step: 1, 2, 4, 8, 16 or 32.
    microstepping_factor: u8,
}

impl AxisSettings {
    /// Sets the step angle from a value in millidegrees per step.
    pub fn set_step_angle(&mut self, value: i32) -> Result<(), Status> {
        if value <= 0 {
            return Err(Status::StepAngleInvalid);
        }
        self.step_angle = f64::from(value) / 1000.0;
        Ok(())
    }

    /// Sets the units of travel per motor revolution.
    pub fn set_units_per_revolution(&mut self, value: i32) -> Result<(), Status> {
        if value <= 0 {
            return Err(Status::UnitsPerRevInvalid);
        }
        self.units_per_revolution = f64::from(value);
        Ok(())
    }

    /// Sets the maximum jerk from a value in units/minute³ divided by 10⁶.
    pub fn set_max_jerk(&mut self, value: i32) -> Result<(), Status> {
        if value <= 0 {
            return Err(Status::MaxJerkInvalid);
        }
        self.max_jerk = f64::from(value) * 1e6;
        Ok(())
    }

    /// Sets the target speed in units/minute.
    pub fn set_speed(&mut self, value: i32) -> Result<(), Status> {
        if value <= 0 {
            return Err(Status::SpeedInvalid);
        }
        self.speed = f64::from(value);
        Ok(())
    }

    /// Sets the microstepping mode: 1 = full step, 2 = half step, up to
    /// 6 = 1/32 step.
    pub fn set_microstepping_mode(&mut self, value: i32) -> Result<(), Status> {
        if value < 1 || value > 6 {
            return Err(Status::MicrosteppingInvalid);
        }
        self.microstepping_factor = 1 << (value - 1);
        Ok(())
    }

    /// Step pulses required to move this axis by one user unit.
    pub fn pulses_per_unit(&self) -> f64 {
        (360.0 * f64::from(self.microstepping_factor))
            / (self.step_angle * self.units_per_revolution)
    }

    pub fn max_jerk(&self) -> f64 {
        self.max_jerk
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Confirms every setting has been given a valid value since reset.
    ///
    /// The error identifies the first missing setting so the host can read
    /// it out of the status register.
    pub fn validate(&self) -> Result<(), Status> {
        if self.max_jerk == 0.0 {
            return Err(Status::MaxJerkInvalid);
        }
        if self.speed == 0.0 {
            return Err(Status::SpeedInvalid);
        }
        if self.microstepping_factor == 0 {
            return Err(Status::MicrosteppingInvalid);
        }
        if self.units_per_revolution == 0.0 {
            return Err(Status::UnitsPerRevInvalid);
        }
        if self.step_angle == 0.0 {
            return Err(Status::StepAngleInvalid);
        }
        Ok(())
    }
}
