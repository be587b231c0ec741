//! Base settings table.
//!
//! A flat name → value table seeded with the machine defaults. Persistence
//! lives outside this crate; whoever loads stored settings writes them in
//! here before printing starts. Names are shared with the per-layer
//! override sheet, which falls back to this table for anything a layer
//! does not override.

use std::collections::HashMap;

// General print geometry and sequencing.
pub const LAYER_THICKNESS: &str = "LayerThicknessMicrons";
pub const BURN_IN_LAYER_COUNT: &str = "BurnInLayerCount";
pub const INSPECTION_HEIGHT: &str = "InspectionHeightMicrons";
pub const MAX_INSPECTION_POSITION: &str = "MaxInspectionPositionMicrons";
pub const JAM_RECOVERY_RETRIES: &str = "JamRecoveryRetries";
pub const MAX_TEMPERATURE: &str = "MaxTemperatureCelsius";
pub const MOTOR_TIMEOUT_FACTOR: &str = "MotorTimeoutFactor";
pub const MIN_MOTOR_TIMEOUT_SEC: &str = "MinMotorTimeoutSec";

// Axis calibration pushed to the motion controller at initialization.
pub const Z_STEP_ANGLE: &str = "ZStepAngleMillidegrees";
pub const Z_MICRONS_PER_REV: &str = "ZMicronsPerMotorRev";
pub const R_STEP_ANGLE: &str = "RStepAngleMillidegrees";
pub const R_MILLIDEGREES_PER_REV: &str = "RMillidegreesPerMotorRev";
pub const MICRO_STEPS_MODE: &str = "MicroStepsMode";

// Homing and start-position motion.
pub const Z_HOMING_JERK: &str = "ZHomingJerk";
pub const Z_HOMING_SPEED: &str = "ZHomingSpeedMicronsPerSec";
pub const R_HOMING_JERK: &str = "RHomingJerk";
pub const R_HOMING_SPEED: &str = "RHomingSpeedRPM";
pub const R_HOMING_ANGLE: &str = "RHomingAngleMilliDegrees";
pub const Z_START_PRINT_JERK: &str = "ZStartPrintJerk";
pub const Z_START_PRINT_SPEED: &str = "ZStartPrintSpeedMicronsPerSec";
pub const Z_START_PRINT_POSITION: &str = "ZStartPrintPositionMicrons";
pub const R_START_PRINT_JERK: &str = "RStartPrintJerk";
pub const R_START_PRINT_SPEED: &str = "RStartPrintSpeedRPM";
pub const R_START_PRINT_ANGLE: &str = "RStartPrintAngleMilliDegrees";
pub const HOME_ON_APPROACH: &str = "HomeOnApproach";

// Per-layer-class settings. Three parallel families; `layer` module picks
// the family for the running layer's class.
pub const FIRST_EXPOSURE: &str = "FirstExposureSec";
pub const BURN_IN_EXPOSURE: &str = "BurnInExposureSec";
pub const MODEL_EXPOSURE: &str = "ModelExposureSec";

macro_rules! class_keys {
    ($($name:ident => $suffix:literal;)*) => {
        $(
            pub mod $name {
                pub const FIRST: &str = concat!("First", $suffix);
                pub const BURN_IN: &str = concat!("BurnIn", $suffix);
                pub const MODEL: &str = concat!("Model", $suffix);
            }
        )*
    };
}

class_keys! {
    press_micros => "PressMicrons";
    press_speed => "PressMicronsPerSec";
    press_wait => "PressWaitMS";
    unpress_speed => "UnpressMicronsPerSec";
    pre_exposure_delay => "PreExposureDelaySec";
    separation_rot_jerk => "SeparationRotJerk";
    separation_rpm => "SeparationRPM";
    rotation => "RotationMilliDegrees";
    separation_z_jerk => "SeparationZJerk";
    separation_speed => "SeparationMicronsPerSec";
    z_lift => "ZLiftMicrons";
    approach_rot_jerk => "ApproachRotJerk";
    approach_rpm => "ApproachRPM";
    approach_z_jerk => "ApproachZJerk";
    approach_speed => "ApproachMicronsPerSec";
}

/// The base settings table.
#[derive(Clone, Debug)]
pub struct Settings {
    values: HashMap<&'static str, f64>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut values = HashMap::new();

        let defaults: &[(&'static str, f64)] = &[
            (LAYER_THICKNESS, 25.0),
            (BURN_IN_LAYER_COUNT, 1.0),
            (INSPECTION_HEIGHT, 60_000.0),
            (MAX_INSPECTION_POSITION, 400_000.0),
            (JAM_RECOVERY_RETRIES, 2.0),
            (MAX_TEMPERATURE, 80.0),
            (MOTOR_TIMEOUT_FACTOR, 1.5),
            (MIN_MOTOR_TIMEOUT_SEC, 15.0),
            (Z_STEP_ANGLE, 1800.0),
            (Z_MICRONS_PER_REV, 2000.0),
            (R_STEP_ANGLE, 1800.0),
            (R_MILLIDEGREES_PER_REV, 180_000.0),
            (MICRO_STEPS_MODE, 6.0),
            (Z_HOMING_JERK, 500_000.0),
            (Z_HOMING_SPEED, 4500.0),
            (R_HOMING_JERK, 100_000.0),
            (R_HOMING_SPEED, 5.0),
            (R_HOMING_ANGLE, -60_000.0),
            (Z_START_PRINT_JERK, 100_000.0),
            (Z_START_PRINT_SPEED, 4500.0),
            (Z_START_PRINT_POSITION, -165_000.0),
            (R_START_PRINT_JERK, 100_000.0),
            (R_START_PRINT_SPEED, 5.0),
            (R_START_PRINT_ANGLE, 60_000.0),
            (HOME_ON_APPROACH, 0.0),
            (FIRST_EXPOSURE, 5.0),
            (BURN_IN_EXPOSURE, 4.0),
            (MODEL_EXPOSURE, 2.5),
            (press_micros::FIRST, 0.0),
            (press_micros::BURN_IN, 0.0),
            (press_micros::MODEL, 0.0),
            (press_speed::FIRST, 5000.0),
            (press_speed::BURN_IN, 5000.0),
            (press_speed::MODEL, 5000.0),
            (press_wait::FIRST, 0.0),
            (press_wait::BURN_IN, 0.0),
            (press_wait::MODEL, 0.0),
            (unpress_speed::FIRST, 5000.0),
            (unpress_speed::BURN_IN, 5000.0),
            (unpress_speed::MODEL, 5000.0),
            (pre_exposure_delay::FIRST, 0.0),
            (pre_exposure_delay::BURN_IN, 0.0),
            (pre_exposure_delay::MODEL, 0.0),
            (separation_rot_jerk::FIRST, 100_000.0),
            (separation_rot_jerk::BURN_IN, 100_000.0),
            (separation_rot_jerk::MODEL, 100_000.0),
            (separation_rpm::FIRST, 6.0),
            (separation_rpm::BURN_IN, 11.0),
            (separation_rpm::MODEL, 12.0),
            (rotation::FIRST, 60_000.0),
            (rotation::BURN_IN, 60_000.0),
            (rotation::MODEL, 60_000.0),
            (separation_z_jerk::FIRST, 100_000.0),
            (separation_z_jerk::BURN_IN, 100_000.0),
            (separation_z_jerk::MODEL, 100_000.0),
            (separation_speed::FIRST, 3000.0),
            (separation_speed::BURN_IN, 3000.0),
            (separation_speed::MODEL, 3000.0),
            (z_lift::FIRST, 2000.0),
            (z_lift::BURN_IN, 2000.0),
            (z_lift::MODEL, 2000.0),
            (approach_rot_jerk::FIRST, 100_000.0),
            (approach_rot_jerk::BURN_IN, 100_000.0),
            (approach_rot_jerk::MODEL, 100_000.0),
            (approach_rpm::FIRST, 6.0),
            (approach_rpm::BURN_IN, 11.0),
            (approach_rpm::MODEL, 12.0),
            (approach_z_jerk::FIRST, 100_000.0),
            (approach_z_jerk::BURN_IN, 100_000.0),
            (approach_z_jerk::MODEL, 100_000.0),
            (approach_speed::FIRST, 3000.0),
            (approach_speed::BURN_IN, 3000.0),
            (approach_speed::MODEL, 3000.0),
        ];
        for &(name, value) in defaults {
            values.insert(name, value);
        }
        Settings { values }
    }
}

impl Settings {
    pub fn get_double(&self, name: &str) -> f64 {
        match self.values.get(name) {
            Some(&value) => value,
            None => {
                log::error!("unknown setting {:?}", name);
                0.0
            }
        }
    }

    pub fn get_int(&self, name: &str) -> i32 {
        self.get_double(name) as i32
    }

    /// Overrides a base value. The name must be one of the known keys.
    pub fn set(&mut self, name: &'static str, value: f64) {
        self.values.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_present() {
        let settings = Settings::default();
        assert_eq!(settings.get_int(LAYER_THICKNESS), 25);
        assert_eq!(settings.get_double(MODEL_EXPOSURE), 2.5);
        assert_eq!(settings.get_double(separation_rpm::BURN_IN), 11.0);
    }

    #[test]
    fn set_overrides_defaults() {
        let mut settings = Settings::default();
        settings.set(LAYER_THICKNESS, 50.0);
        assert_eq!(settings.get_int(LAYER_THICKNESS), 50);
    }

    #[test]
    fn unknown_name_reads_as_zero() {
        let settings = Settings::default();
        assert_eq!(settings.get_double("NoSuchSetting"), 0.0);
    }
}
