//! Layer classification and effective per-layer settings.

use crate::overlay::LayerParams;
use crate::settings as keys;

/// Which family of settings applies to a layer.
///
/// The first layer and the handful of burn-in layers after it cure longer
/// and separate more gently than the model layers that make up the rest of
/// the print.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LayerKind {
    First,
    BurnIn,
    Model,
}

impl LayerKind {
    /// Classifies a 1-based layer number.
    pub fn of(layer: i32, burn_in_layers: i32) -> LayerKind {
        if layer <= 1 {
            LayerKind::First
        } else if layer <= 1 + burn_in_layers {
            LayerKind::BurnIn
        } else {
            LayerKind::Model
        }
    }

    /// Picks this class's member of a `(first, burn_in, model)` key family.
    fn pick(self, family: (&'static str, &'static str, &'static str)) -> &'static str {
        match self {
            LayerKind::First => family.0,
            LayerKind::BurnIn => family.1,
            LayerKind::Model => family.2,
        }
    }
}

/// Everything the print sequence needs to know about the layer it is
/// currently building. Captured once at layer start so a settings change
/// mid-layer cannot produce a half-old, half-new layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CurrentLayerSettings {
    pub press_micros: i32,
    pub press_microns_per_sec: i32,
    pub press_wait_ms: i32,
    pub unpress_microns_per_sec: i32,

    pub pre_exposure_delay_sec: f64,
    pub exposure_sec: f64,

    pub separation_rot_jerk: i32,
    pub separation_rpm: i32,
    pub rotation_milli_degrees: i32,
    pub separation_z_jerk: i32,
    pub separation_microns_per_sec: i32,
    pub z_lift_microns: i32,

    pub approach_rot_jerk: i32,
    pub approach_rpm: i32,
    pub approach_z_jerk: i32,
    pub approach_microns_per_sec: i32,

    pub layer_thickness_microns: i32,
    pub inspection_height_microns: i32,
    /// Whether the build head may lift for inspection at this height.
    pub can_inspect: bool,
}

impl CurrentLayerSettings {
    /// Resolves the effective settings for `layer`, consulting the
    /// override sheet first and the base table otherwise.
    ///
    /// `current_z_position` is the (negative, relative to home) build head
    /// position, used to decide whether an inspection lift would exceed
    /// the printer's frame.
    pub fn resolve(params: &LayerParams, layer: i32, current_z_position: i32) -> Self {
        let burn_in = params.base.get_int(keys::BURN_IN_LAYER_COUNT);
        let kind = LayerKind::of(layer, burn_in);

        let int = |name: &str| params.get_int(layer, name);
        let double = |name: &str| params.get_double(layer, name);

        let exposure_key = kind.pick((
            keys::FIRST_EXPOSURE,
            keys::BURN_IN_EXPOSURE,
            keys::MODEL_EXPOSURE,
        ));

        let class = |family: (&'static str, &'static str, &'static str)| kind.pick(family);

        let inspection_height = int(keys::INSPECTION_HEIGHT);
        let max_inspection = params.base.get_int(keys::MAX_INSPECTION_POSITION);

        CurrentLayerSettings {
            press_micros: int(class((
                keys::press_micros::FIRST,
                keys::press_micros::BURN_IN,
                keys::press_micros::MODEL,
            ))),
            press_microns_per_sec: int(class((
                keys::press_speed::FIRST,
                keys::press_speed::BURN_IN,
                keys::press_speed::MODEL,
            ))),
            press_wait_ms: int(class((
                keys::press_wait::FIRST,
                keys::press_wait::BURN_IN,
                keys::press_wait::MODEL,
            ))),
            unpress_microns_per_sec: int(class((
                keys::unpress_speed::FIRST,
                keys::unpress_speed::BURN_IN,
                keys::unpress_speed::MODEL,
            ))),
            pre_exposure_delay_sec: double(class((
                keys::pre_exposure_delay::FIRST,
                keys::pre_exposure_delay::BURN_IN,
                keys::pre_exposure_delay::MODEL,
            ))),
            exposure_sec: double(exposure_key),
            separation_rot_jerk: int(class((
                keys::separation_rot_jerk::FIRST,
                keys::separation_rot_jerk::BURN_IN,
                keys::separation_rot_jerk::MODEL,
            ))),
            separation_rpm: int(class((
                keys::separation_rpm::FIRST,
                keys::separation_rpm::BURN_IN,
                keys::separation_rpm::MODEL,
            ))),
            rotation_milli_degrees: int(class((
                keys::rotation::FIRST,
                keys::rotation::BURN_IN,
                keys::rotation::MODEL,
            ))),
            separation_z_jerk: int(class((
                keys::separation_z_jerk::FIRST,
                keys::separation_z_jerk::BURN_IN,
                keys::separation_z_jerk::MODEL,
            ))),
            separation_microns_per_sec: int(class((
                keys::separation_speed::FIRST,
                keys::separation_speed::BURN_IN,
                keys::separation_speed::MODEL,
            ))),
            z_lift_microns: int(class((
                keys::z_lift::FIRST,
                keys::z_lift::BURN_IN,
                keys::z_lift::MODEL,
            ))),
            approach_rot_jerk: int(class((
                keys::approach_rot_jerk::FIRST,
                keys::approach_rot_jerk::BURN_IN,
                keys::approach_rot_jerk::MODEL,
            ))),
            approach_rpm: int(class((
                keys::approach_rpm::FIRST,
                keys::approach_rpm::BURN_IN,
                keys::approach_rpm::MODEL,
            ))),
            approach_z_jerk: int(class((
                keys::approach_z_jerk::FIRST,
                keys::approach_z_jerk::BURN_IN,
                keys::approach_z_jerk::MODEL,
            ))),
            approach_microns_per_sec: int(class((
                keys::approach_speed::FIRST,
                keys::approach_speed::BURN_IN,
                keys::approach_speed::MODEL,
            ))),
            layer_thickness_microns: int(keys::LAYER_THICKNESS),
            inspection_height_microns: inspection_height,
            can_inspect: inspection_height != 0
                && (-current_z_position) + inspection_height <= max_inspection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::Overlay;
    use crate::settings::Settings;

    #[test]
    fn classification_follows_burn_in_count() {
        assert_eq!(LayerKind::of(1, 3), LayerKind::First);
        assert_eq!(LayerKind::of(2, 3), LayerKind::BurnIn);
        assert_eq!(LayerKind::of(4, 3), LayerKind::BurnIn);
        assert_eq!(LayerKind::of(5, 3), LayerKind::Model);
        assert_eq!(LayerKind::of(2, 0), LayerKind::Model);
    }

    #[test]
    fn class_selects_setting_family() {
        let mut base = Settings::default();
        base.set(keys::BURN_IN_LAYER_COUNT, 2.0);
        base.set(keys::FIRST_EXPOSURE, 8.0);
        base.set(keys::BURN_IN_EXPOSURE, 6.0);
        base.set(keys::MODEL_EXPOSURE, 2.0);
        base.set(keys::separation_rpm::FIRST, 6.0);
        base.set(keys::separation_rpm::MODEL, 12.0);
        let params = LayerParams::new(base, Overlay::default());

        let first = CurrentLayerSettings::resolve(&params, 1, 0);
        assert_eq!(first.exposure_sec, 8.0);
        assert_eq!(first.separation_rpm, 6);

        let burn_in = CurrentLayerSettings::resolve(&params, 2, 0);
        assert_eq!(burn_in.exposure_sec, 6.0);

        let model = CurrentLayerSettings::resolve(&params, 10, 0);
        assert_eq!(model.exposure_sec, 2.0);
        assert_eq!(model.separation_rpm, 12);
    }

    #[test]
    fn overlay_overrides_the_class_family() {
        let base = Settings::default();
        let sheet = format!("Layer,{}\r9,1.25\r", keys::MODEL_EXPOSURE);
        let params = LayerParams::new(base, Overlay::load(&sheet).unwrap());

        let overridden = CurrentLayerSettings::resolve(&params, 9, 0);
        assert_eq!(overridden.exposure_sec, 1.25);
        let untouched = CurrentLayerSettings::resolve(&params, 10, 0);
        assert_eq!(untouched.exposure_sec, 2.5);
    }

    #[test]
    fn inspection_is_blocked_when_the_lift_would_overtravel() {
        let mut base = Settings::default();
        base.set(keys::INSPECTION_HEIGHT, 60_000.0);
        base.set(keys::MAX_INSPECTION_POSITION, 100_000.0);
        let params = LayerParams::new(base, Overlay::default());

        // Near the tray: plenty of room to lift.
        assert!(CurrentLayerSettings::resolve(&params, 5, -10_000).can_inspect);
        // Far up the column: lifting would exceed the frame.
        assert!(!CurrentLayerSettings::resolve(&params, 5, -90_000).can_inspect);
    }
}
