//! Float helpers shared across the motion kernel.
//!
//! All motion math runs in user units and minutes: velocities are user
//! units per minute, jerk is user units per minute cubed. `libm` keeps the
//! kernel free of std float intrinsics.

/// Rounding slop below which a length or velocity is treated as zero.
pub const EPSILON: f64 = 0.000_01;

pub const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;

/// Converts a duration in minutes to microseconds.
pub fn usec(minutes: f64) -> f64 {
    minutes * MICROSECONDS_PER_MINUTE
}

pub fn fp_zero(a: f64) -> bool {
    libm::fabs(a) < EPSILON
}

pub fn fp_nonzero(a: f64) -> bool {
    libm::fabs(a) > EPSILON
}

pub fn min4(a: f64, b: f64, c: f64, d: f64) -> f64 {
    a.min(b).min(c.min(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_classification() {
        assert!(fp_zero(0.0));
        assert!(fp_zero(EPSILON / 2.0));
        assert!(fp_zero(-EPSILON / 2.0));
        assert!(fp_nonzero(2.0 * EPSILON));
        assert!(fp_nonzero(-2.0 * EPSILON));
    }

    #[test]
    fn minute_conversion() {
        assert_eq!(usec(1.0), 60e6);
        assert_eq!(usec(0.5), 30e6);
    }

    #[test]
    fn min4_picks_smallest() {
        assert_eq!(min4(4.0, 2.0, 9.0, 3.0), 2.0);
        assert_eq!(min4(-1.0, 2.0, 9.0, 3.0), -1.0);
    }
}
