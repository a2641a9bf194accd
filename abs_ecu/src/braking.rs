//! Distance → braking decision engine.
//!
//! A pure mapping from one validated telemetry reading to a braking
//! command. No state is carried between iterations; the command is
//! recomputed from scratch every cycle.

use abs_common::frame::SensorStatus;

/// Braking intent for one control iteration.
///
/// `percent` is always in `[0, 100]` and is 0 whenever the sensor
/// status inhibits braking, regardless of the distance value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrakeCommand {
    /// Whether the brake is engaged.
    pub active: bool,
    /// Braking strength in percent of full actuation.
    pub percent: u8,
}

impl BrakeCommand {
    /// Command that releases the brake entirely.
    pub const OFF: Self = Self {
        active: false,
        percent: 0,
    };
}

/// Map a distance reading to a braking command.
///
/// - Inhibited status (`!= OK`) → off, regardless of distance
/// - `distance_mm >= threshold_mm` → off (equality releases)
/// - `distance_mm <= min_distance_mm` → full braking (clamped below min)
/// - Otherwise linear interpolation between the bounds
///
/// The interpolation fraction is the only floating-point computation in
/// the core. Rounding is round-half-up on the scaled fraction; callers
/// rely on this contract (midpoint of [50, 300] is exactly 50%).
pub fn decide(
    distance_mm: u16,
    status: SensorStatus,
    threshold_mm: u16,
    min_distance_mm: u16,
) -> BrakeCommand {
    if !status.is_ok() {
        return BrakeCommand::OFF;
    }
    if distance_mm >= threshold_mm {
        return BrakeCommand::OFF;
    }
    if distance_mm <= min_distance_mm {
        return BrakeCommand {
            active: true,
            percent: 100,
        };
    }

    let span = f64::from(threshold_mm - min_distance_mm);
    let frac = (f64::from(threshold_mm) - f64::from(distance_mm)) / span;
    let frac = frac.clamp(0.0, 1.0);
    // Round half up; the truncating cast is the rounding step.
    let percent = (frac * 100.0 + 0.5) as u8;

    BrakeCommand {
        active: percent > 0,
        percent,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: u16 = 300;
    const MIN: u16 = 50;

    fn decide_ok(distance_mm: u16) -> BrakeCommand {
        decide(distance_mm, SensorStatus::Ok, THRESHOLD, MIN)
    }

    #[test]
    fn far_reading_releases() {
        assert_eq!(decide_ok(400), BrakeCommand::OFF);
    }

    #[test]
    fn at_min_distance_brakes_fully() {
        let cmd = decide_ok(50);
        assert_eq!(cmd, BrakeCommand { active: true, percent: 100 });
    }

    #[test]
    fn below_min_distance_clamps_to_full() {
        let cmd = decide_ok(25);
        assert_eq!(cmd.percent, 100);
        assert!(cmd.active);
    }

    #[test]
    fn midpoint_is_half_braking() {
        let cmd = decide_ok(175);
        assert_eq!(cmd, BrakeCommand { active: true, percent: 50 });
    }

    #[test]
    fn inhibited_status_overrides_proximity() {
        let cmd = decide(10, SensorStatus::Timeout, THRESHOLD, MIN);
        assert_eq!(cmd, BrakeCommand::OFF);

        let cmd = decide(10, SensorStatus::OutOfRange, THRESHOLD, MIN);
        assert_eq!(cmd, BrakeCommand::OFF);

        let cmd = decide(10, SensorStatus::Fault(0x42), THRESHOLD, MIN);
        assert_eq!(cmd, BrakeCommand::OFF);
    }

    #[test]
    fn threshold_boundary_releases_exactly() {
        assert_eq!(decide_ok(THRESHOLD), BrakeCommand::OFF);
        // One millimetre inside, the fraction still rounds down to 0%;
        // the first engaged command appears at two millimetres inside.
        assert!(!decide_ok(THRESHOLD - 1).active);
        assert_eq!(decide_ok(THRESHOLD - 2).percent, 1);
    }

    #[test]
    fn min_boundary_brakes_fully_exactly() {
        assert_eq!(decide_ok(MIN).percent, 100);
        // Half-up rounding keeps 100% one millimetre inside the bound.
        assert_eq!(decide_ok(MIN + 1).percent, 100);
        assert_eq!(decide_ok(MIN + 2).percent, 99);
    }

    #[test]
    fn percent_is_monotonic_in_distance() {
        let mut last = 100;
        for distance in MIN..=THRESHOLD {
            let cmd = decide_ok(distance);
            assert!(
                cmd.percent <= last,
                "percent rose from {last} to {} at {distance} mm",
                cmd.percent
            );
            assert!(cmd.percent <= 100);
            last = cmd.percent;
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn active_tracks_nonzero_percent() {
        for distance in 0..=500u16 {
            let cmd = decide_ok(distance);
            assert_eq!(cmd.active, cmd.percent > 0);
        }
    }
}
