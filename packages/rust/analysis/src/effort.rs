//! Effort profiling against the athlete's threshold power.

use stagecraft_shared::{
    EffortInterval, EffortLevel, EffortProfile, IntensityZone, IntervalKind, SourceActivity,
};

/// Intervals at or above this share of threshold count as high effort.
pub const HIGH_EFFORT_RATIO: f64 = 0.9;

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Whether an interval counts toward the high-effort tally.
pub fn is_high_effort(interval: &EffortInterval, threshold_power: f64) -> bool {
    interval.kind == IntervalKind::Surge
        || interval
            .avg_power
            .is_some_and(|p| p >= HIGH_EFFORT_RATIO * threshold_power)
}

/// Intensity ratio, load, zone, and effort level for one ride.
///
/// Normalized power is preferred; average power stands in when the ride had
/// no usable power stream. Without any power the ride scores as recovery.
pub fn effort_profile(activity: &SourceActivity, threshold_power: f64) -> EffortProfile {
    let threshold = if threshold_power.is_finite() && threshold_power > 0.0 {
        threshold_power
    } else {
        1.0
    };

    let power = activity.normalized_power.or(activity.avg_power);
    let intensity_ratio = power.map(|p| round_to(p / threshold, 3)).unwrap_or(0.0);
    let hours = activity.duration_minutes / 60.0;
    let load_score = round_to(hours * intensity_ratio.powi(2) * 100.0, 1);
    let zone = IntensityZone::from_ratio(intensity_ratio);

    let high_effort_count = activity
        .intervals
        .iter()
        .filter(|i| is_high_effort(i, threshold))
        .count();

    EffortProfile {
        normalized_power: power,
        threshold_power: threshold,
        intensity_ratio,
        load_score,
        zone,
        effort_level: EffortLevel::from(zone),
        high_effort_count,
    }
}
