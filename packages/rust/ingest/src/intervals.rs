//! Effort segmentation: fixed windows, normalized power, interval selection.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use stagecraft_model::{GenerationFailure, GenerationRequest, TextGenerator, generate_json, tasks};
use stagecraft_shared::{EffortInterval, IntervalKind, Provenance};

use crate::activity::ActivityStreams;

/// Rides at least this long get the two-interval fallback.
pub const LONG_RIDE_MINUTES: f64 = 45.0;

/// Rolling window for normalized power, in seconds.
const NP_WINDOW_SECS: f64 = 30.0;

const MIN_MODEL_INTERVALS: usize = 2;
const MAX_MODEL_INTERVALS: usize = 5;

/// Per-window stream statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    pub index: usize,
    pub start_minute: f64,
    pub duration_minutes: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_heart_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_heart_rate: Option<f64>,
}

/// Overall ride numbers used by the heuristic fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct RideStats {
    pub duration_minutes: f64,
    pub avg_power: Option<f64>,
    pub max_power: Option<f64>,
    pub avg_heart_rate: Option<f64>,
}

// ---------------------------------------------------------------------------
// Stream math
// ---------------------------------------------------------------------------

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn max(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |best: Option<f64>, v| Some(best.map_or(v, |b| b.max(v))))
}

/// Sample times in seconds; 1 Hz when the time stream is missing.
fn sample_times(streams: &ActivityStreams, len: usize) -> Vec<f64> {
    if streams.time.len() >= len {
        streams.time[..len].to_vec()
    } else {
        (0..len).map(|i| i as f64).collect()
    }
}

/// Values of `series` whose sample time falls in `[from_s, to_s)`.
fn span_values(times: &[f64], series: &[Option<f64>], from_s: f64, to_s: f64) -> Vec<f64> {
    times
        .iter()
        .zip(series)
        .filter(|(t, _)| **t >= from_s && **t < to_s)
        .filter_map(|(_, v)| *v)
        .collect()
}

/// Average and peak power over a span of the ride, if a power stream exists.
pub fn span_power(
    streams: &ActivityStreams,
    start_minute: f64,
    end_minute: f64,
) -> (Option<f64>, Option<f64>) {
    let times = sample_times(streams, streams.watts.len());
    let values = span_values(&times, &streams.watts, start_minute * 60.0, end_minute * 60.0);
    (mean(values.iter().copied()), max(values.iter().copied()))
}

fn span_heart_rate(streams: &ActivityStreams, start_minute: f64, end_minute: f64) -> Option<f64> {
    let times = sample_times(streams, streams.heartrate.len());
    let values = span_values(&times, &streams.heartrate, start_minute * 60.0, end_minute * 60.0);
    mean(values.into_iter())
}

/// Split the streams into fixed windows.
pub fn summarize_windows(
    streams: &ActivityStreams,
    window_minutes: f64,
    duration_minutes: f64,
) -> Vec<WindowSummary> {
    if window_minutes <= 0.0 || duration_minutes <= 0.0 {
        return Vec::new();
    }
    let power_times = sample_times(streams, streams.watts.len());
    let hr_times = sample_times(streams, streams.heartrate.len());

    let mut windows = Vec::new();
    let mut start = 0.0;
    let mut index = 0;
    while start < duration_minutes {
        let end = (start + window_minutes).min(duration_minutes);
        let (from_s, to_s) = (start * 60.0, end * 60.0);
        let watts = span_values(&power_times, &streams.watts, from_s, to_s);
        let hr = span_values(&hr_times, &streams.heartrate, from_s, to_s);
        windows.push(WindowSummary {
            index,
            start_minute: start,
            duration_minutes: end - start,
            avg_power: mean(watts.iter().copied()).map(round1),
            max_power: max(watts.iter().copied()),
            avg_heart_rate: mean(hr.iter().copied()).map(round1),
            max_heart_rate: max(hr.iter().copied()),
        });
        start = end;
        index += 1;
    }
    windows
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// 30-second rolling fourth-power mean of the power stream.
///
/// `None` when there is less than one full rolling window of power data.
pub fn normalized_power(streams: &ActivityStreams) -> Option<f64> {
    let times = sample_times(streams, streams.watts.len());
    let samples: Vec<(f64, f64)> = times
        .iter()
        .zip(&streams.watts)
        .map(|(t, w)| (*t, w.unwrap_or(0.0)))
        .collect();
    let first = samples.first()?.0;

    let mut lo = 0;
    let mut window_sum = 0.0;
    let mut fourth_sum = 0.0;
    let mut count = 0usize;
    for hi in 0..samples.len() {
        let (t, w) = samples[hi];
        window_sum += w;
        while samples[lo].0 <= t - NP_WINDOW_SECS {
            window_sum -= samples[lo].1;
            lo += 1;
        }
        if t - first + 1.0 >= NP_WINDOW_SECS {
            let rolling = window_sum / (hi - lo + 1) as f64;
            fourth_sum += rolling.powi(4);
            count += 1;
        }
    }
    (count > 0).then(|| (fourth_sum / count as f64).powf(0.25))
}

// ---------------------------------------------------------------------------
// Interval selection
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ModelSelection {
    #[serde(default)]
    intervals: Vec<ModelInterval>,
}

#[derive(Debug, Deserialize)]
struct ModelInterval {
    start_minute: f64,
    duration_minutes: f64,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

const SELECT_SYSTEM: &str = "You are a cycling coach reading a ride file. Pick the moments of the ride \
that would make the best story beats. Answer with a single JSON object and nothing else.";

fn selection_prompt(windows: &[WindowSummary], stats: &RideStats) -> String {
    let table = serde_json::to_string(windows).unwrap_or_else(|_| "[]".into());
    format!(
        "Ride duration: {:.0} minutes. Average power: {}.\n\
         Per-window summary (JSON): {table}\n\n\
         Choose {MIN_MODEL_INTERVALS} to {MAX_MODEL_INTERVALS} narratively significant intervals. \
         Return {{\"intervals\": [{{\"start_minute\": number, \"duration_minutes\": number, \
         \"kind\": surge|sustained|steady|recovery, \"description\": string}}]}}.",
        stats.duration_minutes,
        stats
            .avg_power
            .map(|p| format!("{p:.0} W"))
            .unwrap_or_else(|| "unknown".into()),
    )
}

/// Pick intervals via the model, falling back to ride-level heuristics.
#[instrument(skip_all, fields(duration = stats.duration_minutes, windows = windows.len()))]
pub async fn select_intervals(
    generator: &dyn TextGenerator,
    streams: &ActivityStreams,
    windows: &[WindowSummary],
    stats: &RideStats,
) -> (Vec<EffortInterval>, Provenance) {
    if !windows.is_empty() {
        let request = GenerationRequest::new(
            tasks::SELECT_INTERVALS,
            SELECT_SYSTEM,
            selection_prompt(windows, stats),
        );
        match generate_json::<ModelSelection>(generator, request).await {
            Ok(selection) => match validate_selection(selection.intervals, streams, stats) {
                Ok(intervals) => {
                    debug!(count = intervals.len(), "model intervals accepted");
                    return (intervals, Provenance::Model);
                }
                Err(reason) => warn!(%reason, "model intervals rejected, using heuristics"),
            },
            Err(GenerationFailure::Disabled) => {}
            Err(e) => warn!(error = %e, "interval selection failed, using heuristics"),
        }
    }

    (heuristic_intervals(streams, stats), Provenance::Fallback)
}

/// Bounds-check and clamp a model selection.
fn validate_selection(
    raw: Vec<ModelInterval>,
    streams: &ActivityStreams,
    stats: &RideStats,
) -> Result<Vec<EffortInterval>, String> {
    if !(MIN_MODEL_INTERVALS..=MAX_MODEL_INTERVALS).contains(&raw.len()) {
        return Err(format!("expected 2-5 intervals, got {}", raw.len()));
    }

    let ride = stats.duration_minutes;
    let mut intervals = Vec::with_capacity(raw.len());
    for m in raw {
        if !m.start_minute.is_finite() || !m.duration_minutes.is_finite() {
            return Err("non-finite interval bounds".into());
        }
        let start = m.start_minute.clamp(0.0, ride);
        let end = (start + m.duration_minutes.max(0.0)).min(ride);
        if end - start < 0.5 {
            return Err(format!("interval at minute {start:.1} is empty after clamping"));
        }
        let kind = m
            .kind
            .as_deref()
            .and_then(|k| k.parse::<IntervalKind>().ok())
            .unwrap_or(IntervalKind::Steady);
        intervals.push(build_interval(streams, stats, start, end, kind, m.description));
    }

    intervals.sort_by(|a, b| a.start_minute.total_cmp(&b.start_minute));
    Ok(intervals)
}

fn build_interval(
    streams: &ActivityStreams,
    stats: &RideStats,
    start: f64,
    end: f64,
    kind: IntervalKind,
    description: Option<String>,
) -> EffortInterval {
    let (avg_power, max_power) = span_power(streams, start, end);
    let avg_power = avg_power.map(round1).or(stats.avg_power);
    let description = description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| describe(kind, end - start, avg_power));
    // Round the start first and floor the length so the interval stays inside the ride
    let start_minute = round1(start);
    let duration_minutes = (((end - start_minute) * 10.0).floor() / 10.0).max(0.0);
    EffortInterval {
        start_minute,
        duration_minutes,
        avg_power,
        max_power: max_power.or(stats.max_power),
        avg_heart_rate: span_heart_rate(streams, start, end).map(round1).or(stats.avg_heart_rate),
        kind,
        description,
    }
}

fn describe(kind: IntervalKind, minutes: f64, avg_power: Option<f64>) -> String {
    match avg_power {
        Some(p) => format!("{minutes:.0} min {kind} effort at {p:.0} W"),
        None => format!("{minutes:.0} min {kind} effort"),
    }
}

/// Intervals derived from overall ride statistics.
///
/// Rides of [`LONG_RIDE_MINUTES`] or more get an "early move" near 30% of the
/// ride and a "finale" over the closing minutes; shorter rides get one
/// "steady effort" interval.
pub fn heuristic_intervals(streams: &ActivityStreams, stats: &RideStats) -> Vec<EffortInterval> {
    let d = stats.duration_minutes;
    if d <= 0.0 {
        return Vec::new();
    }

    let scaled = |factor: f64| stats.avg_power.map(|p| round1(p * factor));
    let with_stream_power = |mut interval: EffortInterval, factor: f64| {
        let (avg, peak) = span_power(streams, interval.start_minute, interval.end_minute());
        interval.avg_power = avg.map(round1).or_else(|| scaled(factor));
        interval.max_power = peak.or(stats.max_power);
        interval
    };

    if d >= LONG_RIDE_MINUTES {
        let early_len = (d * 0.15).clamp(5.0, 12.0);
        let early_start = d * 0.3;
        let finale_len = (d * 0.2).clamp(5.0, 15.0);
        let finale_start = d - finale_len;

        let early = EffortInterval {
            start_minute: round1(early_start),
            duration_minutes: round1(early_len),
            avg_power: None,
            max_power: None,
            avg_heart_rate: stats.avg_heart_rate,
            kind: IntervalKind::Sustained,
            description: "early move".into(),
        };
        let finale = EffortInterval {
            start_minute: round1(finale_start),
            duration_minutes: d - round1(finale_start),
            avg_power: None,
            max_power: None,
            avg_heart_rate: stats.avg_heart_rate,
            kind: IntervalKind::Surge,
            description: "finale".into(),
        };
        vec![with_stream_power(early, 1.10), with_stream_power(finale, 1.15)]
    } else {
        let steady = EffortInterval {
            start_minute: round1(d * 0.25),
            duration_minutes: round1(d * 0.5),
            avg_power: None,
            max_power: None,
            avg_heart_rate: stats.avg_heart_rate,
            kind: IntervalKind::Steady,
            description: "steady effort".into(),
        };
        vec![with_stream_power(steady, 1.0)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecraft_model::{DisabledGenerator, ScriptedGenerator};

    /// 1 Hz streams at constant power.
    fn constant_streams(minutes: usize, watts: f64) -> ActivityStreams {
        let n = minutes * 60;
        ActivityStreams {
            time: (0..n).map(|i| i as f64).collect(),
            watts: vec![Some(watts); n],
            heartrate: vec![Some(140.0); n],
            cadence: vec![Some(90.0); n],
        }
    }

    fn stats(d: f64) -> RideStats {
        RideStats {
            duration_minutes: d,
            avg_power: Some(200.0),
            max_power: Some(600.0),
            avg_heart_rate: Some(140.0),
        }
    }

    #[test]
    fn np_of_constant_power_is_that_power() {
        let np = normalized_power(&constant_streams(10, 250.0)).unwrap();
        assert!((np - 250.0).abs() < 1e-6);
    }

    #[test]
    fn np_exceeds_average_for_variable_power() {
        let mut streams = constant_streams(20, 150.0);
        for w in streams.watts.iter_mut().skip(300).take(300) {
            *w = Some(400.0);
        }
        let np = normalized_power(&streams).unwrap();
        let avg = 150.0 * 0.75 + 400.0 * 0.25;
        assert!(np > avg);
    }

    #[test]
    fn np_needs_a_full_window() {
        let mut short = constant_streams(1, 200.0);
        short.time.truncate(10);
        short.watts.truncate(10);
        assert!(normalized_power(&short).is_none());
        assert!(normalized_power(&ActivityStreams::default()).is_none());
    }

    #[test]
    fn windows_cover_the_ride() {
        let windows = summarize_windows(&constant_streams(25, 210.0), 10.0, 25.0);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[2].start_minute, 20.0);
        assert_eq!(windows[2].duration_minutes, 5.0);
        assert_eq!(windows[0].avg_power, Some(210.0));
        assert_eq!(windows[1].max_heart_rate, Some(140.0));
    }

    #[test]
    fn heuristic_long_ride_has_two_bounded_intervals() {
        for d in [45.0, 50.0, 90.0, 240.0] {
            let intervals = heuristic_intervals(&ActivityStreams::default(), &stats(d));
            assert_eq!(intervals.len(), 2, "duration {d}");
            assert_eq!(intervals[0].description, "early move");
            assert_eq!(intervals[1].description, "finale");
            for i in &intervals {
                assert!(i.end_minute() <= d + 1e-9, "{i:?} overruns {d}");
            }
            assert!(intervals[0].start_minute < intervals[1].start_minute);
            // No stream: scaled from the ride average
            assert_eq!(intervals[1].avg_power, Some(230.0));
        }
    }

    #[test]
    fn heuristic_short_ride_has_one_interval() {
        let intervals = heuristic_intervals(&ActivityStreams::default(), &stats(30.0));
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].description, "steady effort");
        assert!(intervals[0].end_minute() <= 30.0);
    }

    #[tokio::test]
    async fn model_selection_is_clamped_and_sorted() {
        let streams = constant_streams(60, 220.0);
        let windows = summarize_windows(&streams, 10.0, 60.0);
        let generator = ScriptedGenerator::new().with_response(
            tasks::SELECT_INTERVALS,
            r#"{"intervals": [
                {"start_minute": 55, "duration_minutes": 20, "kind": "surge", "description": "final kick"},
                {"start_minute": 10, "duration_minutes": 8, "kind": "threshold"}
            ]}"#,
        );

        let (intervals, provenance) =
            select_intervals(&generator, &streams, &windows, &stats(60.0)).await;
        assert_eq!(provenance, Provenance::Model);
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].kind, IntervalKind::Sustained);
        assert_eq!(intervals[1].start_minute, 55.0);
        assert_eq!(intervals[1].duration_minutes, 5.0);
        assert_eq!(intervals[1].avg_power, Some(220.0));
    }

    #[tokio::test]
    async fn model_interval_at_ride_end_stays_inside() {
        let mut streams = constant_streams(51, 230.0);
        streams.time.truncate(3001);
        streams.watts.truncate(3001);
        streams.heartrate.truncate(3001);
        streams.cadence.truncate(3001);
        let ride = 3001.0 / 60.0;
        let windows = summarize_windows(&streams, 10.0, ride);
        let generator = ScriptedGenerator::new().with_response(
            tasks::SELECT_INTERVALS,
            r#"{"intervals": [
                {"start_minute": 20, "duration_minutes": 6, "kind": "sustained"},
                {"start_minute": 49.45, "duration_minutes": 10, "kind": "surge"}
            ]}"#,
        );

        let (intervals, provenance) =
            select_intervals(&generator, &streams, &windows, &stats(ride)).await;
        assert_eq!(provenance, Provenance::Model);
        assert_eq!(intervals.len(), 2);
        for i in &intervals {
            assert!(i.end_minute() <= ride + 1e-9, "{i:?} overruns {ride}");
        }
        assert!(intervals[1].duration_minutes > 0.0);
    }

    #[tokio::test]
    async fn bad_model_selection_falls_back() {
        let streams = constant_streams(60, 220.0);
        let windows = summarize_windows(&streams, 10.0, 60.0);
        let generator = ScriptedGenerator::new().with_response(
            tasks::SELECT_INTERVALS,
            r#"{"intervals": [{"start_minute": 5, "duration_minutes": 3}]}"#,
        );
        let (intervals, provenance) =
            select_intervals(&generator, &streams, &windows, &stats(60.0)).await;
        assert_eq!(provenance, Provenance::Fallback);
        assert_eq!(intervals.len(), 2);

        let (_, provenance) =
            select_intervals(&DisabledGenerator, &streams, &windows, &stats(60.0)).await;
        assert_eq!(provenance, Provenance::Fallback);
    }
}
