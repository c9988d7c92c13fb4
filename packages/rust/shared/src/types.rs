//! Core domain types: activities, stage records, and analysis output.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StagecraftError;

/// Average speed used to convert elapsed race minutes into distance.
pub const REFERENCE_RACE_SPEED_KMH: f64 = 42.0;

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Which path produced a piece of derived data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Produced by a model-assisted call.
    Model,
    /// Produced by the deterministic fallback.
    Fallback,
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// Classification tag for an effort interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalKind {
    Surge,
    Sustained,
    Steady,
    Recovery,
}

impl IntervalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Surge => "surge",
            Self::Sustained => "sustained",
            Self::Steady => "steady",
            Self::Recovery => "recovery",
        }
    }
}

impl fmt::Display for IntervalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntervalKind {
    type Err = StagecraftError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "surge" | "attack" | "sprint" => Ok(Self::Surge),
            "sustained" | "threshold" | "climb" => Ok(Self::Sustained),
            "steady" | "tempo" | "endurance" => Ok(Self::Steady),
            "recovery" | "easy" => Ok(Self::Recovery),
            other => Err(StagecraftError::validation(format!(
                "unknown interval kind '{other}'"
            ))),
        }
    }
}

/// A time-bounded segment of a ride with distinctive power/heart-rate behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffortInterval {
    /// Offset from the start of the ride, in minutes.
    pub start_minute: f64,
    pub duration_minutes: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_power: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_power: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_heart_rate: Option<f64>,
    pub kind: IntervalKind,
    pub description: String,
}

impl EffortInterval {
    pub fn end_minute(&self) -> f64 {
        self.start_minute + self.duration_minutes
    }
}

/// One workout, as retrieved from the activity source. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceActivity {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: f64,
    pub distance_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_power: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_power: Option<f64>,
    /// 30-second rolling normalized power, when a power stream was available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_power: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_heart_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_heart_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_cadence: Option<f64>,
    /// Ordered by `start_minute`; each ends within `duration_minutes`.
    pub intervals: Vec<EffortInterval>,
    /// Which path selected the intervals.
    pub intervals_provenance: Provenance,
}

// ---------------------------------------------------------------------------
// Stage record
// ---------------------------------------------------------------------------

/// Stage profile category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Flat,
    Hilly,
    Mountain,
    TimeTrial,
    TeamTimeTrial,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Hilly => "hilly",
            Self::Mountain => "mountain",
            Self::TimeTrial => "time_trial",
            Self::TeamTimeTrial => "team_time_trial",
        }
    }

    /// Individual and team time trials: no peloton dynamics.
    pub fn is_time_trial(&self) -> bool {
        matches!(self, Self::TimeTrial | Self::TeamTimeTrial)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = StagecraftError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "flat" | "sprint" | "sprinter" => Ok(Self::Flat),
            "hilly" | "medium_mountain" | "rolling" | "hills" => Ok(Self::Hilly),
            "mountain" | "mountains" | "high_mountain" | "summit_finish" => Ok(Self::Mountain),
            "time_trial" | "itt" | "individual_time_trial" => Ok(Self::TimeTrial),
            "team_time_trial" | "ttt" => Ok(Self::TeamTimeTrial),
            other => Err(StagecraftError::validation(format!(
                "unknown stage category '{other}'"
            ))),
        }
    }
}

/// What happened at a notable moment of the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    Breakaway,
    Attack,
    Crash,
    Sprint,
    Climb,
    Finish,
    Other,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breakaway => "breakaway",
            Self::Attack => "attack",
            Self::Crash => "crash",
            Self::Sprint => "sprint",
            Self::Climb => "climb",
            Self::Finish => "finish",
            Self::Other => "other",
        }
    }

    /// Classify free text by keyword, first match wins.
    pub fn from_keywords(text: &str) -> Self {
        let lower = text.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if has(&["breakaway", "escape", "break of the day", "went clear"]) {
            Self::Breakaway
        } else if has(&["crash", "fell", "pile-up", "came down"]) {
            Self::Crash
        } else if has(&["attack", "accelerat", "counter"]) {
            Self::Attack
        } else if has(&["sprint", "bunch kick"]) {
            Self::Sprint
        } else if has(&["climb", "col ", "summit", "ascent", "mountain"]) {
            Self::Climb
        } else if has(&["finish", "line", "won the stage", "wins"]) {
            Self::Finish
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentKind {
    type Err = StagecraftError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "breakaway" | "break" => Ok(Self::Breakaway),
            "attack" => Ok(Self::Attack),
            "crash" => Ok(Self::Crash),
            "sprint" | "intermediate_sprint" => Ok(Self::Sprint),
            "climb" => Ok(Self::Climb),
            "finish" => Ok(Self::Finish),
            "other" => Ok(Self::Other),
            other => Err(StagecraftError::validation(format!(
                "unknown incident kind '{other}'"
            ))),
        }
    }
}

/// Where in the stage an incident happened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RacePosition {
    /// Kilometres raced since the start.
    Km(f64),
    /// Minutes elapsed since the start.
    Minute(f64),
}

impl RacePosition {
    /// Position as a fraction of the stage in `[0, 1]`.
    pub fn fraction(&self, distance_km: f64) -> f64 {
        if distance_km <= 0.0 {
            return 0.0;
        }
        let km = match *self {
            Self::Km(km) => km,
            Self::Minute(m) => m / 60.0 * REFERENCE_RACE_SPEED_KMH,
        };
        (km / distance_km).clamp(0.0, 1.0)
    }
}

/// A notable, positioned occurrence within the stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventIncident {
    pub position: RacePosition,
    pub kind: IncidentKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub riders: Vec<String>,
}

/// One line of the stage result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub rank: u32,
    pub rider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap: Option<String>,
}

/// Structured facts about one stage of the race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_number: u32,
    /// Route as reported, e.g. `Lille > Boulogne-sur-Mer`.
    pub route: String,
    pub date: NaiveDate,
    pub distance_km: f64,
    pub category: Category,
    pub winner: String,
    pub winning_team: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
    /// Ordered by position in the stage.
    pub incidents: Vec<EventIncident>,
    #[serde(default)]
    pub top_results: Vec<ResultEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// Separators seen between start and finish towns in route strings.
const ROUTE_SEPARATORS: [&str; 6] = [" > ", " › ", " → ", " - ", " – ", " to "];

impl EventRecord {
    /// `Stage 7`.
    pub fn display_name(&self) -> String {
        format!("Stage {}", self.event_number)
    }

    fn route_parts(&self) -> Vec<&str> {
        for sep in ROUTE_SEPARATORS {
            if self.route.contains(sep) {
                return self.route.split(sep).map(str::trim).collect();
            }
        }
        vec![self.route.trim()]
    }

    /// First town of the route, when the route names towns.
    pub fn start_city(&self) -> Option<&str> {
        let parts = self.route_parts();
        (parts.len() > 1).then(|| parts[0]).filter(|s| !s.is_empty())
    }

    /// Last town of the route, when the route names towns.
    pub fn finish_city(&self) -> Option<&str> {
        let parts = self.route_parts();
        (parts.len() > 1)
            .then(|| parts[parts.len() - 1])
            .filter(|s| !s.is_empty())
    }

    /// Whether the winner is actually known (not the `TBD` placeholder).
    pub fn winner_known(&self) -> bool {
        !self.winner.trim().is_empty() && !self.winner.eq_ignore_ascii_case("tbd")
    }

    /// Whether the winning team is actually known.
    pub fn team_known(&self) -> bool {
        let team = self.winning_team.trim();
        !team.is_empty() && !team.eq_ignore_ascii_case("tbd")
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Power-to-threshold bands, ordered from easiest to hardest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityZone {
    Recovery,
    Endurance,
    Tempo,
    Threshold,
    Neuromuscular,
}

impl IntensityZone {
    /// Band for an intensity ratio (normalized power / threshold power).
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio < 0.55 {
            Self::Recovery
        } else if ratio < 0.75 {
            Self::Endurance
        } else if ratio < 0.90 {
            Self::Tempo
        } else if ratio < 1.05 {
            Self::Threshold
        } else {
            Self::Neuromuscular
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recovery => "recovery",
            Self::Endurance => "endurance",
            Self::Tempo => "tempo",
            Self::Threshold => "threshold",
            Self::Neuromuscular => "neuromuscular",
        }
    }
}

/// Coarse effort tag used by role assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffortLevel {
    Easy,
    Moderate,
    Hard,
    VeryHard,
}

impl EffortLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Moderate => "moderate",
            Self::Hard => "hard",
            Self::VeryHard => "very_hard",
        }
    }
}

impl From<IntensityZone> for EffortLevel {
    fn from(zone: IntensityZone) -> Self {
        match zone {
            IntensityZone::Recovery | IntensityZone::Endurance => Self::Easy,
            IntensityZone::Tempo => Self::Moderate,
            IntensityZone::Threshold => Self::Hard,
            IntensityZone::Neuromuscular => Self::VeryHard,
        }
    }
}

impl fmt::Display for EffortLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effort numbers derived from the activity and the athlete's threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffortProfile {
    pub normalized_power: Option<f64>,
    pub threshold_power: f64,
    pub intensity_ratio: f64,
    pub load_score: f64,
    pub zone: IntensityZone,
    pub effort_level: EffortLevel,
    pub high_effort_count: usize,
}

/// The narrative identity given to the athlete for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleTag {
    Breakaway,
    Peloton,
    Domestique,
    ChaseGroup,
    Dropped,
    TimeTrialAggressive,
    TimeTrialSteady,
}

impl RoleTag {
    pub const ALL: [RoleTag; 7] = [
        Self::Breakaway,
        Self::Peloton,
        Self::Domestique,
        Self::ChaseGroup,
        Self::Dropped,
        Self::TimeTrialAggressive,
        Self::TimeTrialSteady,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breakaway => "breakaway",
            Self::Peloton => "peloton",
            Self::Domestique => "domestique",
            Self::ChaseGroup => "chase_group",
            Self::Dropped => "dropped",
            Self::TimeTrialAggressive => "time_trial_aggressive",
            Self::TimeTrialSteady => "time_trial_steady",
        }
    }

    pub fn is_time_trial(&self) -> bool {
        matches!(self, Self::TimeTrialAggressive | Self::TimeTrialSteady)
    }
}

impl fmt::Display for RoleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleTag {
    type Err = StagecraftError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| StagecraftError::validation(format!("unknown role '{s}'")))
    }
}

/// Exactly one per analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: RoleTag,
    /// Where in the race the athlete sits, e.g. `grupetto`, `front_group`.
    pub position: String,
    pub tactical_description: String,
    pub effort_level: EffortLevel,
    pub provenance: Provenance,
}

/// A confidence-scored association between one interval and one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedPairing {
    /// Index into `SourceActivity::intervals`.
    pub interval_index: usize,
    /// Index into `EventRecord::incidents`.
    pub incident_index: usize,
    pub interval: EffortInterval,
    pub incident: EventIncident,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub narrative: String,
    pub provenance: Provenance,
}

/// What a timeline beat is doing for the story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatFocus {
    Setup,
    Positioning,
    Pressure,
    Crisis,
    Climax,
    Resolution,
}

impl BeatFocus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Positioning => "positioning",
            Self::Pressure => "pressure",
            Self::Crisis => "crisis",
            Self::Climax => "climax",
            Self::Resolution => "resolution",
        }
    }
}

/// One story beat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineBeat {
    pub minute: f64,
    pub incident: String,
    pub athlete_action: String,
    pub focus: BeatFocus,
}

/// Start beat, one beat per pairing, finish beat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeTimeline {
    pub beats: Vec<TimelineBeat>,
}

impl NarrativeTimeline {
    pub fn opening(&self) -> Option<&TimelineBeat> {
        self.beats.first()
    }

    pub fn closing(&self) -> Option<&TimelineBeat> {
        self.beats.last()
    }

    /// Beats between the synthetic start and finish beats.
    pub fn middle(&self) -> &[TimelineBeat] {
        if self.beats.len() <= 2 {
            &[]
        } else {
            &self.beats[1..self.beats.len() - 1]
        }
    }
}

/// Everything the writer and editor need. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub activity: SourceActivity,
    pub event: EventRecord,
    pub profile: EffortProfile,
    pub role: RoleAssignment,
    pub pairings: Vec<MappedPairing>,
    pub performance: BTreeMap<String, serde_json::Value>,
    pub timeline: NarrativeTimeline,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(route: &str) -> EventRecord {
        EventRecord {
            event_number: 4,
            route: route.into(),
            date: NaiveDate::from_ymd_opt(2025, 7, 8).unwrap(),
            distance_km: 174.2,
            category: Category::Hilly,
            winner: "Tadej Pogačar".into(),
            winning_team: "UAE Team Emirates".into(),
            weather: None,
            incidents: vec![],
            top_results: vec![],
            source_url: None,
        }
    }

    #[test]
    fn category_parses_aliases() {
        assert_eq!("ITT".parse::<Category>().unwrap(), Category::TimeTrial);
        assert_eq!("time-trial".parse::<Category>().unwrap(), Category::TimeTrial);
        assert_eq!("Medium Mountain".parse::<Category>().unwrap(), Category::Hilly);
        assert!("cobbles".parse::<Category>().is_err());
        assert!(Category::TeamTimeTrial.is_time_trial());
        assert!(!Category::Mountain.is_time_trial());
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&Category::TimeTrial).unwrap();
        assert_eq!(json, r#""time_trial""#);
    }

    #[test]
    fn route_cities() {
        let r = record("Amiens Métropole > Rouen");
        assert_eq!(r.start_city(), Some("Amiens Métropole"));
        assert_eq!(r.finish_city(), Some("Rouen"));

        let r = record("Stage 4");
        assert_eq!(r.start_city(), None);
        assert_eq!(r.finish_city(), None);
    }

    #[test]
    fn winner_placeholder_is_unknown() {
        let mut r = record("A > B");
        assert!(r.winner_known());
        r.winner = "TBD".into();
        assert!(!r.winner_known());
    }

    #[test]
    fn zone_thresholds() {
        assert_eq!(IntensityZone::from_ratio(0.54), IntensityZone::Recovery);
        assert_eq!(IntensityZone::from_ratio(0.55), IntensityZone::Endurance);
        assert_eq!(IntensityZone::from_ratio(0.80), IntensityZone::Tempo);
        assert_eq!(IntensityZone::from_ratio(1.00), IntensityZone::Threshold);
        assert_eq!(IntensityZone::from_ratio(1.05), IntensityZone::Neuromuscular);
        assert_eq!(EffortLevel::from(IntensityZone::Endurance), EffortLevel::Easy);
        assert_eq!(EffortLevel::from(IntensityZone::Threshold), EffortLevel::Hard);
    }

    #[test]
    fn position_fraction_mixes_units() {
        let km = RacePosition::Km(84.0);
        assert!((km.fraction(168.0) - 0.5).abs() < 1e-9);
        // 120 minutes at the reference speed is 84 km.
        let minute = RacePosition::Minute(120.0);
        assert!((minute.fraction(168.0) - 0.5).abs() < 1e-9);
        assert_eq!(RacePosition::Km(500.0).fraction(168.0), 1.0);
    }

    #[test]
    fn incident_keywords() {
        assert_eq!(
            IncidentKind::from_keywords("A five-man breakaway went clear"),
            IncidentKind::Breakaway
        );
        assert_eq!(
            IncidentKind::from_keywords("Big crash in the bunch"),
            IncidentKind::Crash
        );
        assert_eq!(IncidentKind::from_keywords("quiet roads"), IncidentKind::Other);
    }

    #[test]
    fn role_roundtrip() {
        for role in RoleTag::ALL {
            assert_eq!(role.as_str().parse::<RoleTag>().unwrap(), role);
        }
        assert_eq!("chase group".parse::<RoleTag>().unwrap(), RoleTag::ChaseGroup);
        assert!("leader".parse::<RoleTag>().is_err());
    }

    #[test]
    fn timeline_middle() {
        let beat = |m: f64| TimelineBeat {
            minute: m,
            incident: String::new(),
            athlete_action: String::new(),
            focus: BeatFocus::Pressure,
        };
        let t = NarrativeTimeline {
            beats: vec![beat(0.0), beat(10.0), beat(20.0), beat(90.0)],
        };
        assert_eq!(t.middle().len(), 2);
        assert_eq!(t.opening().unwrap().minute, 0.0);
        assert_eq!(t.closing().unwrap().minute, 90.0);
        assert!(NarrativeTimeline::default().middle().is_empty());
    }
}
