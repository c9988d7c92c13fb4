//! Narrative timeline: start beat, one beat per pairing, finish beat.

use stagecraft_shared::{
    BeatFocus, EventRecord, IncidentKind, MappedPairing, NarrativeTimeline, RoleAssignment,
    RoleTag, SourceActivity, TimelineBeat,
};

fn focus_for(kind: IncidentKind) -> BeatFocus {
    match kind {
        IncidentKind::Breakaway | IncidentKind::Other => BeatFocus::Positioning,
        IncidentKind::Attack | IncidentKind::Climb => BeatFocus::Pressure,
        IncidentKind::Crash => BeatFocus::Crisis,
        IncidentKind::Sprint | IncidentKind::Finish => BeatFocus::Climax,
    }
}

fn start_action(role: RoleTag) -> &'static str {
    match role {
        RoleTag::Breakaway => "Rolls out near the front, watching for the first move.",
        RoleTag::Domestique => "Lines up beside the team car, bottles and orders ready.",
        RoleTag::ChaseGroup => "Settles in the first third of the bunch, legs still cold.",
        RoleTag::Dropped => "Starts at the back, already feeling the day's distance.",
        RoleTag::Peloton => "Finds a wheel in the middle of the bunch.",
        RoleTag::TimeTrialAggressive | RoleTag::TimeTrialSteady => {
            "Clips in on the start ramp as the countdown begins."
        }
    }
}

fn finish_action(role: RoleTag, event: &EventRecord) -> String {
    match role {
        RoleTag::Breakaway => {
            "Crosses the line spent after a long day out front.".to_string()
        }
        RoleTag::Dropped => "Grinds home in the grupetto, inside the time cut.".to_string(),
        RoleTag::TimeTrialAggressive | RoleTag::TimeTrialSteady => {
            "Stops the clock and slumps over the bars.".to_string()
        }
        _ => match event.finish_city() {
            Some(city) => format!("Rolls across the line in {city} with the main group."),
            None => "Rolls across the line with the main group.".to_string(),
        },
    }
}

/// Build the ordered beats for the writer.
pub fn build_timeline(
    activity: &SourceActivity,
    event: &EventRecord,
    role: &RoleAssignment,
    pairings: &[MappedPairing],
) -> NarrativeTimeline {
    let mut beats = Vec::with_capacity(pairings.len() + 2);

    let start_incident = match event.start_city() {
        Some(city) => format!("The flag drops in {city} for {}", event.display_name()),
        None => format!("The flag drops for {}", event.display_name()),
    };
    beats.push(TimelineBeat {
        minute: 0.0,
        incident: start_incident,
        athlete_action: start_action(role.role).to_string(),
        focus: BeatFocus::Setup,
    });

    let mut ordered: Vec<&MappedPairing> = pairings.iter().collect();
    ordered.sort_by(|a, b| a.interval.start_minute.total_cmp(&b.interval.start_minute));
    beats.extend(ordered.into_iter().map(|p| TimelineBeat {
        minute: p.interval.start_minute,
        incident: p.incident.description.clone(),
        athlete_action: p.narrative.clone(),
        focus: focus_for(p.incident.kind),
    }));

    let finish_incident = if event.winner_known() {
        format!("{} wins {}", event.winner, event.display_name())
    } else {
        format!("{} reaches the finish", event.display_name())
    };
    beats.push(TimelineBeat {
        minute: activity.duration_minutes,
        incident: finish_incident,
        athlete_action: finish_action(role.role, event),
        focus: BeatFocus::Resolution,
    });

    NarrativeTimeline { beats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::fallback_pairings;
    use crate::tests_support::{activity, event};
    use stagecraft_shared::{Category, EffortLevel, Provenance};

    fn role(tag: RoleTag) -> RoleAssignment {
        RoleAssignment {
            role: tag,
            position: "grupetto".into(),
            tactical_description: String::new(),
            effort_level: EffortLevel::Easy,
            provenance: Provenance::Fallback,
        }
    }

    #[test]
    fn bookended_and_ordered() {
        let activity = activity(130.0);
        let event = event(Category::Mountain);
        let mut pairings = fallback_pairings(&activity.intervals, &event.incidents, event.distance_km);
        pairings.reverse();

        let timeline = build_timeline(&activity, &event, &role(RoleTag::Dropped), &pairings);

        assert_eq!(timeline.beats.len(), pairings.len() + 2);
        let opening = timeline.opening().unwrap();
        assert_eq!(opening.minute, 0.0);
        assert_eq!(opening.focus, BeatFocus::Setup);
        assert!(opening.incident.contains("Amiens"));

        let minutes: Vec<f64> = timeline.middle().iter().map(|b| b.minute).collect();
        assert!(minutes.windows(2).all(|w| w[0] <= w[1]));

        let closing = timeline.closing().unwrap();
        assert_eq!(closing.minute, 130.0);
        assert!(closing.incident.contains("Tadej Pogačar"));
        assert!(closing.athlete_action.contains("grupetto"));
    }

    #[test]
    fn unknown_winner_is_not_named() {
        let activity = activity(60.0);
        let mut event = event(Category::TimeTrial);
        event.winner = "TBD".into();
        let timeline = build_timeline(&activity, &event, &role(RoleTag::TimeTrialSteady), &[]);

        assert_eq!(timeline.beats.len(), 2);
        assert!(timeline.middle().is_empty());
        let closing = timeline.closing().unwrap();
        assert!(!closing.incident.contains("TBD"));
        assert!(closing.athlete_action.contains("clock"));
    }
}
