//! Deterministic prose template, used when no model draft is available.

use stagecraft_shared::{AnalysisResult, BeatFocus, MappedPairing, Style};

fn focus_action(focus: BeatFocus, style: Style) -> &'static str {
    match (style, focus) {
        (Style::Literary, BeatFocus::Setup | BeatFocus::Positioning) => {
            "moved up and found shelter on a wheel"
        }
        (Style::Literary, BeatFocus::Pressure) => "pushed hard and held on",
        (Style::Literary, BeatFocus::Crisis) => "stayed calm while the road narrowed around me",
        (Style::Literary, BeatFocus::Climax | BeatFocus::Resolution) => {
            "emptied everything I had left"
        }
        (Style::Reportage, BeatFocus::Setup | BeatFocus::Positioning) => {
            "moved up to hold position"
        }
        (Style::Reportage, BeatFocus::Pressure) => "raised the pace to stay with the wheels",
        (Style::Reportage, BeatFocus::Crisis) => "stayed clear of the trouble",
        (Style::Reportage, BeatFocus::Climax | BeatFocus::Resolution) => {
            "committed to a maximal effort"
        }
        (Style::Dramatic, BeatFocus::Setup | BeatFocus::Positioning) => {
            "moves up and fights for position"
        }
        (Style::Dramatic, BeatFocus::Pressure) => "digs in, clinging to the wheels",
        (Style::Dramatic, BeatFocus::Crisis) => "swerves clear, heart pounding",
        (Style::Dramatic, BeatFocus::Climax | BeatFocus::Resolution) => "goes deep into the red",
    }
}

fn focus_of(pairing: &MappedPairing) -> BeatFocus {
    use stagecraft_shared::IncidentKind::*;
    match pairing.incident.kind {
        Breakaway | Other => BeatFocus::Positioning,
        Attack | Climb => BeatFocus::Pressure,
        Crash => BeatFocus::Crisis,
        Sprint | Finish => BeatFocus::Climax,
    }
}

fn lower_first(text: &str) -> String {
    let mut chars = text.trim().chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn sentence(text: &str) -> String {
    let trimmed = text.trim().trim_end_matches(['.', '!', '?']);
    format!("{trimmed}.")
}

/// Fill the fixed template for a style. Always names the winner and
/// references the opening and closing beats.
pub fn template_draft(analysis: &AnalysisResult, style: Style, rider: &str) -> String {
    let event = &analysis.event;
    let activity = &analysis.activity;
    let effort = &analysis.profile;
    let role = analysis.role.role.as_str().replace('_', " ");
    let winner = if event.winner_known() {
        event.winner.as_str()
    } else {
        "the stage winner"
    };
    let opening = analysis
        .timeline
        .opening()
        .map(|b| sentence(&b.incident))
        .unwrap_or_else(|| format!("{} begins.", event.display_name()));
    let closing = analysis
        .timeline
        .closing()
        .map(|b| sentence(&b.incident))
        .unwrap_or_else(|| format!("{} reaches the finish.", event.display_name()));
    let weather = event
        .weather
        .as_deref()
        .map(|w| format!(" under {}", lower_first(w)))
        .unwrap_or_default();
    let minutes = activity.duration_minutes.round();

    let mut pairings: Vec<&MappedPairing> = analysis.pairings.iter().collect();
    pairings.sort_by(|a, b| a.interval.start_minute.total_cmp(&b.interval.start_minute));

    let mut paragraphs = Vec::with_capacity(pairings.len() + 2);

    paragraphs.push(match style {
        Style::Literary => format!(
            "I remember how it began. {opening} I settled in as part of the {role}, with {:.0} km of {} road ahead{weather}. {}",
            event.distance_km,
            event.category,
            sentence(&analysis.role.tactical_description),
        ),
        Style::Reportage => format!(
            "{opening} {rider} lined up for {} on the {} route as part of the {role}, facing {:.1} km of {} racing{weather}.",
            event.display_name(),
            event.route,
            event.distance_km,
            event.category,
        ),
        Style::Dramatic => format!(
            "{opening} {rider} is here, part of the {role}, with {:.0} km of {} road ahead{weather}. Nobody knows yet how it ends.",
            event.distance_km, event.category,
        ),
    });

    for pairing in &pairings {
        let minute = pairing.interval.start_minute.round();
        let length = pairing.interval.duration_minutes.round().max(1.0);
        let action = focus_action(focus_of(pairing), style);
        let incident = sentence(&pairing.incident.description);
        let watts = pairing
            .interval
            .avg_power
            .map(|p| format!("{p:.0} watts"));
        paragraphs.push(match style {
            Style::Literary => match watts {
                Some(w) => format!(
                    "At minute {minute} the race turned. {incident} I {action}, close to {w} for {length} minutes."
                ),
                None => format!(
                    "At minute {minute} the race turned. {incident} I {action} for {length} minutes."
                ),
            },
            Style::Reportage => match watts {
                Some(w) => format!(
                    "At minute {minute}: {incident} {rider} {action}, averaging {w} over {length} minutes."
                ),
                None => format!("At minute {minute}: {incident} {rider} {action} for {length} minutes."),
            },
            Style::Dramatic => format!("Minute {minute}. {incident} {rider} {action}."),
        });
    }

    if pairings.is_empty() {
        paragraphs.push(match style {
            Style::Literary => format!(
                "The kilometres passed in a long {} rhythm, and I kept turning the pedals.",
                effort.zone.as_str()
            ),
            Style::Reportage => format!(
                "{rider} held a {} effort throughout, at an intensity of {:.2}.",
                effort.zone.as_str(),
                effort.intensity_ratio
            ),
            Style::Dramatic => format!(
                "The rhythm is {}. {rider} keeps turning the pedals.",
                effort.zone.as_str()
            ),
        });
    }

    paragraphs.push(match style {
        Style::Literary => format!(
            "Far up the road the story was already written. {closing} I finished {minutes} minutes after the start, and the day belonged to {winner}."
        ),
        Style::Reportage => {
            let power = effort
                .normalized_power
                .map(|np| format!(" with a normalized power of {np:.0} watts"))
                .unwrap_or_default();
            let victory = match (event.winner_known(), event.team_known()) {
                (true, true) => format!("{winner} took the stage for {}.", event.winning_team),
                (true, false) => format!("{winner} took the stage."),
                (false, _) => "The stage winner took the stage.".to_string(),
            };
            format!("{closing} {victory} {rider} completed {minutes} minutes{power}.")
        }
        Style::Dramatic => format!(
            "{closing} {rider} crosses the line {minutes} minutes after the start. The day belongs to {winner}."
        ),
    });

    paragraphs.join("\n\n")
}
