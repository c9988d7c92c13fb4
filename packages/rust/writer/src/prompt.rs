//! Prompt composition for the draft request.

use std::fmt::Write as _;

use stagecraft_shared::{AnalysisResult, StyleProfile, Tense, Voice};

pub(crate) fn system_prompt(profile: &StyleProfile) -> String {
    let voice = match profile.voice {
        Voice::FirstPerson => "first person, as the rider (\"I\")",
        Voice::ThirdPerson => "third person, about the rider by name",
    };
    let tense = match profile.tense {
        Tense::Past => "past tense",
        Tense::Present => "present tense",
    };
    format!(
        "You write cycling stories that place an amateur rider inside a real professional stage. \
         Write in the {voice}, in the {tense}. Tone: {tone}. Use plain paragraphs separated by \
         blank lines, no headings, no lists, no placeholders. Never invent a different stage winner.",
        tone = profile.tone,
    )
}

/// Everything the model needs: event facts, role, effort, timeline, rider context.
pub(crate) fn draft_prompt(
    analysis: &AnalysisResult,
    profile: &StyleProfile,
    rider: &str,
    rider_context: Option<&str>,
) -> String {
    let event = &analysis.event;
    let activity = &analysis.activity;
    let effort = &analysis.profile;
    let role = &analysis.role;

    let mut prompt = String::new();
    let _ = writeln!(prompt, "## Stage");
    let _ = writeln!(
        prompt,
        "{} ({}), {}, {:.1} km, {}.",
        event.display_name(),
        event.route,
        event.date,
        event.distance_km,
        event.category
    );
    let _ = writeln!(prompt, "Winner: {} ({}).", event.winner, event.winning_team);
    if let Some(weather) = &event.weather {
        let _ = writeln!(prompt, "Weather: {weather}.");
    }
    if !event.top_results.is_empty() {
        let podium: Vec<String> = event
            .top_results
            .iter()
            .take(3)
            .map(|r| format!("{}. {}", r.rank, r.rider))
            .collect();
        let _ = writeln!(prompt, "Podium: {}.", podium.join(", "));
    }

    let _ = writeln!(prompt, "\n## Rider");
    let _ = writeln!(
        prompt,
        "{rider}, riding as {} ({}): {}",
        role.role.as_str().replace('_', " "),
        role.position.replace('_', " "),
        role.tactical_description
    );
    let _ = writeln!(
        prompt,
        "Ride: {:.0} min, {:.1} km, intensity {:.2} ({}), effort {}.",
        activity.duration_minutes,
        activity.distance_km,
        effort.intensity_ratio,
        effort.zone.as_str(),
        effort.effort_level
    );
    if let Some(np) = effort.normalized_power {
        let _ = writeln!(prompt, "Normalized power: {np:.0} W.");
    }
    if let Some(hr) = activity.avg_heart_rate {
        let _ = writeln!(prompt, "Average heart rate: {hr:.0} bpm.");
    }
    if let Some(context) = rider_context.map(str::trim).filter(|c| !c.is_empty()) {
        let _ = writeln!(prompt, "Context: {context}");
    }

    let _ = writeln!(prompt, "\n## Timeline");
    for beat in &analysis.timeline.beats {
        let _ = writeln!(
            prompt,
            "- minute {:.0} [{}]: {} / {}",
            beat.minute,
            beat.focus.as_str(),
            beat.incident,
            beat.athlete_action
        );
    }

    let _ = writeln!(prompt, "\n## Style");
    let _ = writeln!(
        prompt,
        "Aim for {}-{} words. Phrases in the right register:",
        profile.target_words.0, profile.target_words.1
    );
    for phrase in profile.example_phrases {
        let _ = writeln!(prompt, "- \"{phrase}\"");
    }
    prompt
}
