//! Deterministic repairs used when a model rewrite is unavailable.

use stagecraft_shared::{EventRecord, IncidentKind, StyleProfile, Tense};

use crate::scoring::{MissingFacts, paragraphs};

fn lower_first(text: &str) -> String {
    let mut chars = text.trim().chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn route_clause(event: &EventRecord) -> String {
    match (event.start_city(), event.finish_city()) {
        (Some(start), Some(finish)) => format!(" from {start} to {finish}"),
        _ => {
            let route = event.route.to_lowercase();
            if route.starts_with("event ") || route.starts_with("stage ") {
                String::new()
            } else {
                format!(" on the {} route", event.route)
            }
        }
    }
}

/// Insert sentences for whatever facts are missing. Returns the repaired
/// text and the names of the facts that were inserted.
pub fn repair_facts(
    text: &str,
    missing: &MissingFacts,
    event: &EventRecord,
    profile: &StyleProfile,
) -> (String, Vec<&'static str>) {
    let present = profile.tense == Tense::Present;
    let mut paras: Vec<String> = paragraphs(text).into_iter().map(String::from).collect();
    let mut inserted = Vec::new();

    if missing.stage || missing.route {
        let verb = if present { "This is" } else { "This was" };
        let intro = format!("{verb} {}{}.", event.display_name(), route_clause(event));
        match paras.first_mut() {
            Some(first) => *first = format!("{intro} {first}"),
            None => paras.push(intro),
        }
        if missing.stage {
            inserted.push("stage");
        }
        if missing.route {
            inserted.push("route");
        }
    }

    if missing.incident {
        if let Some(incident) = event
            .incidents
            .iter()
            .find(|i| !matches!(i.kind, IncidentKind::Finish))
        {
            let sentence = format!(
                "Along the way the race turned on one moment: {}.",
                lower_first(incident.description.trim_end_matches('.'))
            );
            // Before the closing paragraph, which usually holds the finish
            match paras.len() {
                0 => paras.push(sentence),
                1 => paras[0] = format!("{} {sentence}", paras[0]),
                n => paras[n - 1] = format!("{sentence} {}", paras[n - 1]),
            }
            inserted.push("incident");
        }
    }

    if missing.winner && event.winner_known() {
        let verb = if present { "wins" } else { "won" };
        let sentence = format!("{} {verb} {}.", event.winner, event.display_name());
        match paras.last_mut() {
            Some(last) => *last = format!("{last} {sentence}"),
            None => paras.push(sentence),
        }
        inserted.push("winner");
    }

    (paras.join("\n\n"), inserted)
}

/// Spread a one- or two-paragraph text over three paragraphs at sentence
/// boundaries. Texts with fewer than three sentences are left alone.
pub fn repair_structure(text: &str) -> Option<String> {
    if paragraphs(text).len() >= 3 {
        return None;
    }

    let mut sentences = Vec::new();
    let mut current = String::new();
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    for word in flat.split(' ') {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
        if word.ends_with(['.', '!', '?']) {
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    if sentences.len() < 3 {
        return None;
    }

    let per = sentences.len().div_ceil(3);
    let rebuilt: Vec<String> = sentences.chunks(per).map(|chunk| chunk.join(" ")).collect();
    Some(rebuilt.join("\n\n"))
}
