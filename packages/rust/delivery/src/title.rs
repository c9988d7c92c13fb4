//! Title template and metadata map.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use stagecraft_shared::{AnalysisResult, DeliveryConfig, EditingReport, Style};

/// Fill `{n}`, `{route}`, `{date}`, `{winner}`, `{role}` in a title template.
pub fn render_title(template: &str, analysis: &AnalysisResult) -> String {
    let event = &analysis.event;
    let title = template
        .replace("{n}", &event.event_number.to_string())
        .replace("{route}", &event.route)
        .replace("{date}", &event.date.format("%Y-%m-%d").to_string())
        .replace("{winner}", &event.winner)
        .replace("{role}", &analysis.role.role.as_str().replace('_', " "));
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        event.display_name()
    } else {
        title
    }
}

/// Event facts, role, and word count; performance and scoring on request.
pub fn build_metadata(
    text: &str,
    analysis: &AnalysisResult,
    report: &EditingReport,
    style: Style,
    config: &DeliveryConfig,
) -> BTreeMap<String, Value> {
    let event = &analysis.event;
    let mut metadata = BTreeMap::from([
        ("event_number".to_string(), json!(event.event_number)),
        ("event_name".to_string(), json!(event.display_name())),
        ("route".to_string(), json!(event.route)),
        ("date".to_string(), json!(event.date.format("%Y-%m-%d").to_string())),
        ("category".to_string(), json!(event.category.as_str())),
        ("distance_km".to_string(), json!(event.distance_km)),
        ("winner".to_string(), json!(event.winner)),
        ("winning_team".to_string(), json!(event.winning_team)),
        ("role".to_string(), json!(analysis.role.role.as_str())),
        ("position".to_string(), json!(analysis.role.position)),
        ("style".to_string(), json!(style.as_str())),
        ("word_count".to_string(), json!(text.split_whitespace().count())),
    ]);

    if config.include_performance {
        metadata.insert("performance".into(), json!(analysis.performance));
    }
    if config.include_scores {
        metadata.insert("scores".into(), json!(report.scores));
        metadata.insert("iterations".into(), json!(report.iteration_count));
        metadata.insert("threshold_met".into(), json!(report.threshold_met));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{analysis, report};

    #[test]
    fn default_template() {
        let title = render_title(&DeliveryConfig::default().title_template, &analysis());
        assert_eq!(title, "Stage 4: Amiens › Rouen");
    }

    #[test]
    fn all_tokens() {
        let title = render_title("{n} | {date} | {winner} | {role} | {unknown}", &analysis());
        assert_eq!(title, "4 | 2025-07-08 | Tadej Pogačar | chase group | {unknown}");
    }

    #[test]
    fn empty_template_falls_back_to_stage_name() {
        assert_eq!(render_title("   ", &analysis()), "Stage 4");
    }

    #[test]
    fn optional_sections() {
        let analysis = analysis();
        let report = report();
        let plain = build_metadata(
            "one two three",
            &analysis,
            &report,
            Style::Dramatic,
            &DeliveryConfig::default(),
        );
        assert_eq!(plain["word_count"], json!(3));
        assert_eq!(plain["role"], json!("chase_group"));
        assert!(!plain.contains_key("performance"));
        assert!(!plain.contains_key("scores"));

        let config = DeliveryConfig {
            include_performance: true,
            include_scores: true,
            ..DeliveryConfig::default()
        };
        let full = build_metadata("x", &analysis, &report, Style::Dramatic, &config);
        assert!(full.contains_key("performance"));
        assert_eq!(full["scores"]["readability"], json!(0.95));
        assert_eq!(full["threshold_met"], json!(true));
    }
}
