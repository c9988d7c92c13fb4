//! Narrative role assignment.

use serde::Deserialize;
use tracing::{debug, warn};

use stagecraft_model::{GenerationFailure, GenerationRequest, TextGenerator, generate_json, tasks};
use stagecraft_shared::{
    Category, EffortLevel, EffortProfile, EventRecord, Provenance, RoleAssignment, RoleTag,
    SourceActivity,
};

/// Fallback table over the four inputs. Returns the role and position descriptor.
pub fn fallback_role(
    category: Category,
    effort: EffortLevel,
    high_effort_count: usize,
    duration_minutes: f64,
) -> (RoleTag, &'static str) {
    use EffortLevel::*;

    if category.is_time_trial() {
        return match effort {
            Hard | VeryHard => (RoleTag::TimeTrialAggressive, "solo"),
            _ => (RoleTag::TimeTrialSteady, "solo"),
        };
    }

    match effort {
        VeryHard if high_effort_count >= 3 => (RoleTag::Breakaway, "breakaway"),
        Hard | VeryHard if high_effort_count >= 2 => match category {
            Category::Mountain | Category::Hilly => (RoleTag::ChaseGroup, "front_group"),
            _ => (RoleTag::Breakaway, "breakaway"),
        },
        Hard | VeryHard => (RoleTag::Domestique, "front_of_peloton"),
        Moderate if duration_minutes >= 120.0 => (RoleTag::Domestique, "front_of_peloton"),
        Moderate => (RoleTag::Peloton, "main_field"),
        Easy if duration_minutes < 60.0 || category == Category::Mountain => {
            (RoleTag::Dropped, "grupetto")
        }
        Easy => (RoleTag::Peloton, "back_of_peloton"),
    }
}

/// One-line tactical summary for a role.
pub fn tactical_description(role: RoleTag, category: Category) -> String {
    let terrain = match category {
        Category::Mountain => "the mountains",
        Category::Hilly => "the rolling roads",
        Category::Flat => "the flat run to the line",
        Category::TimeTrial | Category::TeamTimeTrial => "the clock",
    };
    match role {
        RoleTag::Breakaway => format!("Goes clear early and fights to stay away over {terrain}."),
        RoleTag::Peloton => format!("Rides within the bunch, saving energy over {terrain}."),
        RoleTag::Domestique => {
            format!("Works at the front for the team leaders, controlling {terrain}.")
        }
        RoleTag::ChaseGroup => {
            format!("Bridges across to the leaders and chases hard through {terrain}.")
        }
        RoleTag::Dropped => format!("Distanced early, battling through {terrain} to make the time cut."),
        RoleTag::TimeTrialAggressive => "Goes out hard and empties everything against the clock.".into(),
        RoleTag::TimeTrialSteady => "Paces the effort evenly against the clock.".into(),
    }
}

#[derive(Debug, Deserialize)]
struct ModelRole {
    role: String,
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    tactical_description: Option<String>,
}

const ROLE_SYSTEM: &str = "You cast an amateur rider into a professional road race stage. \
Answer with a single JSON object and nothing else.";

fn role_prompt(event: &EventRecord, profile: &EffortProfile, activity: &SourceActivity) -> String {
    let roles: Vec<&str> = RoleTag::ALL.iter().map(RoleTag::as_str).collect();
    format!(
        "{name}, {route}, {category}, {distance:.1} km, won by {winner}.\n\
         The rider rode {duration:.0} minutes at intensity {ratio:.2} ({zone}), \
         effort level {effort}, with {high} high-effort intervals.\n\
         Return JSON {{\"role\": one of [{roles}], \"position\": short snake_case \
         descriptor of where they sit in the race, \"tactical_description\": one sentence}}.",
        name = event.display_name(),
        route = event.route,
        category = event.category,
        distance = event.distance_km,
        winner = event.winner,
        duration = activity.duration_minutes,
        ratio = profile.intensity_ratio,
        zone = profile.zone.as_str(),
        effort = profile.effort_level,
        high = profile.high_effort_count,
        roles = roles.join(", "),
    )
}

/// Reject roles that contradict the stage format.
fn validate_model_role(parsed: ModelRole, category: Category) -> Option<(RoleTag, String, String)> {
    let role: RoleTag = parsed.role.parse().ok()?;
    if role.is_time_trial() != category.is_time_trial() {
        return None;
    }
    let position = parsed
        .position
        .map(|p| p.trim().to_ascii_lowercase().replace([' ', '-'], "_"))
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| fallback_position(role).to_string());
    let tactical = parsed
        .tactical_description
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| tactical_description(role, category));
    Some((role, position, tactical))
}

fn fallback_position(role: RoleTag) -> &'static str {
    match role {
        RoleTag::Breakaway => "breakaway",
        RoleTag::Peloton => "main_field",
        RoleTag::Domestique => "front_of_peloton",
        RoleTag::ChaseGroup => "front_group",
        RoleTag::Dropped => "grupetto",
        RoleTag::TimeTrialAggressive | RoleTag::TimeTrialSteady => "solo",
    }
}

/// Exactly one role per analysis, model first.
pub async fn assign_role(
    generator: &dyn TextGenerator,
    event: &EventRecord,
    profile: &EffortProfile,
    activity: &SourceActivity,
) -> RoleAssignment {
    let request = GenerationRequest::new(
        tasks::ASSIGN_ROLE,
        ROLE_SYSTEM,
        role_prompt(event, profile, activity),
    );

    match generate_json::<ModelRole>(generator, request).await {
        Ok(parsed) => {
            let proposed = parsed.role.clone();
            if let Some((role, position, tactical_description)) =
                validate_model_role(parsed, event.category)
            {
                debug!(%role, %position, "model role accepted");
                return RoleAssignment {
                    role,
                    position,
                    tactical_description,
                    effort_level: profile.effort_level,
                    provenance: Provenance::Model,
                };
            }
            warn!(role = %proposed, category = %event.category, "model role rejected");
        }
        Err(GenerationFailure::Disabled) => {}
        Err(e) => warn!(error = %e, "role assignment failed, using decision table"),
    }

    let (role, position) = fallback_role(
        event.category,
        profile.effort_level,
        profile.high_effort_count,
        activity.duration_minutes,
    );
    RoleAssignment {
        role,
        position: position.to_string(),
        tactical_description: tactical_description(role, event.category),
        effort_level: profile.effort_level,
        provenance: Provenance::Fallback,
    }
}
