//! Race terminology pre-pass.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use stagecraft_shared::Category;

/// Generic group wording → race wording.
static GENERIC_TERMS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(?:main|big|large) group\b", "peloton"),
        (r"(?i)\bthe pack\b", "the peloton"),
        (r"(?i)\bbunch of riders\b", "peloton"),
        (r"(?i)\b(?:escape|leading) group\b", "breakaway"),
        (r"(?i)\bchasing group\b", "chase group"),
        (r"(?i)\bstraggl(?:ers|ing group)\b", "grupetto"),
    ]
    .into_iter()
    .map(|(pattern, term)| (Regex::new(pattern).expect("valid regex"), term))
    .collect()
});

static PELOTON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpeloton\b").expect("valid regex"));

fn match_case(original: &str, replacement: &str) -> String {
    if original.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = replacement.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    } else {
        replacement.to_string()
    }
}

/// Rewrite generic terms; there is no peloton in a time trial.
/// Returns the text and the number of replacements made.
pub fn normalize_terminology(text: &str, category: Category) -> (String, usize) {
    let mut out = text.to_string();
    let mut replacements = 0;

    for (re, term) in GENERIC_TERMS.iter() {
        let count = re.find_iter(&out).count();
        if count > 0 {
            replacements += count;
            out = re
                .replace_all(&out, |caps: &Captures<'_>| match_case(&caps[0], term))
                .into_owned();
        }
    }

    if category.is_time_trial() {
        let count = PELOTON_RE.find_iter(&out).count();
        if count > 0 {
            replacements += count;
            out = PELOTON_RE
                .replace_all(&out, |caps: &Captures<'_>| match_case(&caps[0], "field"))
                .into_owned();
        }
    }

    (out, replacements)
}
