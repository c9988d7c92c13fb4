//! Season compilation: one season's archived markup stories in one document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use tracing::{debug, info, instrument};

use stagecraft_shared::{Result, StagecraftError};

use crate::archive::{slugify, write_atomic};

/// Outcome of [`compile_season`].
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonCompilation {
    pub path: PathBuf,
    pub stories: usize,
}

/// Heading anchor as rendered by common Markdown viewers.
fn anchor(title: &str) -> String {
    title
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('-'),
            '-' | '_' => Some(c),
            c if c.is_alphanumeric() => Some(c),
            _ => None,
        })
        .collect()
}

/// Push every Markdown heading one level down.
fn demote_headings(text: &str) -> String {
    text.lines()
        .map(|line| {
            let hashes = line.chars().take_while(|&c| c == '#').count();
            if (1..6).contains(&hashes) && line[hashes..].starts_with(' ') {
                format!("#{line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split a story into its `# title` and the rest.
fn split_title<'a>(content: &'a str, fallback: &'a str) -> (&'a str, &'a str) {
    let content = content.trim_start();
    match content.strip_prefix("# ") {
        Some(rest) => match rest.split_once('\n') {
            Some((title, body)) => (title.trim(), body),
            None => (rest.trim(), ""),
        },
        None => (fallback, content),
    }
}

/// Event number and date from an `event_<NN>_<YYYY-MM-DD>_*.md` name.
fn parse_story_name(name: &str) -> Option<(u32, NaiveDate)> {
    let rest = name.strip_prefix("event_")?.strip_suffix(".md")?;
    let (number, rest) = rest.split_once('_')?;
    let date = NaiveDate::parse_from_str(rest.get(..10)?, "%Y-%m-%d").ok()?;
    Some((number.parse().ok()?, date))
}

/// Concatenate the archived markup stories dated in `season` under a table
/// of contents, ordered by date then event number, and write
/// `season_<label>.md` next to them.
#[instrument(skip_all, fields(dir = %dir.display(), label = label, season = season))]
pub fn compile_season(dir: &Path, label: &str, season: i32) -> Result<SeasonCompilation> {
    let entries = std::fs::read_dir(dir).map_err(|e| StagecraftError::io(dir, e))?;
    let mut stories: Vec<(NaiveDate, u32, PathBuf)> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            let (number, date) = parse_story_name(name)?;
            if date.year() != season {
                debug!(file = name, "outside season, skipped");
                return None;
            }
            Some((date, number, path))
        })
        .collect();
    stories.sort();
    let files: Vec<PathBuf> = stories.into_iter().map(|(_, _, path)| path).collect();

    if files.is_empty() {
        return Err(StagecraftError::not_found(format!(
            "no archived markup stories for {season} in {}",
            dir.display()
        )));
    }

    let mut toc = Vec::with_capacity(files.len());
    let mut sections = Vec::with_capacity(files.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for path in &files {
        let content = std::fs::read_to_string(path).map_err(|e| StagecraftError::io(path, e))?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("story");
        let (title, body) = split_title(&content, stem);

        let base = anchor(title);
        let n = seen.entry(base.clone()).or_insert(0);
        let anchor = if *n == 0 { base } else { format!("{base}-{n}") };
        *n += 1;

        toc.push(format!("- [{title}](#{anchor})"));
        sections.push(format!("## {title}\n{}", demote_headings(body).trim_end()));
    }

    let document = format!(
        "# {label}\n\n## Contents\n\n{}\n\n{}\n",
        toc.join("\n"),
        sections.join("\n\n")
    );

    let slug = slugify(label);
    let slug = if slug.is_empty() { "season".to_string() } else { slug };
    let path = dir.join(format!("season_{slug}.md"));
    write_atomic(&path, &document)?;

    info!(stories = files.len(), path = %path.display(), "season compiled");
    Ok(SeasonCompilation {
        path,
        stories: files.len(),
    })
}
