//! Archive naming and locked, atomic writes.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tracing::debug;

use stagecraft_shared::{DeliveryFormat, Result, StagecraftError};

const MAX_SLUG_CHARS: usize = 48;

/// Lowercase ASCII words joined by `-`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    match slug.char_indices().nth(MAX_SLUG_CHARS) {
        Some((cut, _)) => slug[..cut].trim_end_matches('-').to_string(),
        None => slug.to_string(),
    }
}

fn title_digest(title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    format!("{:x}", hasher.finalize())[..8].to_string()
}

/// `event_<NN>_<YYYY-MM-DD>_<slug>-<hash8>.<ext>`.
///
/// This is the `event_<NN>_<YYYY-MM-DD>_<slug>.<ext>` shape with the first
/// eight hex digits of the title's SHA-256 appended to the slug, so two
/// titles that slugify alike get distinct files. Match archived stories with
/// `event_<NN>_<YYYY-MM-DD>_*.<ext>`.
pub fn archive_filename(
    event_number: u32,
    date: NaiveDate,
    title: &str,
    format: DeliveryFormat,
) -> String {
    let slug = slugify(title);
    let slug = if slug.is_empty() { "story".to_string() } else { slug };
    format!(
        "event_{event_number:02}_{}_{slug}-{}.{}",
        date.format("%Y-%m-%d"),
        title_digest(title),
        format.extension()
    )
}

/// Write `content` under `dir`, creating it if absent.
///
/// Writers for the same `(event_number, date)` are serialized by an advisory
/// lock; the file itself is replaced atomically via temp file and rename.
pub fn write_archive(
    dir: &Path,
    event_number: u32,
    date: NaiveDate,
    filename: &str,
    content: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| StagecraftError::io(dir, e))?;

    let lock_path = dir.join(format!(
        ".event_{event_number:02}_{}.lock",
        date.format("%Y-%m-%d")
    ));
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| StagecraftError::io(&lock_path, e))?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _guard = lock.write().map_err(|e| StagecraftError::io(&lock_path, e))?;

    let target = dir.join(filename);
    write_atomic(&target, content)?;
    debug!(path = %target.display(), size = content.len(), "archived artifact");
    Ok(target)
}

/// Temp file next to the target, then rename over it.
pub(crate) fn write_atomic(target: &Path, content: &str) -> Result<()> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(".{name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| StagecraftError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| StagecraftError::io(target, e))?;
    Ok(())
}
