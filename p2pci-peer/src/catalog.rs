//! Local resource catalog: find rfc<N>.txt files and derive a title for each.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Lines inspected when looking for a title.
const TITLE_SCAN_LINES: usize = 10;
/// A title candidate must be longer than this (after trimming).
const MIN_TITLE_LEN: usize = 5;
/// Titles are cut to this many characters.
const MAX_TITLE_LEN: usize = 100;

/// A resource file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResource {
    pub id: u32,
    pub title: String,
    pub path: PathBuf,
}

/// Resource id encoded in a file name, if it follows the rfc<N>.txt convention.
pub fn id_from_file_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("rfc")?.strip_suffix(".txt")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().filter(|id| *id > 0)
}

/// Scan `dir` (not recursively) for resource files, sorted by id.
pub fn scan(dir: &Path) -> std::io::Result<Vec<LocalResource>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with("rfc") || !name.ends_with(".txt") {
            continue;
        }
        let Some(id) = id_from_file_name(name) else {
            tracing::debug!(file = name, "skipping file with invalid resource id");
            continue;
        };
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let title = extract_title(&path, id);
        out.push(LocalResource { id, title, path });
    }
    out.sort_by_key(|r| r.id);
    Ok(out)
}

/// Title for a resource file: the first of its leading lines with enough text, else "RFC <id>".
pub fn extract_title(path: &Path, id: u32) -> String {
    match std::fs::File::open(path) {
        Ok(f) => title_from_reader(BufReader::new(f)).unwrap_or_else(|| fallback_title(id)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read title");
            fallback_title(id)
        }
    }
}

fn fallback_title(id: u32) -> String {
    format!("RFC {}", id)
}

fn title_from_reader<R: BufRead>(mut reader: R) -> Option<String> {
    let mut buf = Vec::new();
    for _ in 0..TITLE_SCAN_LINES {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.chars().count() > MIN_TITLE_LEN {
            return Some(line.chars().take(MAX_TITLE_LEN).collect());
        }
    }
    None
}
