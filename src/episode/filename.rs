use std::path::{Path, PathBuf};

/// Maximum length of a single sanitized path component
const MAX_COMPONENT_LENGTH: usize = 120;

/// Used when nothing printable survives sanitization
const FALLBACK_COMPONENT: &str = "untitled";

/// Check if a character is allowed in filenames (whitelist approach)
fn is_valid_filename_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') || c.is_whitespace()
}

/// Directory holding all files of one podcast
pub fn podcast_dir(base_dir: &Path, podcast_name: &str) -> PathBuf {
    base_dir.join(sanitize_component(podcast_name))
}

/// Target path of an episode: `{base}/{podcast}/{title}.mp3`
pub fn episode_path(base_dir: &Path, podcast_name: &str, episode_title: &str) -> PathBuf {
    podcast_dir(base_dir, podcast_name).join(format!("{}.mp3", sanitize_component(episode_title)))
}

/// Turn arbitrary text into a deterministic, filesystem-safe name
///
/// Non-ASCII is transliterated first, then everything outside word
/// characters, dots, dashes and whitespace is dropped. Single spaces are
/// kept; whitespace runs and dash runs become a single dash.
pub fn sanitize_component(raw: &str) -> String {
    let ascii = deunicode::deunicode(raw);

    let filtered: String = ascii
        .trim()
        .chars()
        .filter(|c| is_valid_filename_char(*c))
        .collect();

    let collapsed = collapse_separators(&filtered);
    let trimmed = trim_separators(&collapsed);
    let truncated = trim_separators(truncate_at_boundary(trimmed, MAX_COMPONENT_LENGTH));

    let safe = sanitize_filename::sanitize(truncated);
    if safe.is_empty() {
        FALLBACK_COMPONENT.to_string()
    } else {
        safe
    }
}

fn is_separator(c: char) -> bool {
    c == '-' || c == '.' || c.is_whitespace()
}

fn trim_separators(s: &str) -> &str {
    s.trim_matches(is_separator)
}

/// Replace whitespace runs and dash runs of two or more with one dash
///
/// A lone whitespace character becomes a plain space.
fn collapse_separators(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_whitespace() || c == '-' {
            let is_space = c.is_whitespace();
            let mut run = 1;
            while chars
                .peek()
                .is_some_and(|next| next.is_whitespace() == is_space && (is_space || *next == '-'))
            {
                chars.next();
                run += 1;
            }
            if is_space && run == 1 {
                result.push(' ');
            } else {
                result.push('-');
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Truncate string at a word boundary
fn truncate_at_boundary(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }

    // ASCII only at this point, so byte offsets are char offsets
    let truncated = &s[..max_len];
    if let Some(pos) = truncated.rfind(['-', ' '])
        && pos > max_len / 2
    {
        return &truncated[..pos];
    }

    truncated
}
