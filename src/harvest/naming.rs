//! Storage names for harvested files.
//!
//! Layout under the media root:
//!
//! ```text
//! {media_dir}/{board}/{board}_{size}_{name}{ext}
//! {media_dir}/{board}/t/thumb_{board}_{size}_{name}{ext}.jpg
//! ```
//!
//! `name` is the uploader's filename, sanitized and truncated so that the
//! thumbnail name (the longer of the two) fits the filesystem's path-component
//! limit. The board/size prefix and the extension are never truncated.

use std::path::{Path, PathBuf};

pub use crate::constants::DIGEST_TOKEN_LEN;
use crate::constants::{THUMBNAIL_DIR, THUMBNAIL_PREFIX, THUMBNAIL_SUFFIX};

/// Directory holding one board's files.
#[must_use]
pub fn board_dir(media_dir: &Path, board: &str) -> PathBuf {
    media_dir.join(board)
}

/// Build the stored filename for an attachment.
///
/// `token`, when given, is inserted as `_{token}` before the extension and
/// paid for out of the filename budget.
#[must_use]
pub fn storage_file_name(
    board: &str,
    size: u64,
    original: &str,
    ext: &str,
    max_component_bytes: usize,
    token: Option<&str>,
) -> String {
    let prefix = format!("{board}_{size}_");
    let suffix = token.map_or_else(String::new, |t| format!("_{t}"));
    let reserved = THUMBNAIL_PREFIX.len()
        + THUMBNAIL_SUFFIX.len()
        + prefix.len()
        + suffix.len()
        + ext.len();
    let budget = max_component_bytes.saturating_sub(reserved);

    let sanitized = sanitize_filename(original);
    let name = truncate_utf8(&sanitized, budget);
    format!("{prefix}{name}{suffix}{ext}")
}

/// Thumbnail path for a stored media file.
#[must_use]
pub fn thumbnail_path(media_path: &Path) -> PathBuf {
    let file_name = media_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = media_path.parent().unwrap_or_else(|| Path::new(""));
    dir.join(THUMBNAIL_DIR)
        .join(format!("{THUMBNAIL_PREFIX}{file_name}{THUMBNAIL_SUFFIX}"))
}

/// Sanitize an uploader-controlled filename to be filesystem-safe and URL-safe.
///
/// - Replaces spaces, path separators and problematic characters with `_`
/// - Replaces control characters (including NUL) with `_`
/// - Collapses runs of underscores and trims them from the edges
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '#' | '?' | '&' | '%' | '"' | '\'' | '<' | '>' | '|' | '*' | ':' | '\\' | '/' => '_',
            '(' | ')' | '[' | ']' | '-' | '_' | '.' => c,
            c if c.is_alphanumeric() => c,
            _ => '_',
        })
        .collect();

    replaced
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Truncate to at most `max_bytes` bytes without splitting a UTF-8 character.
#[must_use]
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
