use std::path::{Component, Path};

use crate::TransferError;

/// Longest file name (in characters) produced by [`sanitize_file_name`].
const MAX_NAME_CHARS: usize = 120;

/// Validates that a relative file path does not escape its base directory.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_relative_path(file_path: &str) -> Result<(), TransferError> {
    if file_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let path = Path::new(file_path);

    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_path}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_path}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_path}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

/// Turns an arbitrary title into a filesystem-safe file name.
///
/// Strips path separators, reserved characters, control characters and
/// pictographic symbols, collapses whitespace and caps the length.
/// Falls back to `fallback` if nothing usable remains.
pub fn sanitize_file_name(title: &str, fallback: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !is_path_breaking(*c) && !is_pictographic(*c))
        .collect();

    let mut name = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    name = name.trim_matches(|c: char| c == '.' || c == ' ').to_string();
    if name.chars().count() > MAX_NAME_CHARS {
        name = name.chars().take(MAX_NAME_CHARS).collect::<String>().trim_end().to_string();
    }

    if name.is_empty() {
        fallback.to_string()
    } else {
        name
    }
}

fn is_path_breaking(c: char) -> bool {
    c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}

fn is_pictographic(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF   // emoji, symbols & pictographs, transport, flags
            | 0x2600..=0x27BF // misc symbols, dingbats
            | 0x2B00..=0x2BFF // arrows, stars
            | 0xFE00..=0xFE0F // variation selectors
            | 0x200D          // zero-width joiner
            | 0xE0000..=0xE007F
    )
}
