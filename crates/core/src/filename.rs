//! Filename sanitization shared by upload and download paths.
//!
//! Both sides of the relay run user-supplied names through [`sanitize`], so a
//! download URL built from a sanitized name always compares equal to the name
//! stored at reservation time. The function is idempotent.

/// Maximum sanitized filename length in UTF-8 bytes.
const MAX_NAME_BYTES: usize = 200;

/// Characters replaced with `_` (problematic on common filesystems and in
/// Content-Disposition headers).
const REPLACED: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Sanitize a user-supplied filename.
///
/// Returns `None` when nothing usable remains (empty, `.`, `..`).
pub fn sanitize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();

    // Backslashes count as path separators; keep only the last segment.
    let unified = trimmed.replace('\\', "/");
    let last = unified.rsplit('/').next().unwrap_or("");

    let mut out = String::with_capacity(last.len());
    let mut in_space_run = false;
    for c in last.chars() {
        let c = match c {
            '\r' | '\n' | '\t' | '\0' => continue,
            c if REPLACED.contains(&c) => '_',
            c => c,
        };
        if c == ' ' {
            if in_space_run {
                continue;
            }
            in_space_run = true;
        } else {
            in_space_run = false;
        }
        out.push(c);
    }

    let mut name = out.trim().trim_end_matches(['.', ' ']).to_string();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }

    // Truncate to the byte limit, backing off to a UTF-8 boundary.
    if name.len() > MAX_NAME_BYTES {
        let mut cut = MAX_NAME_BYTES;
        while cut > 0 && !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
        // Truncation can expose a trailing dot or space again.
        name = name.trim_end_matches(['.', ' ']).to_string();
        if name.is_empty() || name == "." || name == ".." {
            return None;
        }
    }

    Some(name)
}

/// Extension of a sanitized filename, including the leading dot, or empty.
///
/// A leading dot ("dotfile") is not an extension.
pub fn extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[idx..],
        _ => "",
    }
}
