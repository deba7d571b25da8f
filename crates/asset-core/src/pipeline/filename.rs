//! Filename sanitation.
//!
//! Uploaded filenames are attacker-controlled and end up on disk, so the
//! stem is transliterated to ASCII and reduced to `[A-Za-z0-9_-]` with a
//! hard length cap before it is used anywhere.

/// Maximum length of a sanitized filename stem.
const MAX_STEM_LEN: usize = 64;

/// Transliterate to ASCII and replace everything outside `[A-Za-z0-9_-]`
/// with `_`, capping the result at 64 characters.
pub fn sanitize(s: &str) -> String {
    let mut result = String::new();
    for c in deunicode::deunicode(s).chars() {
        if result.len() >= MAX_STEM_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            result.push(c);
        } else {
            result.push('_');
        }
    }
    result
}

/// Split a filename into its stem and extension at the last dot.
///
/// No dot means no extension; the whole input is the stem.
pub fn split(s: &str) -> (&str, Option<&str>) {
    match s.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (s, None),
    }
}
