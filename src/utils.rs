//! Input sanitation helpers

/// Escape LIKE wildcards so `search` only ever matches literally.
///
/// `_` and `%` are each prefixed with a backslash; templates are expected
/// to use backslash as their LIKE escape character.
pub fn escape_like(search: &str) -> String {
    search.replace('_', "\\_").replace('%', "\\%")
}

/// Substring pattern for a user search.
pub fn contains_pattern(search: &str) -> String {
    format!("%{}%", escape_like(search))
}
