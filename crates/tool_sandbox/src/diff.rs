use similar::TextDiff;

const CONTEXT_LINES: usize = 3;

/// Unified diff between two file versions, computed from content rather than
/// echoed from the caller's patch text. Empty when nothing changed.
pub fn unified_diff(path: &str, before: &str, after: &str) -> String {
    if before == after {
        return String::new();
    }

    let old_header = if before.is_empty() {
        "/dev/null".to_string()
    } else {
        format!("a/{path}")
    };
    let new_header = if after.is_empty() {
        "/dev/null".to_string()
    } else {
        format!("b/{path}")
    };

    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(&old_header, &new_header)
        .to_string()
}
