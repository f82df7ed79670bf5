//! Branch-slug derivation and collision resolution.

use std::time::{SystemTime, UNIX_EPOCH};

const MAX_LEN: usize = 50;
const DEFAULT_SLUG: &str = "task";
const MAX_NUMBERED_ATTEMPTS: u32 = 100;

/// Derives a branch slug from a free-form task name.
///
/// Lower-cases the input, collapses runs of non-ASCII-alphanumeric
/// characters into a single hyphen, trims leading/trailing hyphens,
/// truncates to [`MAX_LEN`] code units (re-trimming any trailing hyphen
/// left by the cut), and falls back to `"task"` if the result is empty.
/// Only ever emits `[a-z0-9-]`, so non-ASCII alphanumerics (e.g. full-width
/// digits) are dropped rather than passed through.
pub fn slug(task_name: &str) -> String {
    let mut out = String::with_capacity(task_name.len());
    let mut last_was_hyphen = false;
    for ch in task_name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen && !out.is_empty() {
            out.push('-');
            last_was_hyphen = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }

    if out.chars().count() > MAX_LEN {
        out = out.chars().take(MAX_LEN).collect();
        while out.ends_with('-') {
            out.pop();
        }
    }

    if out.is_empty() {
        DEFAULT_SLUG.to_string()
    } else {
        out
    }
}

/// Resolves a base slug against a snapshot of names already in use.
///
/// Tries `<base>`, then `<base>-2` .. `<base>-100`; if every numbered
/// candidate up to 100 is taken, suffixes the base with an integer
/// derived from the current wall clock so the function still terminates.
pub fn resolve_collision(base: &str, existing: impl Fn(&str) -> bool) -> String {
    if !existing(base) {
        return base.to_string();
    }
    for n in 2..=MAX_NUMBERED_ATTEMPTS {
        let candidate = format!("{base}-{n}");
        if !existing(&candidate) {
            return candidate;
        }
    }
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{base}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_collapses_runs() {
        assert_eq!(slug("Fix THE Bug!!  Now"), "fix-the-bug-now");
    }

    #[test]
    fn trims_leading_and_trailing_separators() {
        assert_eq!(slug("--hello--"), "hello");
        assert_eq!(slug("///leading"), "leading");
    }

    #[test]
    fn truncates_to_fifty_and_retrims() {
        let long = "a".repeat(49) + "-" + &"b".repeat(10);
        let s = slug(&long);
        assert!(s.len() <= MAX_LEN);
        assert!(!s.ends_with('-'));
    }

    #[test]
    fn empty_input_defaults_to_task() {
        assert_eq!(slug(""), "task");
        assert_eq!(slug("!!!"), "task");
    }

    #[test]
    fn only_lowercase_alphanumeric_and_hyphen() {
        let s = slug("Spec_42 / Done?");
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert!(!s.starts_with('-') && !s.ends_with('-'));
    }

    #[test]
    fn non_ascii_alphanumerics_are_dropped_not_passed_through() {
        let s = slug("Ω task Ⅷ 42");
        assert_eq!(s, "task-42");
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn slug_collision_resolution_yields_next_free_numbered_suffix() {
        let existing = ["x/task", "x/task-2", "x/task-3"];
        let resolved = resolve_collision("x/task", |c| existing.contains(&c));
        assert_eq!(resolved, "x/task-4");
    }

    #[test]
    fn no_collision_returns_base_unchanged() {
        let resolved = resolve_collision("fresh-base", |_| false);
        assert_eq!(resolved, "fresh-base");
    }

    #[test]
    fn exhausted_numbered_range_falls_back_to_wall_clock_suffix() {
        let resolved = resolve_collision("busy", |_| true);
        assert!(resolved.starts_with("busy-"));
        let suffix = resolved.strip_prefix("busy-").unwrap();
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }
}
