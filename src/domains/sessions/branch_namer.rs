//! Deterministic derivation of a feature branch name from an issue title.
//! Pure function, no I/O; collision handling against existing branches
//! lives in the orchestrator (`spec.md` §9 "branch collision on dead
//! branch").

const MAX_SLUG_LEN: usize = 50;
const BRANCH_PREFIX: &str = "feature/";

/// `BranchNamer::derive`. See `spec.md` §4.7 for the five-step algorithm.
pub struct BranchNamer;

impl BranchNamer {
    pub fn derive(issue_title: &str) -> String {
        let lowercased = issue_title.to_lowercase();

        let mut slug = String::with_capacity(lowercased.len());
        for c in lowercased.chars() {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                slug.push(c);
            } else if c == ' ' || c == '-' {
                slug.push('-');
            }
            // anything else is dropped
        }

        let collapsed = collapse_dashes(&slug);
        let trimmed = collapsed.trim_matches('-');
        let truncated = truncate_chars(trimmed, MAX_SLUG_LEN);

        format!("{BRANCH_PREFIX}{truncated}")
    }

    /// Appends a short disambiguating suffix when the derived branch name
    /// collides with a dead branch left over from a removed session
    /// (`spec.md` §9 supplemented surface). `suffix` is caller-supplied
    /// (e.g. a short random hex fragment) so this function stays pure.
    pub fn with_collision_suffix(branch: &str, suffix: &str) -> String {
        format!("{branch}-{suffix}")
    }
}

fn collapse_dashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_dash = false;
    for c in input.chars() {
        if c == '-' {
            if !last_was_dash {
                out.push('-');
            }
            last_was_dash = true;
        } else {
            out.push(c);
            last_was_dash = false;
        }
    }
    out
}

fn truncate_chars(input: &str, max: usize) -> &str {
    match input.char_indices().nth(max) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_spec_example() {
        assert_eq!(BranchNamer::derive("Fix BUG #123!"), "feature/fix-bug-123");
    }

    #[test]
    fn collapses_runs_and_trims_dashes() {
        assert_eq!(
            BranchNamer::derive("  --Multiple   Spaces--  "),
            "feature/multiple-spaces"
        );
    }

    #[test]
    fn drops_punctuation_and_unicode() {
        assert_eq!(
            BranchNamer::derive("Résumé: add caché layer!!"),
            "feature/rsum-add-cach-layer"
        );
    }

    #[test]
    fn truncates_to_fifty_characters() {
        let title = "a".repeat(100);
        let branch = BranchNamer::derive(&title);
        assert_eq!(branch, format!("feature/{}", "a".repeat(50)));
    }

    #[test]
    fn truncation_does_not_leave_trailing_dash_from_cut() {
        // 50 chars is itself a dash run boundary edge case: make sure we
        // don't panic slicing mid-character and that the result is valid.
        let title = format!("{}-end", "x".repeat(49));
        let branch = BranchNamer::derive(&title);
        assert!(branch.starts_with("feature/"));
        assert!(branch.len() <= BRANCH_PREFIX.len() + MAX_SLUG_LEN);
    }

    #[test]
    fn empty_title_yields_bare_prefix() {
        assert_eq!(BranchNamer::derive("!!!"), "feature/");
    }

    #[test]
    fn is_deterministic() {
        let title = "Add OAuth2 login flow";
        assert_eq!(BranchNamer::derive(title), BranchNamer::derive(title));
    }

    #[test]
    fn collision_suffix_appends_after_dash() {
        let branch = BranchNamer::derive("Retry flaky test");
        let disambiguated = BranchNamer::with_collision_suffix(&branch, "a1b2");
        assert_eq!(disambiguated, format!("{branch}-a1b2"));
    }
}
