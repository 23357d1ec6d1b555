use super::registry::Project;

/// Outcome of matching a user-supplied identifier against the active
/// project set. Anything short of an exact match is `Ambiguous`; a close
/// candidate is only ever a rendered suggestion, never auto-selected.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Project),
    Ambiguous {
        /// The full ordered active-project list, for the choice menu.
        candidates: Vec<Project>,
        /// The requester's task description, untouched.
        original_text: String,
        /// Closest identifier by edit distance, when close enough to help.
        suggestion: Option<String>,
    },
}

const SUGGESTION_MAX_DISTANCE: usize = 3;

pub fn resolve(raw_identifier: &str, description: &str, candidates: &[Project]) -> Resolution {
    let wanted = raw_identifier.trim();

    if let Some(project) = candidates
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(wanted))
    {
        return Resolution::Resolved(project.clone());
    }

    let suggestion = closest_identifier(wanted, candidates);
    Resolution::Ambiguous {
        candidates: candidates.to_vec(),
        original_text: description.to_string(),
        suggestion,
    }
}

fn closest_identifier(wanted: &str, candidates: &[Project]) -> Option<String> {
    let wanted_lower = wanted.to_lowercase();
    candidates
        .iter()
        .map(|p| (edit_distance(&wanted_lower, &p.id.to_lowercase()), &p.id))
        .filter(|(distance, _)| *distance <= SUGGESTION_MAX_DISTANCE)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, id)| id.clone())
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(id: &str, priority: i64) -> Project {
        Project {
            id: id.to_string(),
            name: id.to_string(),
            repo_url: format!("https://example.com/{id}.git"),
            default_branch: "main".to_string(),
            work_item_path: None,
            active: true,
            priority,
            stack: None,
            metadata: Default::default(),
        }
    }

    fn candidates() -> Vec<Project> {
        vec![project("inhhale-v2", 1), project("zephyr", 2)]
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        for raw in ["inhhale-v2", "INHHALE-V2", "inhhale-V2"] {
            match resolve(raw, "fix the bug", &candidates()) {
                Resolution::Resolved(p) => assert_eq!(p.id, "inhhale-v2"),
                other => panic!("{raw} should resolve, got {other:?}"),
            }
        }
    }

    #[test]
    fn zero_matches_returns_full_candidate_list_and_verbatim_text() {
        let result = resolve("wrongname", "fix the bug", &candidates());

        match result {
            Resolution::Ambiguous {
                candidates: list,
                original_text,
                ..
            } => {
                let ids: Vec<_> = list.iter().map(|p| p.id.as_str()).collect();
                assert_eq!(ids, vec!["inhhale-v2", "zephyr"]);
                assert_eq!(original_text, "fix the bug");
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn near_miss_is_suggested_but_never_auto_selected() {
        let result = resolve("inhale-v2", "fix the bug", &candidates());

        match result {
            Resolution::Ambiguous { suggestion, .. } => {
                assert_eq!(suggestion.as_deref(), Some("inhhale-v2"));
            }
            other => panic!("near miss must stay ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn distant_identifiers_get_no_suggestion() {
        let result = resolve("completely-unrelated", "fix the bug", &candidates());

        match result {
            Resolution::Ambiguous { suggestion, .. } => assert!(suggestion.is_none()),
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
    }
}
