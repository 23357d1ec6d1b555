use regex::Regex;
use uuid::Uuid;

pub fn branch_slug(input: &str) -> String {
    // 1. lowercase
    let lower = input.to_lowercase();

    // 2. replace non-alphanumeric runs with a single hyphen
    let re = Regex::new(r"[^a-z0-9]+").unwrap();
    let slug = re.replace_all(&lower, "-");

    // 3. trim extra hyphens
    let trimmed = slug.trim_matches('-');

    // 4. take up to 32 chars, then trim trailing hyphens again
    let cut: String = trimmed.chars().take(32).collect();
    cut.trim_end_matches('-').to_string()
}

pub fn short_uuid(u: &Uuid) -> String {
    let full = u.simple().to_string();
    full.chars().take(4).collect()
}

/// Derive the working-branch name for a task from its description and id.
/// The short id suffix keeps branches for near-identical descriptions apart.
pub fn task_branch_name(task_id: &Uuid, description: &str) -> String {
    let slug = branch_slug(description);
    if slug.is_empty() {
        format!("task/{}", short_uuid(task_id))
    } else {
        format!("task/{}-{}", slug, short_uuid(task_id))
    }
}
