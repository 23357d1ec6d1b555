use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Duration,
};

use notify::RecommendedWatcher;
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read project registry {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse project registry: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Duplicate active project id: {0}")]
    DuplicateId(String),
    #[error("Failed to watch project registry: {0}")]
    Watch(#[from] notify::Error),
}

/// One registered source-repository target. Administered outside the
/// core; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub work_item_path: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_active() -> bool {
    true
}

fn default_priority() -> i64 {
    99
}

#[derive(Debug, Default, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    projects: Vec<Project>,
}

/// File-backed table of known projects. Readers always observe a
/// complete snapshot; `reload` swaps the whole list at once and keeps
/// the previous snapshot if the new document fails to load.
#[derive(Debug)]
pub struct ProjectRegistry {
    path: PathBuf,
    snapshot: RwLock<Arc<Vec<Project>>>,
}

impl ProjectRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let projects = read_document(&path)?;
        Ok(Self {
            path,
            snapshot: RwLock::new(Arc::new(projects)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Active projects ordered by priority, then name.
    pub fn snapshot(&self) -> Arc<Vec<Project>> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Case-insensitive exact lookup among active projects.
    pub fn find_by_id(&self, id: &str) -> Option<Project> {
        self.snapshot()
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(id))
            .cloned()
    }

    pub fn find_by_repo_url(&self, repo_url: &str) -> Option<Project> {
        let wanted = repo_url.trim_end_matches(".git").trim_end_matches('/');
        self.snapshot()
            .iter()
            .find(|p| {
                p.repo_url.trim_end_matches(".git").trim_end_matches('/') == wanted
            })
            .cloned()
    }

    pub fn reload(&self) -> Result<(), RegistryError> {
        let projects = read_document(&self.path)?;
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(projects);
        Ok(())
    }

    /// Watch the backing file and reload on change. The returned
    /// debouncer must be kept alive for the watch to stay active.
    pub fn watch(
        registry: Arc<Self>,
    ) -> Result<Debouncer<RecommendedWatcher, RecommendedCache>, RegistryError> {
        let path = registry.path().to_path_buf();
        let handler = Arc::clone(&registry);
        let mut debouncer = new_debouncer(
            Duration::from_millis(500),
            None,
            move |result: DebounceEventResult| match result {
                Ok(_) => {
                    if let Err(e) = handler.reload() {
                        tracing::warn!(error = %e, "registry reload failed, keeping previous snapshot");
                    } else {
                        tracing::info!(
                            projects = handler.snapshot().len(),
                            "project registry reloaded"
                        );
                    }
                }
                Err(errors) => {
                    for e in errors {
                        tracing::warn!(error = %e, "registry watch error");
                    }
                }
            },
        )?;
        debouncer.watch(&path, notify::RecursiveMode::NonRecursive)?;
        Ok(debouncer)
    }
}

fn read_document(path: &Path) -> Result<Vec<Project>, RegistryError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: RegistryDocument = serde_json::from_str(&raw)?;

    let mut projects: Vec<Project> = document
        .projects
        .into_iter()
        .filter(|p| p.active)
        .collect();

    for (i, project) in projects.iter().enumerate() {
        if projects[..i]
            .iter()
            .any(|other| other.id.eq_ignore_ascii_case(&project.id))
        {
            return Err(RegistryError::DuplicateId(project.id.clone()));
        }
    }

    projects.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    Ok(projects)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use tempfile::TempDir;

    use super::*;

    fn write_registry(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("projects.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    const TWO_PROJECTS: &str = r#"{
        "projects": [
            {"id": "zephyr", "name": "Zephyr", "repo_url": "https://example.com/zephyr.git", "priority": 2},
            {"id": "inhhale-v2", "name": "Inhhale", "repo_url": "https://example.com/inhhale.git", "priority": 1},
            {"id": "dormant", "name": "Dormant", "repo_url": "https://example.com/dormant.git", "active": false}
        ]
    }"#;

    #[test]
    fn snapshot_is_active_only_ordered_by_priority_then_name() {
        let dir = TempDir::new().unwrap();
        let registry = ProjectRegistry::load(write_registry(&dir, TWO_PROJECTS)).unwrap();

        let snapshot = registry.snapshot();
        let ids: Vec<_> = snapshot.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["inhhale-v2", "zephyr"]);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let registry = ProjectRegistry::load(write_registry(&dir, TWO_PROJECTS)).unwrap();

        assert!(registry.find_by_id("INHHALE-V2").is_some());
        assert!(registry.find_by_id("inhhale-V2").is_some());
        assert!(registry.find_by_id("dormant").is_none());
    }

    #[test]
    fn duplicate_active_ids_fail_the_load() {
        let dir = TempDir::new().unwrap();
        let path = write_registry(
            &dir,
            r#"{"projects": [
                {"id": "one", "name": "One", "repo_url": "u"},
                {"id": "ONE", "name": "One again", "repo_url": "u2"}
            ]}"#,
        );

        let err = ProjectRegistry::load(path).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(_)));
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = write_registry(&dir, TWO_PROJECTS);
        let registry = ProjectRegistry::load(&path).unwrap();

        std::fs::write(&path, "{not json").unwrap();
        assert!(registry.reload().is_err());
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn repo_url_lookup_ignores_git_suffix() {
        let dir = TempDir::new().unwrap();
        let registry = ProjectRegistry::load(write_registry(&dir, TWO_PROJECTS)).unwrap();

        let hit = registry.find_by_repo_url("https://example.com/zephyr");
        assert_eq!(hit.unwrap().id, "zephyr");
    }
}
