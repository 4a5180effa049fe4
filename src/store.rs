//! Project persistence: a key-value store keyed by project id.
//!
//! [`ProjectStore`] is the only interface the pipeline sees. `save` is an
//! upsert with last-write-wins semantics; there is no versioning or
//! conflict detection.
//!
//! Two implementations ship with the crate:
//! - [`JsonFileStore`] — one pretty-printed JSON file per project in a
//!   directory, written atomically (temp file + rename).
//! - [`MemoryStore`] — a map behind an async lock, for tests and embedding.

use crate::error::SchematicError;
use crate::model::Project;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert or replace the project stored under `project.id`.
    async fn save(&self, project: &Project) -> Result<(), SchematicError>;

    async fn get(&self, id: &str) -> Result<Option<Project>, SchematicError>;

    /// All projects, most recently modified first.
    async fn list_all(&self) -> Result<Vec<Project>, SchematicError>;

    /// Remove a project. Deleting an unknown id is not an error.
    async fn delete(&self, id: &str) -> Result<(), SchematicError>;
}

fn sort_by_recency(projects: &mut [Project]) {
    projects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
}

// ── JSON files ───────────────────────────────────────────────────────────

/// Stores each project as `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Ids become file names, so anything that could escape the directory
    /// is refused.
    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        safe.then(|| self.dir.join(format!("{id}.json")))
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SchematicError + '_ {
        move |source| SchematicError::StoreIo {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl ProjectStore for JsonFileStore {
    async fn save(&self, project: &Project) -> Result<(), SchematicError> {
        let path = self.path_for(&project.id).ok_or_else(|| {
            SchematicError::Internal(format!("Unsafe project id '{}'", project.id))
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(Self::io_err(&self.dir))?;

        let json = serde_json::to_vec_pretty(project)?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(Self::io_err(&tmp_path))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(Self::io_err(&path))?;

        debug!("Saved project {} → {}", project.id, path.display());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Project>, SchematicError> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(&path)(e)),
        }
    }

    async fn list_all(&self) -> Result<Vec<Project>, SchematicError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(&self.dir)(e)),
        };

        let mut projects = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(Self::io_err(&self.dir))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await.map_err(Self::io_err(&path))?;
            match serde_json::from_slice::<Project>(&bytes) {
                Ok(project) => projects.push(project),
                Err(e) => warn!("Skipping unreadable project file {}: {}", path.display(), e),
            }
        }

        sort_by_recency(&mut projects);
        Ok(projects)
    }

    async fn delete(&self, id: &str) -> Result<(), SchematicError> {
        let Some(path) = self.path_for(id) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(&path)(e)),
        }
    }
}

// ── In memory ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<String, Project>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn save(&self, project: &Project) -> Result<(), SchematicError> {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Project>, SchematicError> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Project>, SchematicError> {
        let mut projects: Vec<Project> = self.projects.read().await.values().cloned().collect();
        sort_by_recency(&mut projects);
        Ok(projects)
    }

    async fn delete(&self, id: &str) -> Result<(), SchematicError> {
        self.projects.write().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn project(name: &str, age_secs: i64) -> Project {
        let mut p = Project::new(name, Vec::new());
        p.last_modified = Utc::now() - Duration::seconds(age_secs);
        p
    }

    async fn exercise(store: &dyn ProjectStore) {
        let old = project("old", 100);
        let new = project("new", 1);
        store.save(&old).await.unwrap();
        store.save(&new).await.unwrap();

        let listed = store.list_all().await.unwrap();
        let names: Vec<&str> = listed.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["new", "old"]);

        // Upsert: same id, new content.
        let mut renamed = old.clone();
        renamed.name = "renamed".into();
        store.save(&renamed).await.unwrap();
        assert_eq!(store.get(&old.id).await.unwrap().unwrap().name, "renamed");
        assert_eq!(store.list_all().await.unwrap().len(), 2);

        store.delete(&old.id).await.unwrap();
        assert!(store.get(&old.id).await.unwrap().is_none());
        store.delete(&old.id).await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        exercise(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn json_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("projects"));
        exercise(&store).await;
    }

    #[tokio::test]
    async fn json_file_store_empty_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("missing"));
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn json_file_store_refuses_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.get("../etc/passwd").await.unwrap().is_none());
        let mut p = project("bad", 0);
        p.id = "../escape".into();
        assert!(store.save(&p).await.is_err());
    }

    #[tokio::test]
    async fn json_file_store_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{not json")
            .await
            .unwrap();
        let store = JsonFileStore::new(dir.path());
        store.save(&project("ok", 0)).await.unwrap();
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }
}
