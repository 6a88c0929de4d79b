//! [`TemplateManager`] implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::generation::{Template, TemplateManager};

/// Templates registered in process memory.
#[derive(Debug, Default)]
pub struct InMemoryTemplateManager {
    templates: RwLock<HashMap<String, Arc<Template>>>,
}

impl InMemoryTemplateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, template: Template) {
        self.templates
            .write()
            .await
            .insert(template.id.clone(), Arc::new(template));
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Template>> {
        self.templates.write().await.remove(id)
    }
}

#[async_trait]
impl TemplateManager for InMemoryTemplateManager {
    async fn get_template(&self, id: &str) -> Result<Option<Arc<Template>>, CoreError> {
        Ok(self.templates.read().await.get(id).cloned())
    }
}

/// Templates backed by the regular files of one directory.
///
/// The template id is the file stem, so `invoice.txt` is template `invoice`.
/// The directory is read on every lookup; files added or removed while the
/// server runs are picked up by the next execution run.
#[derive(Debug, Clone)]
pub struct DirTemplateManager {
    dir: PathBuf,
}

impl DirTemplateManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn find(&self, id: &str) -> Result<Option<PathBuf>, CoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CoreError::Internal(format!(
                    "cannot read template directory {}: {e}",
                    self.dir.display()
                )))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::Internal(format!("template directory scan failed: {e}")))?
        {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file && path.file_stem().and_then(|s| s.to_str()) == Some(id) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl TemplateManager for DirTemplateManager {
    async fn get_template(&self, id: &str) -> Result<Option<Arc<Template>>, CoreError> {
        let Some(path) = self.find(id).await? else {
            return Ok(None);
        };
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CoreError::Internal(format!("cannot read template {}: {e}", path.display()))
        })?;
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(id)
            .to_string();

        Ok(Some(Arc::new(Template {
            id: id.to_string(),
            name,
            content,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_lookup_and_removal() {
        let manager = InMemoryTemplateManager::new();
        manager
            .insert(Template {
                id: "a".into(),
                name: "A".into(),
                content: "x".into(),
            })
            .await;

        assert!(manager.get_template("a").await.unwrap().is_some());
        assert!(manager.get_template("b").await.unwrap().is_none());
        manager.remove("a").await;
        assert!(manager.get_template("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dir_manager_resolves_by_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("invoice.txt"), "Invoice for {{name}}").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let manager = DirTemplateManager::new(dir.path());
        let template = manager.get_template("invoice").await.unwrap().unwrap();
        assert_eq!(template.name, "invoice.txt");
        assert_eq!(template.content, "Invoice for {{name}}");

        assert!(manager.get_template("nested").await.unwrap().is_none());
        assert!(manager.get_template("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_dir_resolves_nothing() {
        let manager = DirTemplateManager::new("/definitely/not/here");
        assert!(manager.get_template("x").await.unwrap().is_none());
    }
}
