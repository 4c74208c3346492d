//! In-memory index of files already registered with the analysis service.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::gemini::{AnalysisService, GeminiError};
use crate::models::RemoteFile;

/// Display name → remote file. Built once per run, never persisted.
#[derive(Debug, Default)]
pub struct RemoteRegistry {
    files: HashMap<String, RemoteFile>,
}

impl RemoteRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Page through the service's file listing.
    ///
    /// When several remote files share a display name the first listed wins.
    pub async fn load(service: &dyn AnalysisService) -> Result<Self, GeminiError> {
        let mut registry = Self::empty();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = service.list_files(page_token.as_deref()).await?;
            pages += 1;
            for file in page.files {
                if registry.files.contains_key(&file.display_name) {
                    warn!(
                        "Remote files share display name {}; ignoring {}",
                        file.display_name, file.name
                    );
                    continue;
                }
                registry.files.insert(file.display_name.clone(), file);
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            "Loaded {} remote files in {} pages",
            registry.files.len(),
            pages
        );
        Ok(registry)
    }

    pub fn get(&self, display_name: &str) -> Option<&RemoteFile> {
        self.files.get(display_name)
    }

    pub fn contains(&self, display_name: &str) -> bool {
        self.files.contains_key(display_name)
    }

    pub fn insert(&mut self, file: RemoteFile) {
        self.files.insert(file.display_name.clone(), file);
    }

    pub fn remove(&mut self, display_name: &str) -> Option<RemoteFile> {
        self.files.remove(display_name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// All registered files, sorted by display name.
    pub fn files(&self) -> Vec<&RemoteFile> {
        let mut files: Vec<&RemoteFile> = self.files.values().collect();
        files.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(name: &str, display_name: &str) -> RemoteFile {
        RemoteFile {
            name: name.to_string(),
            display_name: display_name.to_string(),
            uri: format!("https://files.example/{}", name),
            mime_type: None,
            state: None,
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let mut registry = RemoteRegistry::empty();
        assert!(registry.is_empty());

        registry.insert(remote("files/1", "a.pdf"));
        registry.insert(remote("files/2", "b.pdf"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("a.pdf").map(|f| f.name.as_str()), Some("files/1"));
        assert!(registry.contains("b.pdf"));

        let removed = registry.remove("a.pdf").unwrap();
        assert_eq!(removed.name, "files/1");
        assert!(!registry.contains("a.pdf"));
    }

    #[test]
    fn test_files_sorted() {
        let mut registry = RemoteRegistry::empty();
        registry.insert(remote("files/2", "zeta.pdf"));
        registry.insert(remote("files/1", "alpha.pdf"));
        let names: Vec<&str> = registry
            .files()
            .into_iter()
            .map(|f| f.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["alpha.pdf", "zeta.pdf"]);
    }
}
