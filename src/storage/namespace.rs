//! Per-collection views over a shared storage root.

use std::sync::Arc;

use crate::error::Result;
use crate::storage::{Storage, StorageInput, StorageOutput};

/// A view of `root` restricted to the files under `namespace/`.
///
/// Names passed in are relative to the namespace; the root sees
/// `namespace/name`. The collection manager hands each collection one of
/// these so collections never see each other's files.
#[derive(Debug)]
pub struct NamespacedStorage {
    namespace: String,
    root: Arc<dyn Storage>,
}

impl NamespacedStorage {
    pub fn new(root: Arc<dyn Storage>, namespace: impl AsRef<str>) -> Self {
        Self {
            namespace: namespace.as_ref().trim_matches('/').to_string(),
            root,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Namespaces in `root` that contain a file called `marker`, sorted.
    pub fn discover(root: &dyn Storage, marker: &str) -> Result<Vec<String>> {
        Ok(root
            .list_files()?
            .iter()
            .filter_map(|file| {
                let (namespace, name) = file.split_once('/')?;
                (name == marker && !namespace.is_empty()).then(|| namespace.to_string())
            })
            .collect())
    }

    fn qualify(&self, name: &str) -> String {
        format!("{}/{name}", self.namespace)
    }

    fn unqualify<'a>(&self, file: &'a str) -> Option<&'a str> {
        file.strip_prefix(self.namespace.as_str())?.strip_prefix('/')
    }
}

impl Storage for NamespacedStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.root.open_input(&self.qualify(name))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.root.create_output(&self.qualify(name))
    }

    fn create_output_append(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.root.create_output_append(&self.qualify(name))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.root.file_exists(&self.qualify(name))
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.root.delete_file(&self.qualify(name))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(self
            .root
            .list_files()?
            .iter()
            .filter_map(|file| self.unqualify(file))
            .map(str::to_string)
            .collect())
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.root
            .rename_file(&self.qualify(old_name), &self.qualify(new_name))
    }

    fn sync(&self) -> Result<()> {
        self.root.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn root() -> Arc<dyn Storage> {
        let root: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        root.write_atomic("docs/manifest.json", b"{}").unwrap();
        root.write_atomic("docs/wal.jsonl", b"").unwrap();
        root.write_atomic("docs_v2/manifest.json", b"{}").unwrap();
        root.write_atomic("notes/readme.txt", b"hi").unwrap();
        root.write_atomic("manifest.json", b"{}").unwrap();
        root
    }

    #[test]
    fn test_names_are_scoped() {
        let root = root();
        let docs = NamespacedStorage::new(root.clone(), "docs");

        assert!(docs.file_exists("manifest.json"));
        assert!(!docs.file_exists("readme.txt"));
        assert_eq!(docs.list_files().unwrap(), vec!["manifest.json", "wal.jsonl"]);

        docs.write_atomic("snapshot.json", b"[]").unwrap();
        assert!(root.file_exists("docs/snapshot.json"));
    }

    #[test]
    fn test_discover_by_marker() {
        let root = root();
        let found = NamespacedStorage::discover(root.as_ref(), "manifest.json").unwrap();
        assert_eq!(found, vec!["docs", "docs_v2"]);
    }

    #[test]
    fn test_delete_stays_in_namespace() {
        let root = root();
        let docs = NamespacedStorage::new(root.clone(), "docs");
        for file in docs.list_files().unwrap() {
            docs.delete_file(&file).unwrap();
        }

        assert!(docs.list_files().unwrap().is_empty());
        assert!(root.file_exists("docs_v2/manifest.json"));
        assert!(root.file_exists("manifest.json"));
    }
}
