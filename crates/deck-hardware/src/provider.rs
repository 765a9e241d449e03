//! Definitions loaded from disk, layered over the built-in catalog.

use crate::catalog::BuiltinCatalog;
use anyhow::{Context, Result};
use async_trait::async_trait;
use deck_core::definitions::{
    DeckDefinition, LabwareDefinition, LabwareUri, ModuleDefinition, ModuleModel,
};
use deck_core::provider::{DataProvider, DataProviderError};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Provider that serves labware definitions from directories of JSON files.
///
/// A definition on disk replaces a built-in definition with the same
/// namespace, load name and version. Deck and module definitions always come
/// from the built-in catalog.
#[derive(Debug, Clone, Default)]
pub struct FilesystemProvider {
    builtin: BuiltinCatalog,
    labware: HashMap<LabwareUri, LabwareDefinition>,
}

impl FilesystemProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every `*.json` labware definition found directly in `dir`.
    ///
    /// A missing directory is an error; a file that fails to parse is an
    /// error naming the file.
    pub fn with_directory(mut self, dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read labware directory {}", dir.display()))?;
        let mut loaded = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let definition: LabwareDefinition = serde_json::from_str(&text)
                .with_context(|| format!("Invalid labware definition in {}", path.display()))?;
            debug!(uri = %definition.uri(), path = %path.display(), "Loaded labware definition");
            self.labware.insert(definition.uri(), definition);
            loaded += 1;
        }
        info!(dir = %dir.display(), loaded, "Loaded labware directory");
        Ok(self)
    }

    /// Number of definitions loaded from disk.
    pub fn custom_count(&self) -> usize {
        self.labware.len()
    }
}

#[async_trait]
impl DataProvider for FilesystemProvider {
    async fn labware_definition(
        &self,
        load_name: &str,
        namespace: &str,
        version: u32,
    ) -> Result<LabwareDefinition, DataProviderError> {
        let uri = LabwareUri::new(namespace, load_name, version);
        match self.labware.get(&uri) {
            Some(definition) => Ok(definition.clone()),
            None => self.builtin.labware(load_name, namespace, version),
        }
    }

    async fn deck_definition(&self) -> Result<DeckDefinition, DataProviderError> {
        self.builtin.deck()
    }

    async fn module_definition(
        &self,
        model: ModuleModel,
    ) -> Result<ModuleDefinition, DataProviderError> {
        self.builtin.module(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::STANDARD_NAMESPACE;
    use tempfile::TempDir;

    fn custom_plate() -> LabwareDefinition {
        let mut definition = BuiltinCatalog::new()
            .labware("wellplate_96_360ul_flat", STANDARD_NAMESPACE, 1)
            .unwrap();
        definition.namespace = "custom".to_string();
        definition.display_name = "Custom plate".to_string();
        definition
    }

    #[tokio::test]
    async fn serves_directory_definitions_before_builtins() {
        let dir = TempDir::new().unwrap();
        let definition = custom_plate();
        std::fs::write(
            dir.path().join("plate.json"),
            serde_json::to_string(&definition).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let provider = FilesystemProvider::new().with_directory(dir.path()).unwrap();
        assert_eq!(provider.custom_count(), 1);

        let loaded = provider
            .labware_definition("wellplate_96_360ul_flat", "custom", 1)
            .await
            .unwrap();
        assert_eq!(loaded.display_name, "Custom plate");

        // Built-ins are still reachable.
        provider
            .labware_definition("tiprack_50ul", STANDARD_NAMESPACE, 1)
            .await
            .unwrap();
    }

    #[test]
    fn invalid_file_names_the_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let err = FilesystemProvider::new()
            .with_directory(dir.path())
            .unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(FilesystemProvider::new().with_directory(&missing).is_err());
    }
}
