//! Loading compiled map documents and type schemas from disk

use crate::model::StructureMap;
use crate::registry::MapRegistry;
use crate::schema::{SchemaSet, TypeDefinition};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

/// Serializable schema format for loading from files
#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    types: Vec<TypeDefinition>,
}

/// Map document loader backed by a shared registry
pub struct MapLoader {
    registry: Arc<MapRegistry>,
    search_paths: Vec<PathBuf>,
}

impl MapLoader {
    /// Create a new loader with the given search paths
    #[must_use]
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            registry: Arc::new(MapRegistry::new()),
            search_paths,
        }
    }

    /// Create a new loader that registers into an existing registry
    #[must_use]
    pub fn with_registry(registry: Arc<MapRegistry>, search_paths: Vec<PathBuf>) -> Self {
        Self {
            registry,
            search_paths,
        }
    }

    /// The registry loaded documents are added to
    #[must_use]
    pub fn registry(&self) -> Arc<MapRegistry> {
        Arc::clone(&self.registry)
    }

    /// Load a document by file name from the search paths
    ///
    /// `name` may omit the extension; `.json`, `.yaml` and `.yml` are tried.
    /// Documents with a url are registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no search path holds the file, or a
    /// parse error for malformed content.
    pub fn load(&self, name: &str) -> Result<Arc<StructureMap>> {
        let path = self
            .find_file(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let map = Arc::new(self.load_from_file(&path)?);
        if map.url.is_some() {
            self.registry.register(Arc::clone(&map))?;
        }
        Ok(map)
    }

    fn find_file(&self, name: &str) -> Option<PathBuf> {
        for dir in &self.search_paths {
            let exact = dir.join(name);
            if exact.is_file() {
                return Some(exact);
            }
            for extension in EXTENSIONS {
                let candidate = dir.join(format!("{name}.{extension}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        trace!("Map file not found in search paths: {}", name);
        None
    }

    /// Load a document from a specific file path
    ///
    /// # Errors
    ///
    /// Fails on IO errors or malformed content.
    pub fn load_from_file(&self, path: &Path) -> Result<StructureMap> {
        trace!("Loading map from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;

        if is_yaml(path) {
            self.load_from_yaml(&content)
        } else {
            self.load_from_json(&content)
        }
    }

    /// Load a document from a JSON string
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] for malformed JSON or a wrong
    /// `resourceType`.
    pub fn load_from_json(&self, json: &str) -> Result<StructureMap> {
        let map: StructureMap = serde_json::from_str(json)
            .map_err(|e| Error::InvalidFormat(format!("JSON parse error: {e}")))?;
        check_resource_type(map)
    }

    /// Load a document from a YAML string
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] for malformed YAML or a wrong
    /// `resourceType`.
    pub fn load_from_yaml(&self, yaml: &str) -> Result<StructureMap> {
        let map: StructureMap = serde_yaml::from_str(yaml)
            .map_err(|e| Error::InvalidFormat(format!("YAML parse error: {e}")))?;
        check_resource_type(map)
    }

    /// Load every document in `dir` into the registry
    ///
    /// Files without a supported extension are ignored; documents without a
    /// url are skipped with a warning. Returns the number registered.
    ///
    /// # Errors
    ///
    /// Fails on the first unreadable or malformed file.
    pub fn load_directory(&self, dir: &Path) -> Result<usize> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_supported_extension(path))
            .collect();
        paths.sort();

        let mut count = 0;
        for path in paths {
            let map = self.load_from_file(&path)?;
            if map.url.is_none() {
                warn!("Skipping map without url: {:?}", path);
                continue;
            }
            self.registry.register(map)?;
            count += 1;
        }

        info!("Loaded {} map documents from {:?}", count, dir);
        Ok(count)
    }

    /// Load a type schema from a JSON or YAML file
    ///
    /// # Errors
    ///
    /// Fails on IO errors or malformed content.
    pub fn load_schema_file(&self, path: &Path) -> Result<SchemaSet> {
        debug!("Loading type schema from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let file: SchemaFile = if is_yaml(path) {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::InvalidFormat(format!("YAML parse error: {e}")))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::InvalidFormat(format!("JSON parse error: {e}")))?
        };
        Ok(file.types.into_iter().collect())
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "yaml" || e == "yml")
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e))
}

fn check_resource_type(map: StructureMap) -> Result<StructureMap> {
    if map.resource_type != "StructureMap" {
        return Err(Error::InvalidFormat(format!(
            "Expected resourceType StructureMap, found {}",
            map.resource_type
        )));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_json() {
        let loader = MapLoader::new(vec![]);
        let map = loader
            .load_from_json(r#"{"resourceType": "StructureMap", "url": "http://x/a", "group": []}"#)
            .unwrap();
        assert_eq!(map.url.as_deref(), Some("http://x/a"));
    }

    #[test]
    fn test_load_from_yaml() {
        let loader = MapLoader::new(vec![]);
        let yaml = r"
url: http://x/a
name: a
group:
  - name: g
    input:
      - name: src
        mode: source
      - name: tgt
        mode: target
    rule: []
";
        let map = loader.load_from_yaml(yaml).unwrap();
        assert_eq!(map.group[0].input.len(), 2);
    }

    #[test]
    fn test_rejects_other_resource_types() {
        let loader = MapLoader::new(vec![]);
        let err = loader
            .load_from_json(r#"{"resourceType": "Patient"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("Expected resourceType StructureMap"));
    }

    #[test]
    fn test_invalid_json() {
        let loader = MapLoader::new(vec![]);
        assert!(matches!(
            loader.load_from_json("{"),
            Err(Error::InvalidFormat(_))
        ));
    }
}
