//! Integration tests for loading map documents and schemas from disk.

use fml_model::{
    Error, InputMode, MapLoader, MapRegistry, Parameter, TransformKind, TypeMode, TypeSchema,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data")
}

#[test]
fn test_load_by_name_registers_document() -> anyhow::Result<()> {
    let loader = MapLoader::new(vec![data_dir()]);
    let map = loader.load("tutorial")?;

    assert_eq!(map.name.as_deref(), Some("tutorial"));
    assert_eq!(map.structure.len(), 2);

    let group = &map.group[0];
    assert_eq!(group.type_mode, TypeMode::None);
    assert_eq!(group.inputs(InputMode::Target).count(), 1);
    let target = &group.rule[0].target[0];
    assert_eq!(target.transform, Some(TransformKind::Copy));
    assert_eq!(target.parameter, vec![Parameter::Id("a".into())]);

    let registry = loader.registry();
    assert!(registry.contains("http://example.org/fhir/StructureMap/tutorial"));
    Ok(())
}

#[test]
fn test_load_yaml_by_file_name() -> anyhow::Result<()> {
    let loader = MapLoader::new(vec![data_dir()]);
    let map = loader.load("helpers.yaml")?;
    assert_eq!(map.group[0].type_mode, TypeMode::Types);
    assert_eq!(map.group[0].source_type(), Some("HumanName"));
    Ok(())
}

#[test]
fn test_load_missing_document() {
    let loader = MapLoader::new(vec![data_dir()]);
    let err = loader.load("does-not-exist").unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(err.to_string(), "Map not found: does-not-exist");
}

#[test]
fn test_load_directory_skips_documents_without_url() -> anyhow::Result<()> {
    let registry = Arc::new(MapRegistry::new());
    let loader = MapLoader::with_registry(Arc::clone(&registry), vec![]);

    let count = loader.load_directory(&data_dir())?;

    assert_eq!(count, 2);
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.resolve("http://example.org/fhir/StructureMap/*").len(), 2);
    Ok(())
}

#[test]
fn test_load_directory_fails_on_malformed_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("broken.json"), "{ not json")?;

    let loader = MapLoader::new(vec![]);
    let err = loader.load_directory(dir.path()).unwrap_err();
    assert!(err.to_string().starts_with("Invalid map format: JSON parse error"));
    Ok(())
}

#[test]
fn test_round_trip_through_temp_file() -> anyhow::Result<()> {
    let loader = MapLoader::new(vec![data_dir()]);
    let original = loader.load_from_file(&data_dir().join("tutorial.json"))?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("copy.yml");
    fs::write(&path, serde_yaml::to_string(&original)?)?;

    let reloaded = loader.load_from_file(&path)?;
    assert_eq!(reloaded, original);
    Ok(())
}

#[test]
fn test_load_schema_file() -> anyhow::Result<()> {
    let loader = MapLoader::new(vec![]);
    let schema = loader.load_schema_file(&data_dir().join("schema/patient.yaml"))?;

    assert_eq!(schema.len(), 2);
    let name = schema.element("Patient", "name").expect("Patient.name");
    assert!(name.is_array);
    assert_eq!(name.single_type(), Some("HumanName"));
    assert!(!schema.element("HumanName", "family").expect("family").is_array);
    assert!(schema.element("Patient", "address").is_none());
    Ok(())
}
