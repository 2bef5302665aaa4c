//! Manifest validation: the gate every restore passes before it may touch
//! anything.

use crate::backup::manifest::{
    ComponentKind, Manifest, DATABASE_COMPONENT, MANIFEST_FILE, SUPPORTED_VERSIONS,
};
use crate::utils::errors::ValidationError;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Load and validate the manifest of the backup in `backup_dir`.
pub fn validate_manifest(backup_dir: &Path) -> Result<Manifest, ValidationError> {
    if !backup_dir.is_dir() {
        return Err(ValidationError::NotFound(backup_dir.to_path_buf()));
    }
    let path = backup_dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(ValidationError::NotFound(path));
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| ValidationError::Format(format!("cannot read {}: {}", path.display(), e)))?;
    let mut value: Value = serde_json::from_str(&content)
        .map_err(|e| ValidationError::Format(format!("invalid JSON: {}", e)))?;

    let version = value
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::Format("missing \"version\"".into()))?
        .to_string();
    if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
        return Err(ValidationError::Version(version));
    }

    let components = value
        .get_mut("components")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| ValidationError::Format("missing \"components\" object".into()))?;
    if components.is_empty() {
        return Err(ValidationError::Format("manifest lists no components".into()));
    }
    if version == "1.0" {
        for (name, component) in components.iter_mut() {
            tag_legacy_component(name, component);
        }
    }

    serde_json::from_value(value).map_err(|e| ValidationError::Format(e.to_string()))
}

/// 1.0 manifests stored components without a `kind` tag; infer it from
/// the fields each kind carries.
fn tag_legacy_component(name: &str, component: &mut Value) {
    let Some(object) = component.as_object_mut() else {
        return;
    };
    if object.contains_key("kind") {
        return;
    }
    let kind = if object.contains_key("volume") {
        ComponentKind::Volume
    } else if object.contains_key("source_dir") || object.contains_key("backup_dir") {
        ComponentKind::Directory
    } else if name == DATABASE_COMPONENT || object.contains_key("compressed") {
        ComponentKind::Database
    } else {
        return;
    };
    object.insert("kind".into(), Value::String(kind.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::manifest::ComponentResult;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, json: &str) {
        fs::write(dir.join(MANIFEST_FILE), json).unwrap();
    }

    const VALID: &str = r#"{
        "timestamp": "2026-10-17T12:00:00Z",
        "version": "2.0",
        "backup_name": "backup_20261017_120000",
        "backup_path": "/srv/backups/backup_20261017_120000",
        "components": {
            "config": {"kind": "directory", "component": "config", "source_dir": "/srv/app/config",
                       "backup_dir": "/srv/backups/backup_20261017_120000/config",
                       "files": 3, "size_mb": 0.01, "errors": []}
        },
        "total_size_mb": 0.01
    }"#;

    #[test]
    fn test_valid_manifest() {
        let temp_dir = TempDir::new().unwrap();
        write_manifest(temp_dir.path(), VALID);
        let manifest = validate_manifest(temp_dir.path()).unwrap();
        assert_eq!(manifest.components.len(), 1);
        assert!(matches!(manifest.components["config"], ComponentResult::Directory(_)));
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let err = validate_manifest(Path::new("/nonexistent/backup")).unwrap_err();
        assert!(matches!(err, ValidationError::NotFound(_)));
    }

    #[test]
    fn test_missing_metadata_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let err = validate_manifest(temp_dir.path()).unwrap_err();
        assert!(matches!(err, ValidationError::NotFound(_)));
    }

    #[test]
    fn test_malformed_json_is_format() {
        let temp_dir = TempDir::new().unwrap();
        write_manifest(temp_dir.path(), "{ not json");
        assert!(matches!(
            validate_manifest(temp_dir.path()).unwrap_err(),
            ValidationError::Format(_)
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let temp_dir = TempDir::new().unwrap();
        write_manifest(temp_dir.path(), &VALID.replace("\"2.0\"", "\"9.9\""));
        match validate_manifest(temp_dir.path()).unwrap_err() {
            ValidationError::Version(v) => assert_eq!(v, "9.9"),
            other => panic!("expected version error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_components_is_format() {
        let temp_dir = TempDir::new().unwrap();
        write_manifest(
            temp_dir.path(),
            r#"{"timestamp": "2026-10-17T12:00:00Z", "version": "2.0", "backup_name": "b",
                "backup_path": "/b", "components": {}, "total_size_mb": 0}"#,
        );
        assert!(matches!(
            validate_manifest(temp_dir.path()).unwrap_err(),
            ValidationError::Format(_)
        ));
    }

    #[test]
    fn test_legacy_manifest_components_are_tagged() {
        let temp_dir = TempDir::new().unwrap();
        write_manifest(
            temp_dir.path(),
            r#"{
                "timestamp": "2025-01-01T00:00:00Z",
                "version": "1.0",
                "backup_name": "backup_20250101_000000",
                "backup_path": "/b",
                "components": {
                    "database": {"filename": "app.sql.gz", "filepath": "/b/app.sql.gz", "size_mb": 1.0,
                                 "checksum": "abc", "db_summary": null, "compressed": true},
                    "models": {"component": "models", "source_dir": "/m", "backup_dir": "/b/models",
                               "files": 2, "size_mb": 3.0, "errors": []},
                    "pgdata": {"volume": "pgdata", "filename": "pgdata.tar.gz",
                               "filepath": "/b/pgdata.tar.gz", "size_mb": 2.0, "checksum": "def", "errors": []}
                },
                "total_size_mb": 6.0
            }"#,
        );
        let manifest = validate_manifest(temp_dir.path()).unwrap();
        assert_eq!(manifest.components["database"].kind(), ComponentKind::Database);
        assert_eq!(manifest.components["models"].kind(), ComponentKind::Directory);
        assert_eq!(manifest.components["pgdata"].kind(), ComponentKind::Volume);
    }
}
