//! Bundle manifest validation.
//!
//! The manifest is embedded verbatim by the image builder; it is only checked
//! here so a malformed one fails before any staging work.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BundleError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApexManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default, alias = "preInstallHook", skip_serializing_if = "Option::is_none")]
    pub pre_install_hook: Option<String>,
}

impl ApexManifest {
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let invalid = |message: String| BundleError::InvalidManifest {
            path: path.to_path_buf(),
            message,
        };

        let manifest: ApexManifest =
            serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?;
        if manifest.name.trim().is_empty() {
            return Err(invalid("'name' field is required".to_string()));
        }
        if manifest.version == 0 {
            return Err(invalid("'version' field is required".to_string()));
        }
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| BundleError::io(format!("reading manifest '{}'", path.display()), e))?;
        Self::parse(&text, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ApexManifest> {
        ApexManifest::parse(text, Path::new("manifest.json"))
    }

    #[test]
    fn test_minimal_manifest() {
        let manifest = parse(r#"{"name": "com.android.tzdata", "version": 1}"#).unwrap();
        assert_eq!(manifest.name, "com.android.tzdata");
        assert_eq!(manifest.version, 1);
        assert_eq!(manifest.pre_install_hook, None);
    }

    #[test]
    fn test_pre_install_hook_both_spellings() {
        let snake = parse(r#"{"name": "a", "version": 2, "pre_install_hook": "bin/hook"}"#).unwrap();
        let camel = parse(r#"{"name": "a", "version": 2, "preInstallHook": "bin/hook"}"#).unwrap();
        assert_eq!(snake, camel);
        assert_eq!(snake.pre_install_hook.as_deref(), Some("bin/hook"));
    }

    #[test]
    fn test_required_fields() {
        let err = parse(r#"{"version": 1}"#).unwrap_err();
        assert!(err.to_string().contains("'name' field is required"));

        let err = parse(r#"{"name": "a"}"#).unwrap_err();
        assert!(err.to_string().contains("'version' field is required"));

        let err = parse(r#"{"name": "a", "version": 0}"#).unwrap_err();
        assert!(matches!(err, BundleError::InvalidManifest { .. }));
    }

    #[test]
    fn test_rejects_unknown_fields_and_bad_json() {
        assert!(parse(r#"{"name": "a", "version": 1, "extra": true}"#).is_err());
        assert!(parse("not json").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ApexManifest::load(Path::new("/nonexistent/manifest.json")).unwrap_err();
        assert!(matches!(err, BundleError::Io { .. }));
    }
}
