//! Install descriptor for a produced package.
//!
//! The package is installed byte for byte as an opaque prebuilt file, so the
//! descriptor only names where it comes from and where it goes.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::bundle::APEX_SUFFIX;

/// Install class of an opaque prebuilt file.
pub const ETC_CLASS: &str = "ETC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallDescriptor {
    pub module: String,
    /// Directory the bundle was defined in.
    pub module_dir: PathBuf,
    pub class: String,
    pub prebuilt_file: PathBuf,
    /// Install location, rooted at `$(OUT_DIR)`.
    pub module_path: String,
    pub installed_stem: String,
}

impl InstallDescriptor {
    /// `install_dir` is relative to the product output root.
    pub fn new(name: &str, module_dir: &Path, artifact: &Path, install_dir: &Path) -> Self {
        Self {
            module: name.to_string(),
            module_dir: module_dir.to_path_buf(),
            class: ETC_CLASS.to_string(),
            prebuilt_file: artifact.to_path_buf(),
            module_path: format!("$(OUT_DIR)/{}", install_dir.display()),
            installed_stem: format!("{name}{APEX_SUFFIX}"),
        }
    }

    /// Make fragment registering the package as a prebuilt module.
    pub fn render_make(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "include $(CLEAR_VARS)");
        let _ = writeln!(out, "LOCAL_PATH := {}", self.module_dir.display());
        let _ = writeln!(out, "LOCAL_MODULE := {}", self.module);
        let _ = writeln!(out, "LOCAL_MODULE_CLASS := {}", self.class);
        let _ = writeln!(out, "LOCAL_PREBUILT_MODULE_FILE := {}", self.prebuilt_file.display());
        let _ = writeln!(out, "LOCAL_MODULE_PATH := {}", self.module_path);
        let _ = writeln!(out, "LOCAL_INSTALLED_MODULE_STEM := {}", self.installed_stem);
        let _ = writeln!(out, "include $(BUILD_PREBUILT)");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> InstallDescriptor {
        InstallDescriptor::new(
            "com.android.tzdata",
            Path::new("system/timezone/apex"),
            Path::new("out/soong/bundles/com.android.tzdata/com.android.tzdata.apex"),
            Path::new("target/product/generic/system/apex"),
        )
    }

    #[test]
    fn test_descriptor_fields() {
        let d = descriptor();
        assert_eq!(d.class, "ETC");
        assert_eq!(d.installed_stem, "com.android.tzdata.apex");
        assert_eq!(d.module_path, "$(OUT_DIR)/target/product/generic/system/apex");
    }

    #[test]
    fn test_render_make() {
        assert_eq!(
            descriptor().render_make(),
            "\ninclude $(CLEAR_VARS)\n\
             LOCAL_PATH := system/timezone/apex\n\
             LOCAL_MODULE := com.android.tzdata\n\
             LOCAL_MODULE_CLASS := ETC\n\
             LOCAL_PREBUILT_MODULE_FILE := out/soong/bundles/com.android.tzdata/com.android.tzdata.apex\n\
             LOCAL_MODULE_PATH := $(OUT_DIR)/target/product/generic/system/apex\n\
             LOCAL_INSTALLED_MODULE_STEM := com.android.tzdata.apex\n\
             include $(BUILD_PREBUILT)\n"
        );
    }

    #[test]
    fn test_serializes() {
        let json = serde_json::to_value(descriptor()).unwrap();
        assert_eq!(json["class"], "ETC");
        assert_eq!(json["installed_stem"], "com.android.tzdata.apex");
    }
}
