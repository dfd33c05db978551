//! The index-v2 repository document.
//!
//! Only the fields the store actually consumes are modeled; unknown parts
//! of the document are ignored on deserialization.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const PREFERRED_LOCALE: &str = "en-US";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub packages: HashMap<String, PackageEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageEntry {
    #[serde(default)]
    pub metadata: Metadata,
    /// Keyed by the version file's hash in the wire format; the key is
    /// irrelevant here.
    #[serde(default)]
    pub versions: HashMap<String, VersionEntry>,
}

impl PackageEntry {
    /// Highest versionCode wins; a code tie resolves to the
    /// lexicographically greatest versionName.
    pub fn latest_version(&self) -> Option<&VersionEntry> {
        self.versions.values().max_by(|a, b| {
            a.manifest
                .version_code
                .cmp(&b.manifest.version_code)
                .then_with(|| a.manifest.version_name.cmp(&b.manifest.version_name))
        })
    }

    pub fn localized_name(&self) -> &str {
        self.metadata.localized_name()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Localized display name, keyed by locale.
    #[serde(default)]
    pub name: BTreeMap<String, String>,
    #[serde(default)]
    pub summary: BTreeMap<String, String>,
}

impl Metadata {
    /// Prefer en-US, else the first locale, else empty.
    pub fn localized_name(&self) -> &str {
        self.name
            .get(PREFERRED_LOCALE)
            .or_else(|| self.name.values().next())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn localized_summary(&self) -> &str {
        self.summary
            .get(PREFERRED_LOCALE)
            .or_else(|| self.summary.values().next())
            .map(String::as_str)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionEntry {
    #[serde(default)]
    pub file: FileRef,
    #[serde(default)]
    pub manifest: Manifest,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileRef {
    /// Mirror-relative path, leading slash included.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub version_name: String,
    #[serde(default)]
    pub version_code: i64,
    #[serde(default)]
    pub uses_sdk: Option<UsesSdk>,
    #[serde(default)]
    pub uses_permission: Vec<Permission>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsesSdk {
    #[serde(default)]
    pub min_sdk_version: i64,
    #[serde(default)]
    pub target_sdk_version: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub max_sdk_version: Option<i64>,
}

#[cfg(test)]
pub(crate) fn test_version(version_name: &str, version_code: i64) -> VersionEntry {
    VersionEntry {
        file: FileRef {
            name: format!("/app_{version_code}.apk"),
            size: 1024,
            sha256: String::new(),
        },
        manifest: Manifest {
            version_name: version_name.to_string(),
            version_code,
            uses_sdk: None,
            uses_permission: vec![],
        },
    }
}

#[cfg(test)]
pub(crate) fn test_package(name: &str, versions: &[(&str, i64)]) -> PackageEntry {
    let mut entry = PackageEntry::default();
    entry
        .metadata
        .name
        .insert(PREFERRED_LOCALE.to_string(), name.to_string());
    for (i, (version_name, version_code)) in versions.iter().enumerate() {
        entry
            .versions
            .insert(format!("v{i}"), test_version(version_name, *version_code));
    }
    entry
}
