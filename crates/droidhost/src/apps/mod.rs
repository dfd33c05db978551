//! Installed-app tracking.
//!
//! The registry keeps a snapshot of the guest app list and reconciles
//! desktop entries against it. Both the periodic poll and targeted package
//! events converge on the same `reconcile` set-difference.

pub mod desktop;
pub mod monitor;

use std::collections::BTreeSet;

use crate::container::platform::AppInfo;

/// A half-booted package service can briefly report a near-empty list;
/// never trust a first snapshot smaller than this.
pub const MIN_TRUSTED_APPS: usize = 3;

/// System packages that never get a desktop entry even though they carry
/// the launcher category.
pub const HIDDEN_PACKAGES: &[&str] = &[
    "com.android.documentsui",
    "com.android.inputmethod.latin",
    "com.android.settings",
    "com.google.android.gms",
    "org.lineageos.jelly",
    "org.lineageos.aperture",
];

#[derive(Debug, Clone, Default)]
pub struct AppSnapshot {
    apps: Vec<AppInfo>,
}

impl AppSnapshot {
    pub fn new(apps: Vec<AppInfo>) -> Self {
        Self { apps }
    }

    pub fn apps(&self) -> &[AppInfo] {
        &self.apps
    }

    pub fn get(&self, package_name: &str) -> Option<&AppInfo> {
        self.apps.iter().find(|a| a.package_name == package_name)
    }

    pub fn package_names(&self) -> BTreeSet<&str> {
        self.apps.iter().map(|a| a.package_name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn is_trusted(&self) -> bool {
        self.apps.len() >= MIN_TRUSTED_APPS
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct ReconcileOutcome {
    pub added: Vec<AppInfo>,
    pub removed: Vec<String>,
    /// Present in both snapshots but with changed metadata, e.g. a
    /// renamed launcher app after an upgrade.
    pub updated: Vec<AppInfo>,
}

impl ReconcileOutcome {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Diff two snapshots: set difference on package names, plus in-place
/// changes for packages present in both.
pub fn reconcile(previous: &AppSnapshot, current: &AppSnapshot) -> ReconcileOutcome {
    let before = previous.package_names();
    let after = current.package_names();

    let added = current
        .apps
        .iter()
        .filter(|a| !before.contains(a.package_name.as_str()))
        .cloned()
        .collect();
    let removed = before
        .difference(&after)
        .map(|name| name.to_string())
        .collect();
    let updated = current
        .apps
        .iter()
        .filter(|a| previous.get(&a.package_name).is_some_and(|prev| prev != *a))
        .cloned()
        .collect();

    ReconcileOutcome {
        added,
        removed,
        updated,
    }
}

#[cfg(test)]
pub(crate) fn test_app(package: &str, launcher: bool) -> AppInfo {
    AppInfo {
        name: package.rsplit('.').next().unwrap_or(package).to_string(),
        package_name: package.to_string(),
        version_name: "1.0".to_string(),
        version_code: 1,
        action: String::new(),
        launch_intent: String::new(),
        component_package_name: String::new(),
        component_class_name: String::new(),
        categories: if launcher {
            vec![crate::container::CATEGORY_LAUNCHER.to_string()]
        } else {
            vec![]
        },
    }
}
