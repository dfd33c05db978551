//! Guest platform service access.
//!
//! App management runs through the `droidplat` helper shipped inside the
//! guest image; it speaks JSON on stdout. The trait keeps the host side
//! transport-agnostic so the app registry can run against an in-memory
//! fake in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ContainerError, ContainerResult, ContainerRuntime};

pub const CATEGORY_LAUNCHER: &str = "android.intent.category.LAUNCHER";

/// One installed app as the guest reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub name: String,
    pub package_name: String,
    #[serde(default)]
    pub version_name: String,
    #[serde(default)]
    pub version_code: i64,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub launch_intent: String,
    #[serde(default)]
    pub component_package_name: String,
    #[serde(default)]
    pub component_class_name: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl AppInfo {
    pub fn is_launcher_app(&self) -> bool {
        self.categories.iter().any(|c| c == CATEGORY_LAUNCHER)
    }
}

#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Full list of installed apps.
    async fn apps_info(&self) -> ContainerResult<Vec<AppInfo>>;

    /// One app by package name, or None when it is not installed.
    async fn app_info(&self, package_name: &str) -> ContainerResult<Option<AppInfo>>;

    /// Install an apk from a guest-visible path.
    async fn install_app(&self, guest_path: &str) -> ContainerResult<()>;

    async fn remove_app(&self, package_name: &str) -> ContainerResult<()>;

    async fn launch_app(&self, package_name: &str) -> ContainerResult<()>;
}

#[async_trait]
impl PlatformApi for ContainerRuntime {
    async fn apps_info(&self) -> ContainerResult<Vec<AppInfo>> {
        let output = self.attach(&["droidplat", "apps", "--json"]).await?;
        serde_json::from_str(&output).map_err(|e| ContainerError::Parse(e.to_string()))
    }

    async fn app_info(&self, package_name: &str) -> ContainerResult<Option<AppInfo>> {
        let output = self
            .attach(&["droidplat", "app", package_name, "--json"])
            .await?;
        if output.is_empty() || output == "null" {
            return Ok(None);
        }
        serde_json::from_str(&output)
            .map(Some)
            .map_err(|e| ContainerError::Parse(e.to_string()))
    }

    async fn install_app(&self, guest_path: &str) -> ContainerResult<()> {
        self.attach(&["droidplat", "install", guest_path]).await?;
        Ok(())
    }

    async fn remove_app(&self, package_name: &str) -> ContainerResult<()> {
        self.attach(&["droidplat", "uninstall", package_name]).await?;
        Ok(())
    }

    async fn launch_app(&self, package_name: &str) -> ContainerResult<()> {
        self.attach(&["droidplat", "launch", package_name]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_info_deserializes_guest_json() {
        let json = r#"{
            "name": "Files",
            "packageName": "com.android.documentsui",
            "versionName": "14",
            "versionCode": 34,
            "categories": ["android.intent.category.LAUNCHER"]
        }"#;
        let app: AppInfo = serde_json::from_str(json).unwrap();
        assert_eq!(app.package_name, "com.android.documentsui");
        assert!(app.is_launcher_app());
        // fields the helper omits default to empty
        assert_eq!(app.launch_intent, "");
    }

    #[test]
    fn test_non_launcher_app() {
        let app = AppInfo {
            name: "Service".to_string(),
            package_name: "com.example.service".to_string(),
            version_name: String::new(),
            version_code: 0,
            action: String::new(),
            launch_intent: String::new(),
            component_package_name: String::new(),
            component_class_name: String::new(),
            categories: vec!["android.intent.category.DEFAULT".to_string()],
        };
        assert!(!app.is_launcher_app());
    }
}
