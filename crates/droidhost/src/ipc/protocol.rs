//! IPC protocol types for the session and store sockets.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::container::platform::AppInfo;
use crate::store::service::{AppRecord, UpgradeCandidate};

// ============================================================================
// Session socket
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionRequest {
    /// Start the session. The daemon already runs by definition, so this
    /// is an acknowledged no-op.
    Start,

    /// Stop the session: subsystems in reverse order, then the container.
    Stop,

    /// Health check.
    Ping,

    /// Container state plus the probed display parameters.
    GetSession,

    Freeze,

    Unfreeze,

    /// Full installed-app list from the guest.
    GetAppsInfo,

    /// Install an apk from a host path.
    InstallApp(InstallAppRequest),

    RemoveApp(PackageRequest),

    LaunchApp(PackageRequest),

    /// Fire an intent inside the guest.
    LaunchIntent(IntentRequest),

    /// Resolve a display name to a package name.
    NameToPackageName(NameRequest),

    /// Resolve a package name to a display name.
    PackageNameToName(PackageRequest),

    /// Read a guest property.
    Getprop(GetpropRequest),

    /// Write a guest property.
    Setprop(SetpropRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionResponse {
    Ok,
    Pong,
    Session(SessionStatusResponse),
    AppsInfo(AppsInfoResponse),
    PackageName(PackageNameResponse),
    AppName(AppNameResponse),
    PropValue(PropValueResponse),
    Error(ErrorResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallAppRequest {
    /// Host-side path to the apk. The daemon stages it into the shared
    /// data directory before handing it to the guest.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRequest {
    pub package_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRequest {
    pub action: String,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetpropRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetpropRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    /// STOPPED, RUNNING or FROZEN.
    pub state: String,
    pub lcd_density: String,
    pub display_size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppsInfoResponse {
    pub apps: Vec<AppInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageNameResponse {
    pub package_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppNameResponse {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropValueResponse {
    pub value: String,
}

// ============================================================================
// Store socket
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreRequest {
    Ping,

    /// Refresh every repository's cached index.
    UpdateCache,

    /// Case-insensitive substring search on localized names.
    Search(SearchRequest),

    /// Download and install a package's latest version.
    Install(PackageRequest),

    GetUpgradable,

    /// Upgrade the named packages; an empty list upgrades everything.
    UpgradePackages(UpgradePackagesRequest),

    GetInstalledApps,

    UninstallApp(PackageRequest),

    GetRepositories,

    /// Turn this connection into an AppInstalled event stream.
    Subscribe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreResponse {
    Ok,
    Pong,
    SearchResults(SearchResultsResponse),
    CacheUpdated(CacheUpdatedResponse),
    Upgradable(UpgradableResponse),
    UpgradeFinished(UpgradeFinishedResponse),
    InstalledApps(AppsInfoResponse),
    Repositories(RepositoriesResponse),
    /// Subscription confirmed; AppInstalled events follow.
    Subscribed,
    /// Pushed to subscribers after every successful install.
    AppInstalled(AppInstalledEvent),
    Error(ErrorResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradePackagesRequest {
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultsResponse {
    pub results: Vec<AppRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheUpdatedResponse {
    /// AND of the per-repository refresh results.
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradableResponse {
    pub candidates: Vec<UpgradeCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeFinishedResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoriesResponse {
    pub repositories: Vec<RepositoryInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInstalledEvent {
    pub package_name: String,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// App, package or repository does not exist.
    NotFound,
    /// A required host resource is missing.
    Precondition,
    /// The container refused or an lxc tool failed.
    Container,
    /// The session daemon could not be reached.
    Transport,
    /// Malformed guest or repository data.
    Parse,
    /// The request line did not deserialize.
    InvalidRequest,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_request_round_trip() {
        let req = SessionRequest::InstallApp(InstallAppRequest {
            path: PathBuf::from("/tmp/app.apk"),
        });
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("install_app"));

        let parsed: SessionRequest = serde_json::from_str(&json).unwrap();
        match parsed {
            SessionRequest::InstallApp(r) => assert_eq!(r.path, PathBuf::from("/tmp/app.apk")),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_session_response_round_trip() {
        let resp = SessionResponse::Session(SessionStatusResponse {
            state: "RUNNING".to_string(),
            lcd_density: "320".to_string(),
            display_size: "1920,1080".to_string(),
        });
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("session"));

        let parsed: SessionResponse = serde_json::from_str(&json).unwrap();
        match parsed {
            SessionResponse::Session(s) => assert_eq!(s.state, "RUNNING"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_store_subscribe_stream_messages() {
        let json = serde_json::to_string(&StoreResponse::Subscribed).unwrap();
        assert!(json.contains("subscribed"));

        let event = StoreResponse::AppInstalled(AppInstalledEvent {
            package_name: "org.example.app".to_string(),
        });
        let json = serde_json::to_string(&event).unwrap();
        let parsed: StoreResponse = serde_json::from_str(&json).unwrap();
        match parsed {
            StoreResponse::AppInstalled(e) => assert_eq!(e.package_name, "org.example.app"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_empty_upgrade_list_deserializes() {
        let parsed: StoreRequest =
            serde_json::from_str(r#"{"type":"upgrade_packages"}"#).unwrap();
        match parsed {
            StoreRequest::UpgradePackages(r) => assert!(r.packages.is_empty()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_error_response() {
        let resp = SessionResponse::Error(ErrorResponse {
            code: ErrorCode::NotFound,
            message: "no such app: foo".to_string(),
        });
        match resp {
            SessionResponse::Error(e) => {
                assert_eq!(e.code, ErrorCode::NotFound);
                assert!(e.message.contains("foo"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_ping_pong() {
        let json = serde_json::to_string(&SessionRequest::Ping).unwrap();
        assert!(json.contains("ping"));
        let json = serde_json::to_string(&StoreResponse::Pong).unwrap();
        assert!(json.contains("pong"));
    }
}
