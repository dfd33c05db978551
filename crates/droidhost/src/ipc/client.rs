//! Typed clients for the session and store sockets.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::container::platform::AppInfo;
use crate::store::service::{AppRecord, UpgradeCandidate};

use super::protocol::*;

async fn round_trip<Req, Resp>(socket_path: &Path, req: &Req) -> Result<Resp>
where
    Req: serde::Serialize,
    Resp: serde::de::DeserializeOwned,
{
    let mut stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connecting to {}", socket_path.display()))?;

    let mut json = serde_json::to_string(req).context("serializing request")?;
    json.push('\n');
    stream
        .write_all(json.as_bytes())
        .await
        .context("writing request")?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .context("reading response")?;
    if line.is_empty() {
        anyhow::bail!("connection closed before a response arrived");
    }

    serde_json::from_str(&line).context("parsing response")
}

// ============================================================================
// Session client
// ============================================================================

#[derive(Debug, Clone)]
pub struct SessionClient {
    socket_path: PathBuf,
}

impl SessionClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn request(&self, req: &SessionRequest) -> Result<SessionResponse> {
        let resp: SessionResponse = round_trip(&self.socket_path, req).await?;
        if let SessionResponse::Error(e) = &resp {
            anyhow::bail!("session error ({:?}): {}", e.code, e.message);
        }
        Ok(resp)
    }

    pub async fn ping(&self) -> Result<()> {
        match self.request(&SessionRequest::Ping).await? {
            SessionResponse::Pong => Ok(()),
            _ => anyhow::bail!("unexpected response to ping"),
        }
    }

    pub async fn start(&self) -> Result<()> {
        match self.request(&SessionRequest::Start).await? {
            SessionResponse::Ok => Ok(()),
            _ => anyhow::bail!("unexpected response to start"),
        }
    }

    pub async fn stop(&self) -> Result<()> {
        match self.request(&SessionRequest::Stop).await? {
            SessionResponse::Ok => Ok(()),
            _ => anyhow::bail!("unexpected response to stop"),
        }
    }

    pub async fn get_session(&self) -> Result<SessionStatusResponse> {
        match self.request(&SessionRequest::GetSession).await? {
            SessionResponse::Session(s) => Ok(s),
            _ => anyhow::bail!("unexpected response to get_session"),
        }
    }

    pub async fn freeze(&self) -> Result<()> {
        match self.request(&SessionRequest::Freeze).await? {
            SessionResponse::Ok => Ok(()),
            _ => anyhow::bail!("unexpected response to freeze"),
        }
    }

    pub async fn unfreeze(&self) -> Result<()> {
        match self.request(&SessionRequest::Unfreeze).await? {
            SessionResponse::Ok => Ok(()),
            _ => anyhow::bail!("unexpected response to unfreeze"),
        }
    }

    pub async fn get_apps_info(&self) -> Result<Vec<AppInfo>> {
        match self.request(&SessionRequest::GetAppsInfo).await? {
            SessionResponse::AppsInfo(a) => Ok(a.apps),
            _ => anyhow::bail!("unexpected response to get_apps_info"),
        }
    }

    pub async fn install_app(&self, path: &Path) -> Result<()> {
        let req = SessionRequest::InstallApp(InstallAppRequest {
            path: path.to_path_buf(),
        });
        match self.request(&req).await? {
            SessionResponse::Ok => Ok(()),
            _ => anyhow::bail!("unexpected response to install_app"),
        }
    }

    pub async fn remove_app(&self, package_name: &str) -> Result<()> {
        let req = SessionRequest::RemoveApp(PackageRequest {
            package_name: package_name.to_string(),
        });
        match self.request(&req).await? {
            SessionResponse::Ok => Ok(()),
            _ => anyhow::bail!("unexpected response to remove_app"),
        }
    }

    pub async fn launch_app(&self, package_name: &str) -> Result<()> {
        let req = SessionRequest::LaunchApp(PackageRequest {
            package_name: package_name.to_string(),
        });
        match self.request(&req).await? {
            SessionResponse::Ok => Ok(()),
            _ => anyhow::bail!("unexpected response to launch_app"),
        }
    }

    pub async fn launch_intent(&self, action: &str, uri: &str) -> Result<()> {
        let req = SessionRequest::LaunchIntent(IntentRequest {
            action: action.to_string(),
            uri: uri.to_string(),
        });
        match self.request(&req).await? {
            SessionResponse::Ok => Ok(()),
            _ => anyhow::bail!("unexpected response to launch_intent"),
        }
    }

    pub async fn name_to_package_name(&self, name: &str) -> Result<Option<String>> {
        let req = SessionRequest::NameToPackageName(NameRequest {
            name: name.to_string(),
        });
        match self.request(&req).await? {
            SessionResponse::PackageName(p) => Ok(p.package_name),
            _ => anyhow::bail!("unexpected response to name_to_package_name"),
        }
    }

    pub async fn package_name_to_name(&self, package_name: &str) -> Result<Option<String>> {
        let req = SessionRequest::PackageNameToName(PackageRequest {
            package_name: package_name.to_string(),
        });
        match self.request(&req).await? {
            SessionResponse::AppName(n) => Ok(n.name),
            _ => anyhow::bail!("unexpected response to package_name_to_name"),
        }
    }

    pub async fn getprop(&self, key: &str) -> Result<String> {
        let req = SessionRequest::Getprop(GetpropRequest {
            key: key.to_string(),
        });
        match self.request(&req).await? {
            SessionResponse::PropValue(v) => Ok(v.value),
            _ => anyhow::bail!("unexpected response to getprop"),
        }
    }

    pub async fn setprop(&self, key: &str, value: &str) -> Result<()> {
        let req = SessionRequest::Setprop(SetpropRequest {
            key: key.to_string(),
            value: value.to_string(),
        });
        match self.request(&req).await? {
            SessionResponse::Ok => Ok(()),
            _ => anyhow::bail!("unexpected response to setprop"),
        }
    }
}

// ============================================================================
// Store client
// ============================================================================

#[derive(Debug, Clone)]
pub struct StoreClient {
    socket_path: PathBuf,
}

impl StoreClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    async fn request(&self, req: &StoreRequest) -> Result<StoreResponse> {
        let resp: StoreResponse = round_trip(&self.socket_path, req).await?;
        if let StoreResponse::Error(e) = &resp {
            anyhow::bail!("store error ({:?}): {}", e.code, e.message);
        }
        Ok(resp)
    }

    pub async fn ping(&self) -> Result<()> {
        match self.request(&StoreRequest::Ping).await? {
            StoreResponse::Pong => Ok(()),
            _ => anyhow::bail!("unexpected response to ping"),
        }
    }

    pub async fn update_cache(&self) -> Result<bool> {
        match self.request(&StoreRequest::UpdateCache).await? {
            StoreResponse::CacheUpdated(c) => Ok(c.ok),
            _ => anyhow::bail!("unexpected response to update_cache"),
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<AppRecord>> {
        let req = StoreRequest::Search(SearchRequest {
            query: query.to_string(),
        });
        match self.request(&req).await? {
            StoreResponse::SearchResults(r) => Ok(r.results),
            _ => anyhow::bail!("unexpected response to search"),
        }
    }

    pub async fn install(&self, package_name: &str) -> Result<()> {
        let req = StoreRequest::Install(PackageRequest {
            package_name: package_name.to_string(),
        });
        match self.request(&req).await? {
            StoreResponse::Ok => Ok(()),
            _ => anyhow::bail!("unexpected response to install"),
        }
    }

    pub async fn get_upgradable(&self) -> Result<Vec<UpgradeCandidate>> {
        match self.request(&StoreRequest::GetUpgradable).await? {
            StoreResponse::Upgradable(u) => Ok(u.candidates),
            _ => anyhow::bail!("unexpected response to get_upgradable"),
        }
    }

    pub async fn upgrade_packages(&self, packages: Vec<String>) -> Result<bool> {
        let req = StoreRequest::UpgradePackages(UpgradePackagesRequest { packages });
        match self.request(&req).await? {
            StoreResponse::UpgradeFinished(u) => Ok(u.ok),
            _ => anyhow::bail!("unexpected response to upgrade_packages"),
        }
    }

    pub async fn get_installed_apps(&self) -> Result<Vec<AppInfo>> {
        match self.request(&StoreRequest::GetInstalledApps).await? {
            StoreResponse::InstalledApps(a) => Ok(a.apps),
            _ => anyhow::bail!("unexpected response to get_installed_apps"),
        }
    }

    pub async fn uninstall_app(&self, package_name: &str) -> Result<()> {
        let req = StoreRequest::UninstallApp(PackageRequest {
            package_name: package_name.to_string(),
        });
        match self.request(&req).await? {
            StoreResponse::Ok => Ok(()),
            _ => anyhow::bail!("unexpected response to uninstall_app"),
        }
    }

    pub async fn get_repositories(&self) -> Result<Vec<RepositoryInfo>> {
        match self.request(&StoreRequest::GetRepositories).await? {
            StoreResponse::Repositories(r) => Ok(r.repositories),
            _ => anyhow::bail!("unexpected response to get_repositories"),
        }
    }

    /// Open a dedicated connection streaming AppInstalled events.
    pub async fn subscribe(&self) -> Result<InstalledSubscription> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| format!("connecting to {}", self.socket_path.display()))?;

        let (reader, mut writer) = stream.into_split();

        let mut json =
            serde_json::to_string(&StoreRequest::Subscribe).context("serializing request")?;
        json.push('\n');
        writer
            .write_all(json.as_bytes())
            .await
            .context("writing request")?;

        let mut lines = BufReader::new(reader).lines();
        let first_line = lines
            .next_line()
            .await
            .context("reading subscription response")?
            .ok_or_else(|| anyhow::anyhow!("connection closed"))?;

        let resp: StoreResponse =
            serde_json::from_str(&first_line).context("parsing response")?;
        match resp {
            StoreResponse::Subscribed => Ok(InstalledSubscription {
                lines,
                _writer: writer,
            }),
            StoreResponse::Error(e) => {
                anyhow::bail!("store error ({:?}): {}", e.code, e.message)
            }
            _ => anyhow::bail!("unexpected response to subscribe"),
        }
    }
}

/// An active AppInstalled subscription.
pub struct InstalledSubscription {
    lines: tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
    // Keep writer alive to maintain connection
    _writer: tokio::net::unix::OwnedWriteHalf,
}

impl InstalledSubscription {
    /// Next installed package name, or None when the stream ends.
    pub async fn next(&mut self) -> Option<String> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => match serde_json::from_str::<StoreResponse>(&line) {
                    Ok(StoreResponse::AppInstalled(e)) => return Some(e.package_name),
                    Ok(_) | Err(_) => continue,
                },
                Ok(None) | Err(_) => return None,
            }
        }
    }
}
