//! Unix-socket servers for the session and store daemons.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::container::platform::PlatformApi;
use crate::container::{ContainerError, ContainerRuntime};
use crate::error::Error;
use crate::store::service::StoreService;

use super::protocol::*;

/// Bind a Unix socket, replacing a stale socket file and restricting
/// access to the owning user and group.
pub fn bind_socket(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating socket dir {}", parent.display()))?;
    }
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("removing stale socket {}", path.display()))?;
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("binding {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o770))
        .with_context(|| format!("setting permissions on {}", path.display()))?;
    Ok(listener)
}

async fn write_line<W, T>(writer: &mut W, msg: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut json = serde_json::to_string(msg).map_err(std::io::Error::other)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await
}

fn error_code_for(e: &anyhow::Error) -> ErrorCode {
    if let Some(err) = e.downcast_ref::<Error>() {
        return match err {
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Precondition { .. } => ErrorCode::Precondition,
            Error::Transport(_) => ErrorCode::Transport,
            Error::Parse(_) => ErrorCode::Parse,
            Error::Container(_) => ErrorCode::Container,
            _ => ErrorCode::Internal,
        };
    }
    if e.downcast_ref::<ContainerError>().is_some() {
        return ErrorCode::Container;
    }
    ErrorCode::Internal
}

fn session_error(code: ErrorCode, message: impl Into<String>) -> SessionResponse {
    SessionResponse::Error(ErrorResponse {
        code,
        message: message.into(),
    })
}

fn store_error(code: ErrorCode, message: impl Into<String>) -> StoreResponse {
    StoreResponse::Error(ErrorResponse {
        code,
        message: message.into(),
    })
}

// ============================================================================
// Session server
// ============================================================================

pub struct SessionServer {
    pub container: Arc<ContainerRuntime>,
    /// Per-user data dir, bind-mounted as /data inside the guest.
    pub data_dir: PathBuf,
    pub lcd_density: String,
    pub display_size: String,
    /// Cancelling this token tears the whole session down.
    pub shutdown: CancellationToken,
}

impl SessionServer {
    pub async fn handle(&self, req: SessionRequest) -> SessionResponse {
        match req {
            // the daemon answering at all means the session runs
            SessionRequest::Start => SessionResponse::Ok,
            SessionRequest::Ping => SessionResponse::Pong,
            SessionRequest::Stop => {
                info!("stop requested over IPC");
                self.shutdown.cancel();
                SessionResponse::Ok
            }
            SessionRequest::GetSession => match self.container.status().await {
                Ok(state) => SessionResponse::Session(SessionStatusResponse {
                    state: state.to_string(),
                    lcd_density: self.lcd_density.clone(),
                    display_size: self.display_size.clone(),
                }),
                Err(e) => session_error(ErrorCode::Container, e.to_string()),
            },
            SessionRequest::Freeze => self.container_op(self.container.freeze().await),
            SessionRequest::Unfreeze => self.container_op(self.container.unfreeze().await),
            SessionRequest::GetAppsInfo => match self.container.apps_info().await {
                Ok(apps) => SessionResponse::AppsInfo(AppsInfoResponse { apps }),
                Err(e) => session_error(ErrorCode::Container, e.to_string()),
            },
            SessionRequest::InstallApp(r) => match self.install_app(&r.path).await {
                Ok(()) => SessionResponse::Ok,
                Err(e) => session_error(error_code_for(&e), format!("{e:#}")),
            },
            SessionRequest::RemoveApp(r) => {
                self.container_op(self.container.remove_app(&r.package_name).await)
            }
            SessionRequest::LaunchApp(r) => {
                self.container_op(self.container.launch_app(&r.package_name).await)
            }
            SessionRequest::LaunchIntent(r) => {
                self.container_op(self.container.launch_intent(&r.action, &r.uri).await)
            }
            SessionRequest::NameToPackageName(r) => match self.container.apps_info().await {
                Ok(apps) => SessionResponse::PackageName(PackageNameResponse {
                    package_name: apps
                        .into_iter()
                        .find(|a| a.name == r.name)
                        .map(|a| a.package_name),
                }),
                Err(e) => session_error(ErrorCode::Container, e.to_string()),
            },
            SessionRequest::PackageNameToName(r) => {
                match self.container.app_info(&r.package_name).await {
                    Ok(info) => SessionResponse::AppName(AppNameResponse {
                        name: info.map(|a| a.name),
                    }),
                    Err(e) => session_error(ErrorCode::Container, e.to_string()),
                }
            }
            SessionRequest::Getprop(r) => match self.container.get_prop(&r.key).await {
                Ok(value) => SessionResponse::PropValue(PropValueResponse { value }),
                Err(e) => session_error(ErrorCode::Container, e.to_string()),
            },
            SessionRequest::Setprop(r) => {
                self.container_op(self.container.set_prop(&r.key, &r.value).await)
            }
        }
    }

    fn container_op(&self, result: Result<(), ContainerError>) -> SessionResponse {
        match result {
            Ok(()) => SessionResponse::Ok,
            Err(e) => session_error(ErrorCode::Container, e.to_string()),
        }
    }

    /// Stage the apk into the shared data dir so the guest can see it,
    /// install, then drop the staged copy.
    async fn install_app(&self, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::NotFound(format!("no file at {}", path.display())))?
            .to_owned();
        let staging = self.data_dir.join("tmp");
        fs::create_dir_all(&staging)
            .with_context(|| format!("creating staging dir {}", staging.display()))?;
        let staged = staging.join(&file_name);
        fs::copy(path, &staged)
            .with_context(|| format!("staging {}", path.display()))?;

        let guest_path = format!("/data/tmp/{}", file_name.to_string_lossy());
        let result = self.container.install_app(&guest_path).await;

        if let Err(e) = fs::remove_file(&staged) {
            warn!("could not remove staged apk {}: {e}", staged.display());
        }
        result.map_err(Into::into)
    }
}

pub async fn serve_session(
    server: Arc<SessionServer>,
    listener: UnixListener,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("session server shutting down");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let server = server.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_session_connection(server, stream).await {
                            debug!("session connection ended: {e:#}");
                        }
                    });
                }
                Err(e) => {
                    error!("accept failed: {e}");
                    return;
                }
            }
        }
    }
}

async fn handle_session_connection(
    server: Arc<SessionServer>,
    stream: UnixStream,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let resp = match serde_json::from_str::<SessionRequest>(&line) {
            Ok(req) => {
                debug!("session request: {req:?}");
                server.handle(req).await
            }
            Err(e) => session_error(ErrorCode::InvalidRequest, e.to_string()),
        };
        write_line(&mut writer, &resp).await?;
    }
    Ok(())
}

// ============================================================================
// Store server
// ============================================================================

pub async fn serve_store(
    service: Arc<StoreService>,
    listener: UnixListener,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("store server shutting down");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let service = service.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_store_connection(service, stream).await {
                            debug!("store connection ended: {e:#}");
                        }
                    });
                }
                Err(e) => {
                    error!("accept failed: {e}");
                    return;
                }
            }
        }
    }
}

async fn handle_store_connection(service: Arc<StoreService>, stream: UnixStream) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let req = match serde_json::from_str::<StoreRequest>(&line) {
            Ok(req) => req,
            Err(e) => {
                write_line(
                    &mut writer,
                    &store_error(ErrorCode::InvalidRequest, e.to_string()),
                )
                .await?;
                continue;
            }
        };

        if matches!(req, StoreRequest::Subscribe) {
            write_line(&mut writer, &StoreResponse::Subscribed).await?;
            stream_installed_events(&service, &mut writer).await?;
            return Ok(());
        }

        debug!("store request: {req:?}");
        let resp = handle_store_request(&service, req).await;
        write_line(&mut writer, &resp).await?;
    }
    Ok(())
}

/// Push AppInstalled events until the client hangs up.
async fn stream_installed_events<W>(service: &StoreService, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut rx = service.subscribe_installed();
    loop {
        match rx.recv().await {
            Ok(package_name) => {
                let event = StoreResponse::AppInstalled(AppInstalledEvent { package_name });
                if write_line(writer, &event).await.is_err() {
                    return Ok(()); // client gone
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("install event subscriber lagged behind {n} events");
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

async fn handle_store_request(service: &StoreService, req: StoreRequest) -> StoreResponse {
    match req {
        StoreRequest::Ping => StoreResponse::Pong,
        StoreRequest::UpdateCache => match service.update_cache().await {
            Ok(ok) => StoreResponse::CacheUpdated(CacheUpdatedResponse { ok }),
            Err(e) => store_error(error_code_for(&e), format!("{e:#}")),
        },
        StoreRequest::Search(r) => match service.search(&r.query) {
            Ok(results) => StoreResponse::SearchResults(SearchResultsResponse { results }),
            Err(e) => store_error(error_code_for(&e), format!("{e:#}")),
        },
        StoreRequest::Install(r) => match service.install(&r.package_name).await {
            Ok(()) => StoreResponse::Ok,
            Err(e) => store_error(error_code_for(&e), format!("{e:#}")),
        },
        StoreRequest::GetUpgradable => match service.upgradable().await {
            Ok(candidates) => StoreResponse::Upgradable(UpgradableResponse { candidates }),
            Err(e) => store_error(error_code_for(&e), format!("{e:#}")),
        },
        StoreRequest::UpgradePackages(r) => match service.upgrade_packages(&r.packages).await {
            Ok(ok) => StoreResponse::UpgradeFinished(UpgradeFinishedResponse { ok }),
            Err(e) => store_error(error_code_for(&e), format!("{e:#}")),
        },
        StoreRequest::GetInstalledApps => match service.installed_apps().await {
            Ok(apps) => StoreResponse::InstalledApps(AppsInfoResponse { apps }),
            Err(e) => store_error(ErrorCode::Transport, format!("{e:#}")),
        },
        StoreRequest::UninstallApp(r) => match service.uninstall(&r.package_name).await {
            Ok(()) => StoreResponse::Ok,
            Err(e) => store_error(ErrorCode::Transport, format!("{e:#}")),
        },
        StoreRequest::GetRepositories => match service.repositories() {
            Ok(repos) => StoreResponse::Repositories(RepositoriesResponse {
                repositories: repos
                    .into_iter()
                    .filter_map(|r| {
                        r.mirrors.first().map(|url| RepositoryInfo {
                            name: r.name.clone(),
                            url: url.clone(),
                        })
                    })
                    .collect(),
            }),
            Err(e) => store_error(error_code_for(&e), format!("{e:#}")),
        },
        StoreRequest::Subscribe => store_error(
            ErrorCode::InvalidRequest,
            "subscribe is handled per-connection",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_bind_socket_replaces_stale_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("droidhost").join("session.sock");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();

        let first = bind_socket(&path).unwrap();
        drop(first);
        // stale socket file is still on disk; binding again must succeed
        assert!(path.exists());
        let _second = bind_socket(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o770);
    }

    #[test]
    fn test_error_code_mapping() {
        let e: anyhow::Error = Error::NotFound("pkg".to_string()).into();
        assert_eq!(error_code_for(&e), ErrorCode::NotFound);

        let e: anyhow::Error = Error::Transport("socket".to_string()).into();
        assert_eq!(error_code_for(&e), ErrorCode::Transport);

        let e: anyhow::Error = ContainerError::NotRunning.into();
        assert_eq!(error_code_for(&e), ErrorCode::Container);

        let e = anyhow::anyhow!("something else");
        assert_eq!(error_code_for(&e), ErrorCode::Internal);
    }
}
